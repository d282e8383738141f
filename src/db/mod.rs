pub mod mock_subscription_repository;
pub mod postgres_subscription_repository;
pub mod subscription_repository;
