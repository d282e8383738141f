use async_trait::async_trait;

use crate::models::subscription::{Activity, NewSubscription, Subscription};

/// Result of a limit-guarded usage increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageUpdate {
    pub applied: bool,
    pub used: i32,
    pub limit: i32,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Latest-ending subscription with `status = 'active'` for the tenant.
    /// Expiry is left to the caller.
    async fn find_active_subscription(
        &self,
        tenant_id: i64,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    async fn insert_subscription(
        &self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, sqlx::Error>;

    /// Adds one to the activity counter in a single statement.
    /// Returns the new count, or `None` when the row no longer exists.
    async fn increment_usage(
        &self,
        subscription_id: i64,
        activity: Activity,
    ) -> Result<Option<i32>, sqlx::Error>;

    /// Adds one to the activity counter only while it is below the limit.
    /// `Err(RowNotFound)` when the subscription does not exist.
    async fn try_increment_usage(
        &self,
        subscription_id: i64,
        activity: Activity,
    ) -> Result<UsageUpdate, sqlx::Error>;
}
