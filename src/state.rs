use crate::config::Config;
use crate::db::subscription_repository::SubscriptionRepository;
use crate::services::quota::QuotaManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub quota: QuotaManager,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>, config: Arc<Config>) -> Self {
        Self {
            quota: QuotaManager::new(subscriptions.clone()),
            subscriptions,
            config,
        }
    }
}
