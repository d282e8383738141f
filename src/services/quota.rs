use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tracing::{debug, error, info, warn};

use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::package::{BillingPeriod, PackageTier};
use crate::models::subscription::{Activity, NewSubscription, Subscription};

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("No active subscription found. Please subscribe to a package.")]
    NoActiveSubscription,
    #[error("Subscription has expired. Please renew your subscription.")]
    SubscriptionExpired,
    #[error("Monthly {} limit ({limit}) reached. Please upgrade your package.", .activity.label())]
    LimitExceeded { activity: Activity, limit: i32 },
    #[error("Unknown entity type")]
    UnknownActivity(String),
    #[error("Unable to verify the subscription right now. Please try again.")]
    Store(#[from] sqlx::Error),
}

impl QuotaError {
    pub fn denial(&self) -> QuotaDenial {
        match self {
            QuotaError::NoActiveSubscription => QuotaDenial::NoActiveSubscription,
            QuotaError::SubscriptionExpired => QuotaDenial::SubscriptionExpired,
            QuotaError::LimitExceeded { .. } => QuotaDenial::LimitExceeded,
            QuotaError::UnknownActivity(_) => QuotaDenial::UnknownActivity,
            QuotaError::Store(_) => QuotaDenial::StoreUnavailable,
        }
    }
}

/// Machine-readable reason attached to a denied [`QuotaCheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDenial {
    NoActiveSubscription,
    SubscriptionExpired,
    LimitExceeded,
    UnknownActivity,
    StoreUnavailable,
}

/// Answer returned to callers of the check operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<QuotaDenial>,
}

impl QuotaCheck {
    fn allowed(activity: Activity, used: i32, limit: i32) -> Self {
        Self {
            allowed: true,
            message: format!("Allowed ({used}/{limit} {}s used)", activity.label()),
            denial: None,
        }
    }

    fn denied(err: &QuotaError) -> Self {
        Self {
            allowed: false,
            message: err.to_string(),
            denial: Some(err.denial()),
        }
    }
}

pub type Clock = Arc<dyn Fn() -> Date + Send + Sync>;

/// Resolves a hospital's subscription, gates billable activity against the
/// package limits and records usage.
///
/// Counter writes go through single-statement store updates: concurrent
/// increments are never lost, and [`QuotaManager::try_consume`] can never push
/// a counter past its limit. The separate [`QuotaManager::check_allowed`] /
/// [`QuotaManager::record_usage`] pair stays best-effort.
#[derive(Clone)]
pub struct QuotaManager {
    store: Arc<dyn SubscriptionRepository>,
    clock: Clock,
}

impl QuotaManager {
    pub fn new(store: Arc<dyn SubscriptionRepository>) -> Self {
        Self {
            store,
            clock: Arc::new(|| OffsetDateTime::now_utc().date()),
        }
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> Date + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn today(&self) -> Date {
        (self.clock)()
    }

    /// Latest active subscription that has not yet ended, re-read on every call.
    pub async fn resolve_active_subscription(&self, tenant_id: i64) -> Option<Subscription> {
        match self.current_subscription(tenant_id).await {
            Ok(subscription) => Some(subscription),
            Err(QuotaError::Store(err)) => {
                error!(?err, %tenant_id, "failed to load hospital subscription");
                None
            }
            Err(_) => None,
        }
    }

    pub async fn check_allowed(&self, tenant_id: i64, activity: &str) -> QuotaCheck {
        match self.evaluate(tenant_id, activity).await {
            Ok((activity, used, limit)) => QuotaCheck::allowed(activity, used, limit),
            Err(err) => {
                self.log_denial(tenant_id, activity, &err);
                QuotaCheck::denied(&err)
            }
        }
    }

    /// Adds one unit of `activity` to the active subscription without
    /// checking the limit. Returns false when nothing was recorded.
    pub async fn record_usage(&self, tenant_id: i64, activity: &str) -> bool {
        let Some(kind) = Activity::from_name(activity) else {
            warn!(%tenant_id, activity, "refusing to record usage for unknown activity");
            return false;
        };

        let subscription = match self.current_subscription(tenant_id).await {
            Ok(subscription) => subscription,
            Err(err) => {
                self.log_denial(tenant_id, activity, &err);
                return false;
            }
        };

        match self.store.increment_usage(subscription.id, kind).await {
            Ok(Some(used)) => {
                debug!(%tenant_id, subscription_id = subscription.id, activity, used, "usage recorded");
                true
            }
            Ok(None) => {
                warn!(%tenant_id, subscription_id = subscription.id, "subscription vanished before usage was recorded");
                false
            }
            Err(err) => {
                error!(?err, %tenant_id, subscription_id = subscription.id, "failed to increment usage");
                false
            }
        }
    }

    /// Checks the limit and records one unit in a single store update.
    pub async fn try_consume(&self, tenant_id: i64, activity: &str) -> QuotaCheck {
        match self.consume(tenant_id, activity).await {
            Ok((activity, used, limit)) => QuotaCheck::allowed(activity, used, limit),
            Err(err) => {
                self.log_denial(tenant_id, activity, &err);
                QuotaCheck::denied(&err)
            }
        }
    }

    pub async fn create_subscription(
        &self,
        tenant_id: i64,
        package_type: &str,
        billing_period: &str,
        payment_reference: &str,
    ) -> Result<Subscription, QuotaError> {
        let resolution = PackageTier::resolve(package_type);
        if resolution.fell_back {
            warn!(
                %tenant_id,
                package_type,
                "unknown package type; falling back to the basic tier"
            );
        }

        let period = BillingPeriod::from_name(billing_period).unwrap_or_else(|| {
            warn!(
                %tenant_id,
                billing_period,
                "unknown billing period; billing as yearly"
            );
            BillingPeriod::Yearly
        });

        let start_date = self.today();
        let new_subscription = NewSubscription {
            tenant_id,
            package_type: resolution.tier,
            billing_period: period,
            start_date,
            end_date: period.end_date(start_date),
            limits: resolution.tier.limits(),
            payment_reference: payment_reference.to_string(),
        };

        match self.store.insert_subscription(&new_subscription).await {
            Ok(subscription) => {
                info!(
                    %tenant_id,
                    subscription_id = subscription.id,
                    package_type = subscription.package_type.as_str(),
                    billing_period = subscription.billing_period.as_str(),
                    end_date = %subscription.end_date,
                    "subscription created"
                );
                Ok(subscription)
            }
            Err(err) => {
                error!(?err, %tenant_id, "failed to create subscription");
                Err(QuotaError::Store(err))
            }
        }
    }

    async fn current_subscription(&self, tenant_id: i64) -> Result<Subscription, QuotaError> {
        let subscription = self
            .store
            .find_active_subscription(tenant_id)
            .await?
            .ok_or(QuotaError::NoActiveSubscription)?;

        if subscription.is_expired_on(self.today()) {
            return Err(QuotaError::SubscriptionExpired);
        }

        Ok(subscription)
    }

    async fn evaluate(
        &self,
        tenant_id: i64,
        activity: &str,
    ) -> Result<(Activity, i32, i32), QuotaError> {
        let subscription = self.current_subscription(tenant_id).await?;
        let kind = Activity::from_name(activity)
            .ok_or_else(|| QuotaError::UnknownActivity(activity.to_string()))?;

        let used = subscription.usage.get(kind);
        let limit = subscription.limits.get(kind);
        if used >= limit {
            return Err(QuotaError::LimitExceeded {
                activity: kind,
                limit,
            });
        }

        Ok((kind, used, limit))
    }

    async fn consume(
        &self,
        tenant_id: i64,
        activity: &str,
    ) -> Result<(Activity, i32, i32), QuotaError> {
        let subscription = self.current_subscription(tenant_id).await?;
        let kind = Activity::from_name(activity)
            .ok_or_else(|| QuotaError::UnknownActivity(activity.to_string()))?;

        let update = self.store.try_increment_usage(subscription.id, kind).await?;
        if !update.applied {
            return Err(QuotaError::LimitExceeded {
                activity: kind,
                limit: update.limit,
            });
        }

        Ok((kind, update.used, update.limit))
    }

    fn log_denial(&self, tenant_id: i64, activity: &str, err: &QuotaError) {
        match err {
            QuotaError::Store(db_err) => {
                error!(?db_err, %tenant_id, activity, "quota store request failed")
            }
            QuotaError::UnknownActivity(_) => {
                warn!(%tenant_id, activity, "quota requested for unknown activity")
            }
            other => debug!(%tenant_id, activity, reason = %other, "quota denied"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_subscription_repository::MockSubscriptionRepository;
    use crate::models::subscription::{ActivityCounters, SubscriptionStatus};
    use time::macros::{date, datetime};
    use time::Duration;

    const TODAY: Date = date!(2025 - 03 - 10);
    const HOSPITAL: i64 = 11;

    fn manager(repo: &MockSubscriptionRepository) -> QuotaManager {
        QuotaManager::new(Arc::new(repo.clone())).with_clock(|| TODAY)
    }

    fn subscription(end_date: Date, usage: ActivityCounters) -> Subscription {
        Subscription {
            id: 0,
            tenant_id: HOSPITAL,
            package_type: PackageTier::Standard,
            billing_period: BillingPeriod::Monthly,
            start_date: end_date - Duration::days(30),
            end_date,
            status: SubscriptionStatus::Active,
            limits: ActivityCounters {
                appointments: 100,
                operations: 10,
                pharma_appointments: 50,
            },
            usage,
            payment_reference: Some("pay_seed".to_string()),
            created_at: datetime!(2025-02-08 0:00 UTC),
        }
    }

    #[tokio::test]
    async fn denies_every_activity_without_subscription() {
        let repo = MockSubscriptionRepository::default();
        let quota = manager(&repo);

        for activity in ["appointment", "operation", "pharma_appointment"] {
            let check = quota.check_allowed(HOSPITAL, activity).await;
            assert!(!check.allowed);
            assert_eq!(
                check.message,
                "No active subscription found. Please subscribe to a package."
            );
        }
        assert!(quota.resolve_active_subscription(HOSPITAL).await.is_none());
    }

    #[tokio::test]
    async fn denies_expired_subscription_regardless_of_counters() {
        let repo = MockSubscriptionRepository::default();
        repo.seed(subscription(TODAY - Duration::days(1), ActivityCounters::default()));
        let quota = manager(&repo);

        let check = quota.check_allowed(HOSPITAL, "appointment").await;
        assert!(!check.allowed);
        assert_eq!(
            check.message,
            "Subscription has expired. Please renew your subscription."
        );
        assert!(quota.resolve_active_subscription(HOSPITAL).await.is_none());
        assert!(!quota.record_usage(HOSPITAL, "appointment").await);
    }

    #[tokio::test]
    async fn subscription_ending_today_is_still_active() {
        let repo = MockSubscriptionRepository::default();
        let seeded = repo.seed(subscription(TODAY, ActivityCounters::default()));
        let quota = manager(&repo);

        let resolved = quota.resolve_active_subscription(HOSPITAL).await.unwrap();
        assert_eq!(resolved.id, seeded.id);
        assert!(quota.check_allowed(HOSPITAL, "operation").await.allowed);
        // every call goes back to the store
        assert_eq!(*repo.reads.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn compares_usage_against_limit() {
        let repo = MockSubscriptionRepository::default();
        let seeded = repo.seed(subscription(
            TODAY + Duration::days(5),
            ActivityCounters {
                appointments: 99,
                ..Default::default()
            },
        ));
        let quota = manager(&repo);

        let check = quota.check_allowed(HOSPITAL, "appointment").await;
        assert!(check.allowed);
        assert!(check.message.contains("99/100"));
        assert_eq!(check.message, "Allowed (99/100 appointments used)");

        assert!(quota.record_usage(HOSPITAL, "appointment").await);
        assert_eq!(repo.get(seeded.id).unwrap().usage.appointments, 100);

        let check = quota.check_allowed(HOSPITAL, "appointment").await;
        assert!(!check.allowed);
        assert_eq!(
            check.message,
            "Monthly appointment limit (100) reached. Please upgrade your package."
        );
    }

    #[tokio::test]
    async fn prefers_the_longest_running_active_subscription() {
        let repo = MockSubscriptionRepository::default();
        repo.seed(subscription(
            TODAY + Duration::days(3),
            ActivityCounters {
                operations: 10,
                ..Default::default()
            },
        ));
        let longer = repo.seed(subscription(TODAY + Duration::days(300), ActivityCounters::default()));
        let mut cancelled = subscription(TODAY + Duration::days(900), ActivityCounters::default());
        cancelled.status = SubscriptionStatus::Cancelled;
        repo.seed(cancelled);

        let quota = manager(&repo);
        let resolved = quota.resolve_active_subscription(HOSPITAL).await.unwrap();
        assert_eq!(resolved.id, longer.id);
        assert!(quota.check_allowed(HOSPITAL, "operation").await.allowed);
    }

    #[tokio::test]
    async fn creates_premium_yearly_subscription() {
        let repo = MockSubscriptionRepository::default();
        let quota = manager(&repo);

        let sub = quota
            .create_subscription(HOSPITAL, "premium", "yearly", "pay_123")
            .await
            .unwrap();

        assert_eq!(sub.package_type, PackageTier::Premium);
        assert_eq!(sub.billing_period, BillingPeriod::Yearly);
        assert_eq!(sub.limits.get(Activity::Appointment), 1000);
        assert_eq!(sub.limits.get(Activity::Operation), 100);
        assert_eq!(sub.limits.get(Activity::PharmaAppointment), 500);
        assert_eq!(sub.start_date, TODAY);
        assert_eq!(sub.end_date, sub.start_date + Duration::days(365));
        assert_eq!(sub.usage, ActivityCounters::default());
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.payment_reference.as_deref(), Some("pay_123"));
    }

    #[tokio::test]
    async fn unknown_package_falls_back_to_basic_limits() {
        let repo = MockSubscriptionRepository::default();
        let quota = manager(&repo);

        let sub = quota
            .create_subscription(HOSPITAL, "unknown_tier", "monthly", "pay_x")
            .await
            .unwrap();

        assert_eq!(sub.package_type, PackageTier::Basic);
        assert_eq!(
            sub.limits,
            ActivityCounters {
                appointments: 50,
                operations: 5,
                pharma_appointments: 25,
            }
        );
        assert_eq!(sub.end_date, TODAY + Duration::days(30));
    }

    #[tokio::test]
    async fn records_usage_sequentially() {
        let repo = MockSubscriptionRepository::default();
        let quota = manager(&repo);
        let sub = quota
            .create_subscription(HOSPITAL, "basic", "monthly", "pay_1")
            .await
            .unwrap();

        assert!(quota.record_usage(HOSPITAL, "operation").await);
        assert_eq!(repo.get(sub.id).unwrap().usage.operations, 1);
        assert!(quota.record_usage(HOSPITAL, "operation").await);
        assert_eq!(repo.get(sub.id).unwrap().usage.operations, 2);
        assert_eq!(repo.get(sub.id).unwrap().usage.appointments, 0);
    }

    #[tokio::test]
    async fn record_usage_without_subscription_returns_false() {
        let repo = MockSubscriptionRepository::default();
        let quota = manager(&repo);

        assert!(!quota.record_usage(HOSPITAL, "operation").await);
        assert_eq!(*repo.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn record_usage_rejects_unknown_activity() {
        let repo = MockSubscriptionRepository::default();
        let quota = manager(&repo);
        quota
            .create_subscription(HOSPITAL, "basic", "monthly", "pay_1")
            .await
            .unwrap();

        assert!(!quota.record_usage(HOSPITAL, "surgery").await);
    }

    #[tokio::test]
    async fn reports_unknown_activity() {
        let repo = MockSubscriptionRepository::default();
        repo.seed(subscription(TODAY + Duration::days(10), ActivityCounters::default()));
        let quota = manager(&repo);

        let check = quota.check_allowed(HOSPITAL, "unsupported_activity").await;
        assert_eq!(
            check,
            QuotaCheck {
                allowed: false,
                message: "Unknown entity type".to_string(),
                denial: Some(QuotaDenial::UnknownActivity),
            }
        );
    }

    #[tokio::test]
    async fn store_failures_are_reported_not_raised() {
        let repo = MockSubscriptionRepository::failing();
        let quota = manager(&repo);

        let check = quota.check_allowed(HOSPITAL, "appointment").await;
        assert!(!check.allowed);
        assert!(check.message.starts_with("Unable to verify the subscription"));
        assert_eq!(check.denial, Some(QuotaDenial::StoreUnavailable));
        assert!(!quota.record_usage(HOSPITAL, "appointment").await);
        assert!(quota.resolve_active_subscription(HOSPITAL).await.is_none());

        let err = quota
            .create_subscription(HOSPITAL, "basic", "monthly", "pay_1")
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::Store(_)));
    }

    #[tokio::test]
    async fn try_consume_stops_at_the_limit() {
        let repo = MockSubscriptionRepository::default();
        let seeded = repo.seed(subscription(
            TODAY + Duration::days(10),
            ActivityCounters {
                operations: 9,
                ..Default::default()
            },
        ));
        let quota = manager(&repo);

        let first = quota.try_consume(HOSPITAL, "operation").await;
        assert!(first.allowed);
        assert_eq!(first.message, "Allowed (10/10 operations used)");

        let second = quota.try_consume(HOSPITAL, "operation").await;
        assert!(!second.allowed);
        assert_eq!(
            second.message,
            "Monthly operation limit (10) reached. Please upgrade your package."
        );
        assert_eq!(second.denial, Some(QuotaDenial::LimitExceeded));
        assert_eq!(repo.get(seeded.id).unwrap().usage.operations, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_never_exceed_the_limit() {
        let repo = MockSubscriptionRepository::default();
        let seeded = repo.seed(subscription(
            TODAY + Duration::days(10),
            ActivityCounters {
                pharma_appointments: 45,
                ..Default::default()
            },
        ));
        let quota = manager(&repo);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let quota = quota.clone();
                tokio::spawn(async move {
                    quota.try_consume(HOSPITAL, "pharma_appointment").await
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
        assert_eq!(repo.get(seeded.id).unwrap().usage.pharma_appointments, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_record_usage_loses_no_increments() {
        let repo = MockSubscriptionRepository::default();
        let seeded = repo.seed(subscription(TODAY + Duration::days(10), ActivityCounters::default()));
        let quota = manager(&repo);

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let quota = quota.clone();
                tokio::spawn(async move { quota.record_usage(HOSPITAL, "appointment").await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(repo.get(seeded.id).unwrap().usage.appointments, 25);
    }
}
