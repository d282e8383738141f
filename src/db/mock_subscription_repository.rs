use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

use super::subscription_repository::{SubscriptionRepository, UsageUpdate};
use crate::models::subscription::{
    Activity, ActivityCounters, NewSubscription, Subscription, SubscriptionStatus,
};

/// In-memory subscription store. Each call takes the row map lock for its
/// whole duration, which gives the same atomicity as the single-statement
/// updates of the Postgres store.
#[derive(Clone, Default)]
pub struct MockSubscriptionRepository {
    rows: Arc<Mutex<BTreeMap<i64, Subscription>>>,
    next_id: Arc<Mutex<i64>>,
    pub should_fail: bool,
    pub reads: Arc<Mutex<usize>>,
    pub writes: Arc<Mutex<usize>>,
}

impl MockSubscriptionRepository {
    #[allow(dead_code)]
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Stores `subscription` as-is, assigning a fresh id. Returns the stored row.
    #[allow(dead_code)]
    pub fn seed(&self, mut subscription: Subscription) -> Subscription {
        subscription.id = self.allocate_id();
        self.rows
            .lock()
            .unwrap()
            .insert(subscription.id, subscription.clone());
        subscription
    }

    #[allow(dead_code)]
    pub fn get(&self, subscription_id: i64) -> Option<Subscription> {
        self.rows.lock().unwrap().get(&subscription_id).cloned()
    }

    #[allow(dead_code)]
    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn allocate_id(&self) -> i64 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }

    fn check_failure(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for MockSubscriptionRepository {
    async fn find_active_subscription(
        &self,
        tenant_id: i64,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        *self.reads.lock().unwrap() += 1;
        self.check_failure()?;

        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|sub| sub.tenant_id == tenant_id && sub.status == SubscriptionStatus::Active)
            .max_by_key(|sub| (sub.end_date, sub.id))
            .cloned())
    }

    async fn insert_subscription(
        &self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        *self.writes.lock().unwrap() += 1;
        self.check_failure()?;

        let stored = Subscription {
            id: self.allocate_id(),
            tenant_id: subscription.tenant_id,
            package_type: subscription.package_type,
            billing_period: subscription.billing_period,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            status: SubscriptionStatus::Active,
            limits: subscription.limits,
            usage: ActivityCounters::default(),
            payment_reference: Some(subscription.payment_reference.clone()),
            created_at: OffsetDateTime::now_utc(),
        };
        self.rows.lock().unwrap().insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn increment_usage(
        &self,
        subscription_id: i64,
        activity: Activity,
    ) -> Result<Option<i32>, sqlx::Error> {
        *self.writes.lock().unwrap() += 1;
        self.check_failure()?;

        let mut rows = self.rows.lock().unwrap();
        Ok(rows.get_mut(&subscription_id).map(|sub| {
            let used = sub.usage.get_mut(activity);
            *used += 1;
            *used
        }))
    }

    async fn try_increment_usage(
        &self,
        subscription_id: i64,
        activity: Activity,
    ) -> Result<UsageUpdate, sqlx::Error> {
        *self.writes.lock().unwrap() += 1;
        self.check_failure()?;

        let mut rows = self.rows.lock().unwrap();
        let sub = rows
            .get_mut(&subscription_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        let limit = sub.limits.get(activity);
        let used = sub.usage.get_mut(activity);
        if *used < limit {
            *used += 1;
            return Ok(UsageUpdate {
                applied: true,
                used: *used,
                limit,
            });
        }

        Ok(UsageUpdate {
            applied: false,
            used: *used,
            limit,
        })
    }
}
