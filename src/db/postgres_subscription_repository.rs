use async_trait::async_trait;
use sqlx::PgPool;

use super::subscription_repository::{SubscriptionRepository, UsageUpdate};
use crate::models::package::PackageTier;
use crate::models::subscription::{
    Activity, NewSubscription, Subscription, SubscriptionRow, SubscriptionStatus,
};

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, hospital_id, package_type, billing_period,
    rate_limit_appointments, rate_limit_operations, rate_limit_pharma_appointments,
    current_month_appointments, current_month_operations, current_month_pharma_appointments,
    subscription_start_date, subscription_end_date, status, payment_order_id, created_at
"#;

pub struct PostgresSubscriptionRepository {
    pub pool: PgPool,
}

/// SQL expression for the effective limit of `activity`: the stored column,
/// or the tier table value for the row's package when the column is NULL.
fn effective_limit_sql(activity: Activity) -> String {
    let standard = PackageTier::Standard.limits().get(activity);
    let premium = PackageTier::Premium.limits().get(activity);
    let basic = PackageTier::Basic.limits().get(activity);
    format!(
        "COALESCE({column}, CASE lower(package_type) WHEN 'standard' THEN {standard} WHEN 'premium' THEN {premium} ELSE {basic} END)",
        column = activity.limit_column(),
    )
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_active_subscription(
        &self,
        tenant_id: i64,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM hospital_subscriptions
            WHERE hospital_id = $1 AND status = $2
            ORDER BY subscription_end_date DESC, id DESC
            LIMIT 1
            "#
        );

        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(tenant_id)
            .bind(SubscriptionStatus::Active.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Subscription::from))
    }

    async fn insert_subscription(
        &self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO hospital_subscriptions (
                hospital_id, package_type, billing_period,
                rate_limit_appointments, rate_limit_operations, rate_limit_pharma_appointments,
                current_month_appointments, current_month_operations, current_month_pharma_appointments,
                subscription_start_date, subscription_end_date, status, payment_order_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, 0, 0, $7, $8, $9, $10, now())
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(subscription.tenant_id)
            .bind(subscription.package_type.as_str())
            .bind(subscription.billing_period.as_str())
            .bind(subscription.limits.appointments)
            .bind(subscription.limits.operations)
            .bind(subscription.limits.pharma_appointments)
            .bind(subscription.start_date)
            .bind(subscription.end_date)
            .bind(SubscriptionStatus::Active.as_str())
            .bind(&subscription.payment_reference)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn increment_usage(
        &self,
        subscription_id: i64,
        activity: Activity,
    ) -> Result<Option<i32>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE hospital_subscriptions
            SET {usage} = COALESCE({usage}, 0) + 1
            WHERE id = $1
            RETURNING {usage}
            "#,
            usage = activity.usage_column(),
        );

        sqlx::query_scalar::<_, i32>(&sql)
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn try_increment_usage(
        &self,
        subscription_id: i64,
        activity: Activity,
    ) -> Result<UsageUpdate, sqlx::Error> {
        let usage = activity.usage_column();
        let limit = effective_limit_sql(activity);

        // The row is re-checked under its lock, so concurrent callers cannot
        // push the counter past the limit.
        let update_sql = format!(
            r#"
            UPDATE hospital_subscriptions
            SET {usage} = COALESCE({usage}, 0) + 1
            WHERE id = $1 AND COALESCE({usage}, 0) < {limit}
            RETURNING {usage}, {limit}
            "#
        );

        if let Some((used, limit)) = sqlx::query_as::<_, (i32, i32)>(&update_sql)
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(UsageUpdate {
                applied: true,
                used,
                limit,
            });
        }

        let current_sql = format!(
            r#"
            SELECT COALESCE({usage}, 0), {limit}
            FROM hospital_subscriptions
            WHERE id = $1
            "#
        );

        let (used, limit) = sqlx::query_as::<_, (i32, i32)>(&current_sql)
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        Ok(UsageUpdate {
            applied: false,
            used,
            limit,
        })
    }
}
