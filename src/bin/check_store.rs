//! Verifies that DATABASE_URL is reachable and the subscription table is in
//! place. Prints a short summary of subscription rows per status.

use std::env;

use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;

const REQUIRED_COLUMNS: [&str; 15] = [
    "id",
    "hospital_id",
    "package_type",
    "billing_period",
    "rate_limit_appointments",
    "rate_limit_operations",
    "rate_limit_pharma_appointments",
    "current_month_appointments",
    "current_month_operations",
    "current_month_pharma_appointments",
    "subscription_start_date",
    "subscription_end_date",
    "status",
    "payment_order_id",
    "created_at",
];

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL is required to check the store")?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;
    println!("Connected to the database");

    let table = sqlx::query_scalar::<_, Option<String>>(
        "SELECT to_regclass('public.hospital_subscriptions')::text",
    )
    .fetch_one(&pool)
    .await
    .context("failed to look up hospital_subscriptions")?;
    if table.is_none() {
        bail!("table hospital_subscriptions does not exist; apply the migrations first");
    }

    let columns = sqlx::query_scalar::<_, String>(
        r#"
        SELECT column_name::text
        FROM information_schema.columns
        WHERE table_schema = 'public' AND table_name = 'hospital_subscriptions'
        "#,
    )
    .fetch_all(&pool)
    .await
    .context("failed to list hospital_subscriptions columns")?;

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !columns.iter().any(|c| c == required))
        .collect();
    if !missing.is_empty() {
        bail!(
            "hospital_subscriptions is missing columns: {}",
            missing.join(", ")
        );
    }

    let counts = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM hospital_subscriptions GROUP BY status ORDER BY status",
    )
    .fetch_all(&pool)
    .await
    .context("failed to count subscriptions")?;

    if counts.is_empty() {
        println!("hospital_subscriptions is empty");
    }
    for (status, count) in counts {
        println!("{status}: {count}");
    }

    pool.close().await;
    Ok(())
}
