use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};

use crate::models::package::{BillingPeriod, PackageTier};

/// Billable unit types metered per subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Appointment,
    Operation,
    PharmaAppointment,
}

impl Activity {
    pub const ALL: [Activity; 3] = [
        Activity::Appointment,
        Activity::Operation,
        Activity::PharmaAppointment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Appointment => "appointment",
            Activity::Operation => "operation",
            Activity::PharmaAppointment => "pharma_appointment",
        }
    }

    pub fn from_name(raw: &str) -> Option<Self> {
        match raw {
            "appointment" => Some(Self::Appointment),
            "operation" => Some(Self::Operation),
            "pharma_appointment" => Some(Self::PharmaAppointment),
            _ => None,
        }
    }

    /// Human label used in quota messages, e.g. "pharma appointment".
    pub fn label(&self) -> &'static str {
        match self {
            Activity::Appointment => "appointment",
            Activity::Operation => "operation",
            Activity::PharmaAppointment => "pharma appointment",
        }
    }

    pub(crate) fn limit_column(&self) -> &'static str {
        match self {
            Activity::Appointment => "rate_limit_appointments",
            Activity::Operation => "rate_limit_operations",
            Activity::PharmaAppointment => "rate_limit_pharma_appointments",
        }
    }

    pub(crate) fn usage_column(&self) -> &'static str {
        match self {
            Activity::Appointment => "current_month_appointments",
            Activity::Operation => "current_month_operations",
            Activity::PharmaAppointment => "current_month_pharma_appointments",
        }
    }
}

/// One integer per activity; used for both limits and usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActivityCounters {
    pub appointments: i32,
    pub operations: i32,
    pub pharma_appointments: i32,
}

impl ActivityCounters {
    pub fn get(&self, activity: Activity) -> i32 {
        match activity {
            Activity::Appointment => self.appointments,
            Activity::Operation => self.operations,
            Activity::PharmaAppointment => self.pharma_appointments,
        }
    }

    pub fn get_mut(&mut self, activity: Activity) -> &mut i32 {
        match activity {
            Activity::Appointment => &mut self.appointments,
            Activity::Operation => &mut self.operations,
            Activity::PharmaAppointment => &mut self.pharma_appointments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_name(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub tenant_id: i64,
    pub package_type: PackageTier,
    pub billing_period: BillingPeriod,
    pub start_date: Date,
    pub end_date: Date,
    pub status: SubscriptionStatus,
    pub limits: ActivityCounters,
    pub usage: ActivityCounters,
    pub payment_reference: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Subscription {
    pub fn is_expired_on(&self, today: Date) -> bool {
        self.end_date < today
    }
}

/// Values written when a subscription is created on payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub tenant_id: i64,
    pub package_type: PackageTier,
    pub billing_period: BillingPeriod,
    pub start_date: Date,
    pub end_date: Date,
    pub limits: ActivityCounters,
    pub payment_reference: String,
}

/// Raw `hospital_subscriptions` row. Counter columns are nullable on rows
/// written before the quota columns existed.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: i64,
    pub hospital_id: i64,
    pub package_type: String,
    pub billing_period: String,
    pub rate_limit_appointments: Option<i32>,
    pub rate_limit_operations: Option<i32>,
    pub rate_limit_pharma_appointments: Option<i32>,
    pub current_month_appointments: Option<i32>,
    pub current_month_operations: Option<i32>,
    pub current_month_pharma_appointments: Option<i32>,
    pub subscription_start_date: Date,
    pub subscription_end_date: Date,
    pub status: String,
    pub payment_order_id: Option<String>,
    pub created_at: OffsetDateTime,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        let package_type = PackageTier::resolve(&row.package_type).tier;
        // A missing limit comes from the row's own tier, never from a fixed fallback.
        let tier_limits = package_type.limits();

        Subscription {
            id: row.id,
            tenant_id: row.hospital_id,
            package_type,
            billing_period: BillingPeriod::from_name(&row.billing_period)
                .unwrap_or(BillingPeriod::Yearly),
            start_date: row.subscription_start_date,
            end_date: row.subscription_end_date,
            status: SubscriptionStatus::from_name(&row.status)
                .unwrap_or(SubscriptionStatus::Expired),
            limits: ActivityCounters {
                appointments: row
                    .rate_limit_appointments
                    .unwrap_or(tier_limits.appointments),
                operations: row.rate_limit_operations.unwrap_or(tier_limits.operations),
                pharma_appointments: row
                    .rate_limit_pharma_appointments
                    .unwrap_or(tier_limits.pharma_appointments),
            },
            usage: ActivityCounters {
                appointments: row.current_month_appointments.unwrap_or(0),
                operations: row.current_month_operations.unwrap_or(0),
                pharma_appointments: row.current_month_pharma_appointments.unwrap_or(0),
            },
            payment_reference: row.payment_order_id,
            created_at: row.created_at,
        }
    }
}
