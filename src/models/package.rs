use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::models::subscription::ActivityCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageTier {
    Basic,
    Standard,
    Premium,
}

/// Outcome of mapping a caller-supplied package name onto the tier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierResolution {
    pub tier: PackageTier,
    /// Set when the name was not recognised and the basic tier was substituted.
    pub fell_back: bool,
}

impl PackageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageTier::Basic => "basic",
            PackageTier::Standard => "standard",
            PackageTier::Premium => "premium",
        }
    }

    pub fn from_name(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "standard" => Some(Self::Standard),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    /// Unknown names map to the basic tier instead of failing.
    pub fn resolve(raw: &str) -> TierResolution {
        match Self::from_name(raw) {
            Some(tier) => TierResolution {
                tier,
                fell_back: false,
            },
            None => TierResolution {
                tier: Self::Basic,
                fell_back: true,
            },
        }
    }

    pub fn limits(self) -> ActivityCounters {
        match self {
            PackageTier::Basic => ActivityCounters {
                appointments: 50,
                operations: 5,
                pharma_appointments: 25,
            },
            PackageTier::Standard => ActivityCounters {
                appointments: 200,
                operations: 20,
                pharma_appointments: 100,
            },
            PackageTier::Premium => ActivityCounters {
                appointments: 1000,
                operations: 100,
                pharma_appointments: 500,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
        }
    }

    pub fn from_name(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "monthly" => Some(Self::Monthly),
            "yearly" | "annual" | "annually" => Some(Self::Yearly),
            _ => None,
        }
    }

    pub fn length_days(self) -> i64 {
        match self {
            BillingPeriod::Monthly => 30,
            BillingPeriod::Yearly => 365,
        }
    }

    /// Last day of a cycle starting on `start`. Saturates at `Date::MAX`.
    pub fn end_date(self, start: Date) -> Date {
        start
            .checked_add(Duration::days(self.length_days()))
            .unwrap_or(Date::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::{BillingPeriod, PackageTier};
    use time::macros::date;

    #[test]
    fn normalizes_package_names() {
        assert_eq!(PackageTier::from_name("Premium"), Some(PackageTier::Premium));
        assert_eq!(PackageTier::from_name(" standard "), Some(PackageTier::Standard));
        assert_eq!(PackageTier::from_name("gold"), None);
    }

    #[test]
    fn unknown_package_falls_back_to_basic() {
        let resolution = PackageTier::resolve("unknown_tier");
        assert_eq!(resolution.tier, PackageTier::Basic);
        assert!(resolution.fell_back);

        let resolution = PackageTier::resolve("premium");
        assert_eq!(resolution.tier, PackageTier::Premium);
        assert!(!resolution.fell_back);
    }

    #[test]
    fn tier_table_matches_published_limits() {
        let basic = PackageTier::Basic.limits();
        assert_eq!(
            (basic.appointments, basic.operations, basic.pharma_appointments),
            (50, 5, 25)
        );
        let standard = PackageTier::Standard.limits();
        assert_eq!(
            (
                standard.appointments,
                standard.operations,
                standard.pharma_appointments
            ),
            (200, 20, 100)
        );
        let premium = PackageTier::Premium.limits();
        assert_eq!(
            (
                premium.appointments,
                premium.operations,
                premium.pharma_appointments
            ),
            (1000, 100, 500)
        );
    }

    #[test]
    fn billing_period_offsets() {
        let start = date!(2024 - 01 - 31);
        assert_eq!(BillingPeriod::Monthly.end_date(start), date!(2024 - 03 - 01));
        assert_eq!(BillingPeriod::Yearly.end_date(start), date!(2025 - 01 - 30));
        assert_eq!(BillingPeriod::from_name("ANNUAL"), Some(BillingPeriod::Yearly));
        assert_eq!(BillingPeriod::from_name("weekly"), None);
    }
}
