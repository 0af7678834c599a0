//! Entitlement data types
//!
//! Defines the per-user entitlement record and the decision shapes returned
//! to the gateway.

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Subscription plan attached to an unlimited grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    #[default]
    None,
    Monthly,
    Yearly,
    Unknown,
}

impl SubscriptionPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPlan::None => "none",
            SubscriptionPlan::Monthly => "monthly",
            SubscriptionPlan::Yearly => "yearly",
            SubscriptionPlan::Unknown => "unknown",
        }
    }

    /// Parse a stored or provider-supplied plan name.
    ///
    /// Anything that is not a known plan becomes `Unknown`; an absent value
    /// is `None`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            None => SubscriptionPlan::None,
            Some(v) if v.is_empty() || v == "none" => SubscriptionPlan::None,
            Some(v) if v == "monthly" => SubscriptionPlan::Monthly,
            Some(v) if v == "yearly" => SubscriptionPlan::Yearly,
            Some(_) => SubscriptionPlan::Unknown,
        }
    }

    /// Plans a user can purchase or be granted manually
    pub fn is_purchasable(&self) -> bool {
        matches!(self, SubscriptionPlan::Monthly | SubscriptionPlan::Yearly)
    }

    /// End of one billing period starting at `from`, in calendar months
    pub fn period_end(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            SubscriptionPlan::Monthly => from.checked_add_months(Months::new(1)),
            SubscriptionPlan::Yearly => from.checked_add_months(Months::new(12)),
            SubscriptionPlan::None | SubscriptionPlan::Unknown => None,
        }
    }
}

/// Durable per-user entitlement state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementRecord {
    /// Remaining free actions for `last_reset_date`
    pub credits: u32,
    pub last_reset_date: NaiveDate,
    pub unlimited: bool,
    pub subscription_plan: SubscriptionPlan,
    pub valid_until: Option<DateTime<Utc>>,
    /// Join key for payment-provider identities
    pub email: Option<String>,
}

impl Default for EntitlementRecord {
    /// A blank record. Its reset date lies in the past, so credit mode resets
    /// it on first use.
    fn default() -> Self {
        Self {
            credits: 0,
            last_reset_date: NaiveDate::default(),
            unlimited: false,
            subscription_plan: SubscriptionPlan::None,
            valid_until: None,
            email: None,
        }
    }
}

impl EntitlementRecord {
    /// Record for a user seen for the first time today
    pub fn fresh(today: NaiveDate, allowance: u32) -> Self {
        Self {
            credits: allowance,
            last_reset_date: today,
            ..Default::default()
        }
    }

    /// Unlimited flag set but the grant has lapsed (or was never bounded)
    pub fn is_stale_unlimited(&self, now: DateTime<Utc>) -> bool {
        self.unlimited && self.valid_until.map_or(true, |until| until < now)
    }

    /// Unlimited mode currently governs decisions for this record
    pub fn has_active_unlimited(&self, now: DateTime<Utc>) -> bool {
        self.unlimited && !self.is_stale_unlimited(now)
    }
}

/// A record together with the user it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntitlement {
    pub user_id: String,
    pub record: EntitlementRecord,
}

/// Remaining credits as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditsRemaining {
    Limited(u32),
    Unlimited,
}

impl Serialize for CreditsRemaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CreditsRemaining::Limited(n) => serializer.serialize_u32(*n),
            CreditsRemaining::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

/// Why a metered action was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Exhausted,
}

/// Outcome of an entitlement check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub credits_remaining: CreditsRemaining,
    pub unlimited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl Decision {
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            credits_remaining: CreditsRemaining::Unlimited,
            unlimited: true,
            reason: None,
        }
    }

    pub fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            credits_remaining: CreditsRemaining::Limited(remaining),
            unlimited: false,
            reason: None,
        }
    }

    pub fn exhausted() -> Self {
        Self {
            allowed: false,
            credits_remaining: CreditsRemaining::Limited(0),
            unlimited: false,
            reason: Some(DenyReason::Exhausted),
        }
    }
}

/// Non-consuming status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementStatus {
    pub credits_remaining: CreditsRemaining,
    pub unlimited: bool,
    pub subscription_plan: SubscriptionPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}
