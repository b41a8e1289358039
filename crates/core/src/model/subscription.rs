use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::ViewerId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubscriptionError {
    #[error("unknown subscription status: {0}")]
    UnknownStatus(String),

    #[error("unknown subscription plan: {0}")]
    UnknownPlan(String),
}

/// Billing state as reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "past_due" => Ok(Self::PastDue),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(SubscriptionError::UnknownStatus(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPlan {
    Monthly,
    Yearly,
}

impl SubscriptionPlan {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionPlan::Monthly => "monthly",
            SubscriptionPlan::Yearly => "yearly",
        }
    }
}

impl FromStr for SubscriptionPlan {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(SubscriptionError::UnknownPlan(other.to_owned())),
        }
    }
}

/// A viewer's subscription, read-only from this crate's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub viewer_id: ViewerId,
    pub status: SubscriptionStatus,
    pub plan: SubscriptionPlan,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
}

impl Subscription {
    /// Whether this subscription grants access to gated content at `now`.
    ///
    /// A subscription scheduled to cancel no longer entitles, even before the
    /// period ends.
    #[must_use]
    pub fn is_entitled(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && !self.cancel_at_period_end
            && self.current_period_end > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn active() -> Subscription {
        Subscription {
            viewer_id: ViewerId::random(),
            status: SubscriptionStatus::Active,
            plan: SubscriptionPlan::Monthly,
            current_period_end: fixed_now() + Duration::days(30),
            cancel_at_period_end: false,
        }
    }

    #[test]
    fn active_subscription_entitles() {
        assert!(active().is_entitled(fixed_now()));
    }

    #[test]
    fn pending_cancellation_does_not_entitle() {
        let sub = Subscription {
            cancel_at_period_end: true,
            ..active()
        };
        assert!(!sub.is_entitled(fixed_now()));
    }

    #[test]
    fn expired_period_does_not_entitle() {
        let sub = active();
        assert!(!sub.is_entitled(fixed_now() + Duration::days(31)));
    }

    #[test]
    fn past_due_does_not_entitle() {
        let sub = Subscription {
            status: SubscriptionStatus::PastDue,
            ..active()
        };
        assert!(!sub.is_entitled(fixed_now()));
    }

    #[test]
    fn status_parses_both_spellings_of_canceled() {
        assert_eq!(
            "cancelled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Canceled
        );
        assert!("paused".parse::<SubscriptionStatus>().is_err());
    }
}
