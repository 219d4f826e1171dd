//! Subscription tiers and the daily usage quota gate.
//!
//! The tier itself comes from the user record (relational store, external to
//! this layer); only the limits table and the gate live here. Callers check
//! the gate before the metered language-model call and increment the usage
//! counter only after the call succeeds.

use serde::{Deserialize, Serialize};

use crate::{error::GuardError, stores::UsageSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Pro,
}

/// Daily message allowance for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyAllowance {
    Limited(u32),
    Unlimited,
}

#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    pub daily_messages: DailyAllowance,
    /// Output budget passed through to the language-model call.
    pub max_output_tokens: u32,
}

impl PlanTier {
    pub fn limits(self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits {
                daily_messages: DailyAllowance::Limited(1),
                max_output_tokens: 400,
            },
            PlanTier::Starter => PlanLimits {
                daily_messages: DailyAllowance::Limited(10),
                max_output_tokens: 700,
            },
            PlanTier::Pro => PlanLimits {
                daily_messages: DailyAllowance::Unlimited,
                max_output_tokens: 1200,
            },
        }
    }
}

/// Reject with `QuotaExceeded` once today's count has reached the allowance.
/// Unlimited plans skip the check entirely.
pub fn check_daily_quota(limits: &PlanLimits, usage: &UsageSnapshot) -> Result<(), GuardError> {
    match limits.daily_messages {
        DailyAllowance::Unlimited => Ok(()),
        DailyAllowance::Limited(allowance) => {
            if usage.message_count >= i64::from(allowance) {
                Err(GuardError::QuotaExceeded {
                    used: usage.message_count,
                    date_key: usage.date_key.clone(),
                })
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(message_count: i64) -> UsageSnapshot {
        UsageSnapshot {
            message_count,
            date_key: "20260807".to_string(),
            last_message_at: None,
        }
    }

    #[test]
    fn free_tier_allows_one_message_per_day() {
        let limits = PlanTier::Free.limits();

        assert!(check_daily_quota(&limits, &usage(0)).is_ok());
        assert!(check_daily_quota(&limits, &usage(1)).is_err());
    }

    #[test]
    fn starter_tier_denies_at_allowance_boundary() {
        let limits = PlanTier::Starter.limits();

        assert!(check_daily_quota(&limits, &usage(9)).is_ok());
        assert!(matches!(
            check_daily_quota(&limits, &usage(10)),
            Err(GuardError::QuotaExceeded { used: 10, .. })
        ));
    }

    #[test]
    fn pro_tier_is_never_quota_limited() {
        let limits = PlanTier::Pro.limits();

        assert!(check_daily_quota(&limits, &usage(100_000)).is_ok());
    }

    #[test]
    fn tier_deserializes_from_plan_column_values() {
        assert_eq!(
            serde_json::from_str::<PlanTier>(r#""starter""#).unwrap(),
            PlanTier::Starter
        );
    }

    #[test]
    fn output_budgets_follow_tier() {
        assert_eq!(PlanTier::Free.limits().max_output_tokens, 400);
        assert_eq!(PlanTier::Pro.limits().max_output_tokens, 1200);
    }
}
