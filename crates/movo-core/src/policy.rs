//! # Billing Policy
//!
//! Tunable constants of the subscription clock and notification schedule.
//!
//! The policy is plain data: `movo-billing` loads it from the `[policy]`
//! table of the billing config file, and tests build it directly.
//!
//! ```toml
//! [policy]
//! trial_days = 15
//! period_length_days = 30
//! grace_days = 3
//! trial_thresholds = [7, 3, 2, 1, 0]
//! due_thresholds = [3, 2, 1, 0]
//! grace_thresholds = [2, 1, 0]
//! price_usd_cents = 2000
//! price_dop_cents = 130000
//! notification_retention_days = 90
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::Currency;

/// Billing constants shared by the clock, the scheduler and the templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPolicy {
    /// Length of the free trial.
    #[serde(default = "default_trial_days")]
    pub trial_days: u32,

    /// Length of one paid period.
    #[serde(default = "default_period_length_days")]
    pub period_length_days: u32,

    /// Days of continued access after a paid period ends.
    #[serde(default = "default_grace_days")]
    pub grace_days: u32,

    /// Trial days-remaining values that trigger a reminder.
    #[serde(default = "default_trial_thresholds")]
    pub trial_thresholds: Vec<u32>,

    /// Active-period days-remaining values that trigger a payment reminder.
    #[serde(default = "default_due_thresholds")]
    pub due_thresholds: Vec<u32>,

    /// Grace days-remaining values that trigger a block warning.
    #[serde(default = "default_grace_thresholds")]
    pub grace_thresholds: Vec<u32>,

    #[serde(default = "default_price_usd_cents")]
    pub price_usd_cents: i64,

    #[serde(default = "default_price_dop_cents")]
    pub price_dop_cents: i64,

    /// How long a notification log entry is kept past its boundary.
    #[serde(default = "default_retention_days")]
    pub notification_retention_days: u32,
}

fn default_trial_days() -> u32 {
    15
}

fn default_period_length_days() -> u32 {
    30
}

fn default_grace_days() -> u32 {
    3
}

fn default_trial_thresholds() -> Vec<u32> {
    vec![7, 3, 2, 1, 0]
}

fn default_due_thresholds() -> Vec<u32> {
    vec![3, 2, 1, 0]
}

fn default_grace_thresholds() -> Vec<u32> {
    vec![2, 1, 0]
}

fn default_price_usd_cents() -> i64 {
    2000
}

fn default_price_dop_cents() -> i64 {
    130000
}

fn default_retention_days() -> u32 {
    90
}

impl Default for BillingPolicy {
    fn default() -> Self {
        BillingPolicy {
            trial_days: default_trial_days(),
            period_length_days: default_period_length_days(),
            grace_days: default_grace_days(),
            trial_thresholds: default_trial_thresholds(),
            due_thresholds: default_due_thresholds(),
            grace_thresholds: default_grace_thresholds(),
            price_usd_cents: default_price_usd_cents(),
            price_dop_cents: default_price_dop_cents(),
            notification_retention_days: default_retention_days(),
        }
    }
}

impl BillingPolicy {
    pub fn trial_length(&self) -> Duration {
        Duration::days(i64::from(self.trial_days))
    }

    pub fn period_length(&self) -> Duration {
        Duration::days(i64::from(self.period_length_days))
    }

    pub fn grace_length(&self) -> Duration {
        Duration::days(i64::from(self.grace_days))
    }

    pub fn notification_retention(&self) -> Duration {
        Duration::days(i64::from(self.notification_retention_days))
    }

    /// Subscription price for one period in the given currency.
    pub fn price(&self, currency: Currency) -> Money {
        match currency {
            Currency::Usd => Money::from_cents(self.price_usd_cents),
            Currency::Dop => Money::from_cents(self.price_dop_cents),
        }
    }

    /// Checks the policy for values the clock cannot work with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.trial_days == 0 {
            return Err(ValidationError::MustBePositive {
                field: "trial_days".to_string(),
            });
        }
        if self.period_length_days == 0 {
            return Err(ValidationError::MustBePositive {
                field: "period_length_days".to_string(),
            });
        }
        // Grace must end before a renewed period would.
        if self.grace_days >= self.period_length_days {
            return Err(ValidationError::OutOfRange {
                field: "grace_days".to_string(),
                min: 0,
                max: i64::from(self.period_length_days) - 1,
            });
        }
        if self.price_usd_cents <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "price_usd_cents".to_string(),
            });
        }
        if self.price_dop_cents <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "price_dop_cents".to_string(),
            });
        }

        let checks = [
            ("trial_thresholds", &self.trial_thresholds, self.trial_days),
            ("due_thresholds", &self.due_thresholds, self.period_length_days),
            ("grace_thresholds", &self.grace_thresholds, self.grace_days),
        ];
        for (field, thresholds, max) in checks {
            if let Some(bad) = thresholds.iter().find(|d| **d > max) {
                return Err(ValidationError::InvalidFormat {
                    field: field.to_string(),
                    reason: format!("threshold {} exceeds phase length {}", bad, max),
                });
            }
        }

        Ok(())
    }
}
