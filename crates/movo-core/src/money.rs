//! # Money Module
//!
//! Provides the `Money` type for subscription prices and payment amounts.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every amount is stored in the smallest currency unit (cents).          │
//! │                                                                         │
//! │    USD 20.00     →   2000 cents                                         │
//! │    DOP 1,300.00  → 130000 cents                                         │
//! │                                                                         │
//! │  Floats never enter the billing path; formatting happens only at the   │
//! │  edge (email templates, receipts).                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use movo_core::money::Money;
//! use movo_core::Currency;
//!
//! let price = Money::from_cents(130000);
//! assert_eq!(price.format(Currency::Dop), "RD$1,300.00");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use ts_rs::TS;

use crate::types::Currency;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// Currency is not part of the value; callers pair it with the
/// [`Currency`] of the payment or profile it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns true if the amount is strictly greater than zero.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Whole currency units (truncated toward zero).
    #[inline]
    pub const fn units(&self) -> i64 {
        self.0 / 100
    }

    /// Fractional part in cents, always non-negative.
    #[inline]
    pub const fn fraction(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Formats for display with the currency symbol and thousands separators.
    ///
    /// ```rust
    /// use movo_core::{Currency, Money};
    ///
    /// assert_eq!(Money::from_cents(2000).format(Currency::Usd), "$20.00");
    /// assert_eq!(Money::from_cents(-150).format(Currency::Usd), "-$1.50");
    /// ```
    pub fn format(&self, currency: Currency) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let units = self.units().unsigned_abs().to_string();

        let mut grouped = String::with_capacity(units.len() + units.len() / 3);
        for (i, ch) in units.chars().enumerate() {
            if i > 0 && (units.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        format!(
            "{}{}{}.{:02}",
            sign,
            currency.symbol(),
            grouped,
            self.fraction()
        )
    }
}

impl fmt::Display for Money {
    /// Plain decimal without symbol, e.g. `20.00`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.units().abs(), self.fraction())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Money;

    #[inline]
    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl Sub for Money {
    type Output = Money;

    #[inline]
    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(Money::from_cents(2000).to_string(), "20.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-5).to_string(), "-0.05");
    }

    #[test]
    fn test_currency_format_groups_thousands() {
        assert_eq!(Money::from_cents(130000).format(Currency::Dop), "RD$1,300.00");
        assert_eq!(
            Money::from_cents(123456789).format(Currency::Usd),
            "$1,234,567.89"
        );
        assert_eq!(Money::from_cents(99).format(Currency::Usd), "$0.99");
        assert_eq!(Money::from_cents(100000).format(Currency::Usd), "$1,000.00");
    }

    #[test]
    fn test_positive() {
        assert!(Money::from_cents(1).is_positive());
        assert!(!Money::zero().is_positive());
        assert!(!Money::from_cents(-100).is_positive());
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1500);
        let b = Money::from_cents(500);
        assert_eq!((a + b).cents(), 2000);
        assert_eq!((a - b).cents(), 1000);
    }
}
