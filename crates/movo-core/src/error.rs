//! # Error Types
//!
//! Domain-specific error types for movo-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  movo-core errors (this file)                                          │
//! │  ├── CoreError        - Billing rule violations, data integrity        │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  movo-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  movo-billing errors                                                   │
//! │  └── BillingError     - What callers of the services see               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → BillingError → caller             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::{BillingStatus, Currency, PaymentStatus};

// =============================================================================
// Core Error
// =============================================================================

/// Core billing errors.
///
/// These represent billing rule violations or inconsistent stored data.
/// None of them are retryable: the same input produces the same error.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payment amount is zero or negative.
    #[error("Invalid payment amount: {amount_cents} cents")]
    InvalidAmount { amount_cents: i64 },

    /// Payment currency differs from the currency the account renews in.
    ///
    /// ## When This Occurs
    /// - A DOP account submits a USD transfer
    /// - A provider event arrives in a currency the account was never moved to
    #[error("Currency mismatch: account bills in {expected}, payment is in {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    /// Payment already left PENDING.
    ///
    /// ## When This Occurs
    /// - An admin confirms the same transfer twice
    /// - A rejection races a confirmation
    #[error("Payment {payment_id} is already {status}")]
    AlreadyFinalized {
        payment_id: String,
        status: PaymentStatus,
    },

    /// A receipt was requested for a payment that is not CONFIRMED.
    #[error("Payment {payment_id} is {status}, receipts require a confirmed payment")]
    PaymentNotConfirmed {
        payment_id: String,
        status: PaymentStatus,
    },

    /// The subscription was canceled; it accepts no further transitions.
    #[error("Subscription for account {account_id} is canceled")]
    SubscriptionCanceled { account_id: String },

    /// A stored profile lacks the timestamp that governs its next transition.
    ///
    /// ## When This Occurs
    /// ```text
    /// status = ACTIVE, current_period_end = NULL
    ///      │
    ///      ▼
    /// MissingTimestamp { field: "current_period_end" }
    ///      │
    ///      ▼
    /// Daily cycle logs it and skips the account; other accounts continue
    /// ```
    #[error("Account {account_id} is {status} but has no {field}")]
    MissingTimestamp {
        account_id: String,
        status: BillingStatus,
        field: &'static str,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true if the stored data itself is inconsistent.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, CoreError::MissingTimestamp { .. })
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised synchronously before any state is touched. Never persisted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid URL, invalid email).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
