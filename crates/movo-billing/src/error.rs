//! # Billing Error Types
//!
//! Errors returned by the billing services.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Billing Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Validation     │  │  State Conflict │  │  Integrity              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidAmount  │  │  AlreadyFinal.  │  │  Integrity              │ │
//! │  │  CurrencyMism.  │  │  Conflict       │  │  (abort one account)    │ │
//! │  │  Validation     │  │  (retried)      │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Lookup         │  │  External       │  │  Infrastructure         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  NotFound       │  │  Mail           │  │  Database               │ │
//! │  │  PaymentNotConf │  │  Timeout        │  │  InvalidConfig          │ │
//! │  │  SubscriptionC. │  │  (retry later)  │  │  ConfigLoadFailed       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::mailer::MailError;
use movo_core::{CoreError, Currency, PaymentStatus, ValidationError};
use movo_db::DbError;

/// Result type alias for billing operations.
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors surfaced by the billing services.
#[derive(Debug, Error)]
pub enum BillingError {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Payment amount is zero or negative.
    #[error("Invalid payment amount: {amount_cents} cents")]
    InvalidAmount { amount_cents: i64 },

    /// Payment currency differs from the account's renewal currency.
    #[error("Currency mismatch: account bills in {expected}, payment is in {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    /// Malformed input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // State Conflicts
    // =========================================================================
    /// The payment already left PENDING.
    #[error("Payment {payment_id} is already {status}")]
    AlreadyFinalized {
        payment_id: String,
        status: PaymentStatus,
    },

    /// A concurrent writer kept winning; retries were exhausted.
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    // =========================================================================
    // Lookup
    // =========================================================================
    /// Unknown account, payment or receipt.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Receipt requested for a payment that is not CONFIRMED.
    #[error("Payment {payment_id} is {status}, receipts require a confirmed payment")]
    PaymentNotConfirmed {
        payment_id: String,
        status: PaymentStatus,
    },

    /// The subscription is canceled.
    #[error("Subscription for account {account_id} is canceled")]
    SubscriptionCanceled { account_id: String },

    // =========================================================================
    // Integrity
    // =========================================================================
    /// Stored data is inconsistent (e.g. a status without its boundary).
    #[error("Data integrity violation: {0}")]
    Integrity(String),

    // =========================================================================
    // External Dependencies
    // =========================================================================
    /// Email provider refused or failed.
    #[error("Mail delivery failed: {0}")]
    Mail(#[from] MailError),

    /// An external call did not finish in time.
    #[error("{operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    // =========================================================================
    // Infrastructure
    // =========================================================================
    /// Storage failure.
    #[error("Database error: {0}")]
    Database(DbError),

    /// Invalid billing configuration.
    #[error("Invalid billing configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read or parse the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// The background agent is no longer running.
    #[error("Billing agent channel closed: {0}")]
    AgentStopped(String),
}

impl BillingError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        BillingError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Returns true if the same call may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Conflict(_)
            | BillingError::Mail(_)
            | BillingError::Timeout { .. } => true,
            BillingError::Database(e) => e.is_conflict() || e.is_transient(),
            _ => false,
        }
    }

    /// Returns true for rejected input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidAmount { .. }
                | BillingError::CurrencyMismatch { .. }
                | BillingError::Validation(_)
        )
    }

    /// Returns true if a concurrent writer got there first.
    pub fn is_conflict(&self) -> bool {
        match self {
            BillingError::Conflict(_) | BillingError::AlreadyFinalized { .. } => true,
            BillingError::Database(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// Returns true if stored data is inconsistent.
    pub fn is_integrity(&self) -> bool {
        matches!(self, BillingError::Integrity(_))
    }
}

impl From<CoreError> for BillingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidAmount { amount_cents } => BillingError::InvalidAmount { amount_cents },
            CoreError::CurrencyMismatch { expected, actual } => {
                BillingError::CurrencyMismatch { expected, actual }
            }
            CoreError::AlreadyFinalized { payment_id, status } => {
                BillingError::AlreadyFinalized { payment_id, status }
            }
            CoreError::PaymentNotConfirmed { payment_id, status } => {
                BillingError::PaymentNotConfirmed { payment_id, status }
            }
            CoreError::SubscriptionCanceled { account_id } => {
                BillingError::SubscriptionCanceled { account_id }
            }
            CoreError::Validation(e) => BillingError::Validation(e),
            e @ CoreError::MissingTimestamp { .. } => BillingError::Integrity(e.to_string()),
        }
    }
}

impl From<DbError> for BillingError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => BillingError::NotFound { entity, id },
            other => BillingError::Database(other),
        }
    }
}

impl From<std::io::Error> for BillingError {
    fn from(err: std::io::Error) -> Self {
        BillingError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for BillingError {
    fn from(err: toml::de::Error) -> Self {
        BillingError::ConfigLoadFailed(err.to_string())
    }
}
