//! # Validation Module
//!
//! Input validation for billing operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Admin UI / webhook parser                                    │
//! │  └── Type validation (deserialization)                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Amount, currency, URL, identifier checks                          │
//! │  └── Fails synchronously, nothing persisted                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK / NOT NULL constraints                                      │
//! │  └── UNIQUE (idempotency key, receipt per payment, log key)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{BillingProfile, Currency, FiscalIdentity};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_ACCOUNT_ID_LEN: usize = 64;
const MAX_URL_LEN: usize = 2048;
const MAX_REASON_LEN: usize = 500;
const MAX_KEY_LEN: usize = 255;
const MAX_IDENTITY_LEN: usize = 200;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates an account identifier.
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most 64 characters
pub fn validate_account_id(account_id: &str) -> ValidationResult<()> {
    if account_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "account_id".to_string(),
        });
    }
    if account_id.len() > MAX_ACCOUNT_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "account_id".to_string(),
            max: MAX_ACCOUNT_ID_LEN,
        });
    }
    Ok(())
}

/// Validates a provider idempotency key.
pub fn validate_idempotency_key(key: &str) -> ValidationResult<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "idempotency_key".to_string(),
        });
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "idempotency_key".to_string(),
            max: MAX_KEY_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Payment Validators
// =============================================================================

/// Validates a payment amount.
///
/// ## Errors
/// [`CoreError::InvalidAmount`] when the amount is zero or negative.
pub fn validate_payment_amount(amount_cents: i64) -> CoreResult<()> {
    if amount_cents <= 0 {
        return Err(CoreError::InvalidAmount { amount_cents });
    }
    Ok(())
}

/// Validates that a payment is in the currency the account bills in.
///
/// A staged change does not count here: a transfer submitted while a switch
/// is pending still pays in `profile.currency`.
pub fn validate_payment_currency(profile: &BillingProfile, currency: Currency) -> CoreResult<()> {
    if currency != profile.currency {
        return Err(CoreError::CurrencyMismatch {
            expected: profile.currency,
            actual: currency,
        });
    }
    Ok(())
}

/// Validates the currency of a payment collected by the automated provider.
///
/// The provider may already collect in the staged currency; confirming such
/// a payment is what applies the change.
pub fn validate_settlement_currency(
    profile: &BillingProfile,
    currency: Currency,
) -> CoreResult<()> {
    if !profile.settles_in(currency) {
        return Err(CoreError::CurrencyMismatch {
            expected: profile.currency,
            actual: currency,
        });
    }
    Ok(())
}

/// Validates a transfer proof URL.
///
/// ## Rules
/// - Must not be empty
/// - Must be an `http://` or `https://` URL
/// - At most 2048 characters
///
/// ## Example
/// ```rust
/// use movo_core::validation::validate_proof_url;
///
/// assert!(validate_proof_url("https://files.example.com/proof/123.jpg").is_ok());
/// assert!(validate_proof_url("ftp://files.example.com/proof").is_err());
/// ```
pub fn validate_proof_url(url: &str) -> ValidationResult<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::Required {
            field: "proof_url".to_string(),
        });
    }
    if url.len() > MAX_URL_LEN {
        return Err(ValidationError::TooLong {
            field: "proof_url".to_string(),
            max: MAX_URL_LEN,
        });
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(host_and_path) if !host_and_path.is_empty() => Ok(()),
        _ => Err(ValidationError::InvalidFormat {
            field: "proof_url".to_string(),
            reason: "must be an http(s) URL".to_string(),
        }),
    }
}

/// Normalizes an optional rejection reason.
///
/// Blank reasons become `None`; the rest are trimmed and length-checked.
pub fn validate_rejection_reason(reason: &str) -> ValidationResult<Option<&str>> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Ok(None);
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LEN,
        });
    }
    Ok(Some(reason))
}

/// Validates a receipt identity.
///
/// ## Rules
/// - Legal name, tax ID and address are all required
/// - Each at most 200 characters
/// - Tax ID holds digits and dashes only (RNC `131-12345-6`, cédula `001-1234567-8`)
pub fn validate_fiscal_identity(identity: &FiscalIdentity) -> ValidationResult<()> {
    for (field, value) in [
        ("legal_name", &identity.legal_name),
        ("tax_id", &identity.tax_id),
        ("address", &identity.address),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: field.to_string(),
            });
        }
        if value.len() > MAX_IDENTITY_LEN {
            return Err(ValidationError::TooLong {
                field: field.to_string(),
                max: MAX_IDENTITY_LEN,
            });
        }
    }

    let tax_id = identity.tax_id.trim();
    if !tax_id.chars().all(|c| c.is_ascii_digit() || c == '-')
        || !tax_id.chars().any(|c| c.is_ascii_digit())
    {
        return Err(ValidationError::InvalidFormat {
            field: "tax_id".to_string(),
            reason: "only digits and dashes".to_string(),
        });
    }
    Ok(())
}

/// Validates a contact email (shape only).
pub fn validate_email(email: &str) -> ValidationResult<()> {
    let invalid = || ValidationError::InvalidFormat {
        field: "email".to_string(),
        reason: format!("'{}' is not an email address", email),
    };

    let (local, domain) = email.trim().split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
