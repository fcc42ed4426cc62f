//! # Domain Types
//!
//! Billing records shared by every layer of MOVO billing.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Billing Types                                   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ BillingProfile  │   │ BillingPayment  │   │ BillingReceipt  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  account_id     │◄──│  account_id     │◄──│  payment_id     │       │
//! │  │  status         │   │  status         │   │  sequence       │       │
//! │  │  boundaries     │   │  amount_cents   │   │  number         │       │
//! │  │  version        │   │  idempotency_key│   │  paid period    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │           ▲                                                             │
//! │           │            ┌─────────────────────────────┐                  │
//! │           └────────────│ notification_log            │                  │
//! │                        │ (account_id, kind, boundary)│                  │
//! │                        └─────────────────────────────┘                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payments, receipts and notification log rows belong to exactly one account and are
//! never shared across accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Billing Status
// =============================================================================

/// Subscription lifecycle status.
///
/// ```text
///   TRIALING ──(trial ends)──────────────────────────► BLOCKED
///      │                                                  ▲  │
///      │(payment)                                         │  │(payment)
///      ▼                                                  │  ▼
///   ACTIVE ──(period ends)──► GRACE ──(grace ends)────────┘ ACTIVE
///      ▲                        │
///      └────────(payment)───────┘
///
///   any ──(cancel)──► CANCELED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    /// Free trial, no payment yet.
    Trialing,
    /// Paid period in effect.
    Active,
    /// Paid period ended; access continues until the grace window closes.
    Grace,
    /// Access denied until a payment is confirmed.
    Blocked,
    /// Terminal.
    Canceled,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Trialing => "trialing",
            BillingStatus::Active => "active",
            BillingStatus::Grace => "grace",
            BillingStatus::Blocked => "blocked",
            BillingStatus::Canceled => "canceled",
        }
    }

    /// Returns true if no automatic transition can leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BillingStatus::Canceled)
    }
}

impl fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trialing" => Ok(BillingStatus::Trialing),
            "active" => Ok(BillingStatus::Active),
            "grace" => Ok(BillingStatus::Grace),
            "blocked" => Ok(BillingStatus::Blocked),
            "canceled" | "cancelled" => Ok(BillingStatus::Canceled),
            _ => Err(ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: ["trialing", "active", "grace", "blocked", "canceled"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
        }
    }
}

// =============================================================================
// Currency & Provider
// =============================================================================

/// Billing currency. Determines the payment path a new account gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US dollars, charged by the automated provider.
    Usd,
    /// Dominican pesos, paid by bank transfer and verified by an admin.
    Dop,
}

impl Currency {
    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Dop => "DOP",
        }
    }

    /// Display symbol used in emails.
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Usd => "$",
            Currency::Dop => "RD$",
        }
    }

    /// The provider path this currency is paid through.
    pub fn default_provider(&self) -> Provider {
        match self {
            Currency::Usd => Provider::Automated,
            Currency::Dop => Provider::Manual,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "DOP" => Ok(Currency::Dop),
            _ => Err(ValidationError::NotAllowed {
                field: "currency".to_string(),
                allowed: vec!["USD".to_string(), "DOP".to_string()],
            }),
        }
    }
}

/// How payments for an account are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Card processor that pushes webhook events.
    Automated,
    /// Bank transfer with uploaded proof, confirmed by an admin.
    Manual,
    /// No payment path assigned.
    None,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Automated => f.write_str("automated"),
            Provider::Manual => f.write_str("manual"),
            Provider::None => f.write_str("none"),
        }
    }
}

// =============================================================================
// Billing Profile
// =============================================================================

/// Who receives billing emails for an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email: Option<String>,
    pub display_name: String,
}

impl Contact {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Contact {
            email: Some(email.into()),
            display_name: display_name.into(),
        }
    }
}

/// Who the receipts are made out to.
///
/// Copied onto every receipt when it is issued, so later edits do not
/// rewrite receipts already sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FiscalIdentity {
    pub legal_name: String,
    /// RNC or cédula.
    pub tax_id: String,
    pub address: String,
}

/// The per-account subscription record.
///
/// ## Governing Boundary
/// Exactly one timestamp decides the next time-driven transition:
///
/// | status   | boundary             |
/// |----------|----------------------|
/// | trialing | `trial_ends_at`      |
/// | active   | `current_period_end` |
/// | grace    | `grace_ends_at`      |
///
/// `version` increments on every persisted write and guards concurrent
/// updates (compare-and-swap).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BillingProfile {
    pub account_id: String,
    pub status: BillingStatus,
    pub currency: Currency,
    pub provider: Provider,
    pub contact_email: Option<String>,
    pub display_name: String,
    /// Receipt identity; all three are set together.
    pub legal_name: Option<String>,
    pub tax_id: Option<String>,
    pub billing_address: Option<String>,
    #[ts(as = "String")]
    pub trial_started_at: DateTime<Utc>,
    /// Set once at creation, never recomputed.
    #[ts(as = "Option<String>")]
    pub trial_ends_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub current_period_start: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub current_period_end: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub grace_ends_at: Option<DateTime<Utc>>,
    /// Boundary whose crossing blocked the account. Keys the blocked notice.
    #[ts(as = "Option<String>")]
    pub blocked_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub canceled_at: Option<DateTime<Utc>>,
    /// Staged change, applied at the next successful period extension.
    pub pending_currency: Option<Currency>,
    pub pending_provider: Option<Provider>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl BillingProfile {
    /// Currency the next period will be billed in.
    pub fn renewal_currency(&self) -> Currency {
        self.pending_currency.unwrap_or(self.currency)
    }

    /// Provider the next period will be collected through.
    pub fn renewal_provider(&self) -> Provider {
        self.pending_provider
            .unwrap_or_else(|| self.renewal_currency().default_provider())
    }

    pub fn has_pending_change(&self) -> bool {
        self.pending_currency.is_some() || self.pending_provider.is_some()
    }

    pub fn fiscal_identity(&self) -> Option<FiscalIdentity> {
        Some(FiscalIdentity {
            legal_name: self.legal_name.clone()?,
            tax_id: self.tax_id.clone()?,
            address: self.billing_address.clone()?,
        })
    }

    /// Whether a payment in `currency` can pay for the next period: the
    /// billing currency, or the staged one.
    pub fn settles_in(&self, currency: Currency) -> bool {
        currency == self.currency || self.pending_currency == Some(currency)
    }

    /// The timestamp governing the next time-driven transition, if any.
    pub fn governing_boundary(&self) -> Option<DateTime<Utc>> {
        match self.status {
            BillingStatus::Trialing => self.trial_ends_at,
            BillingStatus::Active => self.current_period_end,
            BillingStatus::Grace => self.grace_ends_at,
            BillingStatus::Blocked | BillingStatus::Canceled => None,
        }
    }

    pub fn contact(&self) -> Contact {
        Contact {
            email: self.contact_email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

// =============================================================================
// Payments
// =============================================================================

/// Payment lifecycle. CONFIRMED and REJECTED are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl PaymentStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => f.write_str("pending"),
            PaymentStatus::Confirmed => f.write_str("confirmed"),
            PaymentStatus::Rejected => f.write_str("rejected"),
        }
    }
}

/// A payment toward an account's subscription.
///
/// Manual transfers carry a `proof_url`; automated provider payments carry
/// an `idempotency_key` that maps 1:1 to this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BillingPayment {
    pub id: String,
    pub account_id: String,
    pub amount_cents: i64,
    pub currency: Currency,
    pub provider: Provider,
    pub status: PaymentStatus,
    pub proof_url: Option<String>,
    pub idempotency_key: Option<String>,
    pub reference: Option<String>,
    pub confirmed_by: Option<String>,
    pub rejection_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub rejected_at: Option<DateTime<Utc>>,
    /// The interval this payment paid for (set on confirmation).
    #[ts(as = "Option<String>")]
    pub period_start: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub period_end: Option<DateTime<Utc>>,
}

// =============================================================================
// Receipts
// =============================================================================

/// Internal, non-fiscal receipt for a confirmed payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BillingReceipt {
    pub id: String,
    pub account_id: String,
    pub payment_id: String,
    /// Per-account sequence, starting at 1.
    pub sequence: i64,
    /// Display number, e.g. `REC-00001`.
    pub number: String,
    pub amount_cents: i64,
    pub currency: Currency,
    pub provider: Provider,
    #[ts(as = "Option<String>")]
    pub period_start: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub period_end: Option<DateTime<Utc>>,
    /// Identity snapshot taken at issue; `None` if the account had none.
    pub legal_name: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    #[ts(as = "String")]
    pub issued_at: DateTime<Utc>,
    /// Set once the receipt email was accepted by the mail provider.
    #[ts(as = "Option<String>")]
    pub email_sent_at: Option<DateTime<Utc>>,
}

impl BillingReceipt {
    /// Formats a per-account sequence as a receipt number.
    pub fn format_number(sequence: i64) -> String {
        format!("REC-{:05}", sequence)
    }

    /// Who the receipt was made out to.
    pub fn fiscal_identity(&self) -> Option<FiscalIdentity> {
        Some(FiscalIdentity {
            legal_name: self.legal_name.clone()?,
            tax_id: self.tax_id.clone()?,
            address: self.address.clone()?,
        })
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Which reminder a notification is.
///
/// Stored as a short key (`trial_7`, `due_0`, `grace_2`, `blocked`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum NotificationKind {
    Trial(u32),
    Due(u32),
    Grace(u32),
    Blocked,
}

impl NotificationKind {
    pub fn key(&self) -> String {
        match self {
            NotificationKind::Trial(days) => format!("trial_{}", days),
            NotificationKind::Due(days) => format!("due_{}", days),
            NotificationKind::Grace(days) => format!("grace_{}", days),
            NotificationKind::Blocked => "blocked".to_string(),
        }
    }

    /// Days remaining this reminder announces (`None` for the blocked notice).
    pub fn days(&self) -> Option<u32> {
        match self {
            NotificationKind::Trial(d) | NotificationKind::Due(d) | NotificationKind::Grace(d) => {
                Some(*d)
            }
            NotificationKind::Blocked => None,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for NotificationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "blocked" {
            return Ok(NotificationKind::Blocked);
        }

        let invalid = || ValidationError::InvalidFormat {
            field: "notification kind".to_string(),
            reason: format!("unrecognized key '{}'", s),
        };

        let (phase, days) = s.split_once('_').ok_or_else(invalid)?;
        let days: u32 = days.parse().map_err(|_| invalid())?;

        match phase {
            "trial" => Ok(NotificationKind::Trial(days)),
            "due" => Ok(NotificationKind::Due(days)),
            "grace" => Ok(NotificationKind::Grace(days)),
            _ => Err(invalid()),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.key()
    }
}

impl TryFrom<String> for NotificationKind {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// =============================================================================
// Provider Events
// =============================================================================

/// What a payment-provider webhook reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEventStatus {
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCanceled,
}

/// Inbound event from the automated payment provider.
///
/// Signature verification happens before this type is built; here the
/// event is already trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// Provider-assigned unique id; reusing it is a no-op.
    pub idempotency_key: String,
    pub account_id: String,
    #[serde(default)]
    pub amount_cents: i64,
    pub currency: Currency,
    pub status: ProviderEventStatus,
    /// Provider-side invoice / order reference.
    #[serde(default)]
    pub reference: Option<String>,
}

// =============================================================================
// Unit Tests
// =============================================================================
