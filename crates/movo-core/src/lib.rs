//! # movo-core: Pure Subscription Billing Logic
//!
//! This crate is the heart of MOVO billing. Every decision about an account's
//! subscription (which status it is in, how far a payment extends it, which
//! reminder is due today) is made here as a pure function of stored facts and
//! an explicit `now`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MOVO Billing Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             billing-worker / admin surface / webhooks           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   movo-billing: reconciliation, receipts, notifier, cycle       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ movo-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   clock   │  │ schedule  │  │ validation│  │   │
//! │  │   │  Profile  │  │ recompute │  │ due_notice│  │   rules   │  │   │
//! │  │   │  Payment  │  │ payments  │  │ day counts│  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO SYSTEM CLOCK • PURE FUNCTIONS      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    movo-db (Database Layer)                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Billing records (profile, payment, receipt, notification log)
//! - [`policy`] - Tunable billing constants (trial, period, grace, thresholds)
//! - [`clock`] - The subscription clock: status recomputation and payment math
//! - [`schedule`] - Notification due decisions
//! - [`money`] - Integer money with currency-aware display
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use movo_core::{clock, BillingPolicy, BillingStatus, Contact};
//!
//! let policy = BillingPolicy::default();
//! let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let profile = clock::start_trial("acct-1", Contact::default(), created, &policy);
//!
//! let later = Utc.with_ymd_and_hms(2024, 1, 17, 0, 0, 0).unwrap();
//! let transition = clock::recompute(&profile, later, &policy).unwrap();
//! assert_eq!(transition.profile.status, BillingStatus::Blocked);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod money;
pub mod policy;
pub mod schedule;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{BillingState, ClockEvent, Transition};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use policy::BillingPolicy;
pub use schedule::DueNotice;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Brand name used in notification templates and receipt headers.
pub const BRAND_NAME: &str = "MOVOPos";

/// Trial days remaining at or below which the banner asks for payment.
pub const TRIAL_PAYMENT_NUDGE_DAYS: i64 = 3;
