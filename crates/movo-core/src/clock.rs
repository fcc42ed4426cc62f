//! # Subscription Clock
//!
//! Date-driven status logic. Every function here is pure: it takes a stored
//! profile plus an explicit instant and returns the profile as it should be
//! persisted, together with the events that got it there.
//!
//! ## Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Time-driven (recompute)                           │
//! │                                                                         │
//! │  TRIALING ── now >= trial_ends_at ──────────────────────► BLOCKED      │
//! │                                                           (no grace)    │
//! │  ACTIVE ──── now >= current_period_end ─► GRACE                         │
//! │                 grace_ends_at = current_period_end + grace_days         │
//! │  GRACE ───── now >= grace_ends_at ──────────────────────► BLOCKED      │
//! │                                                                         │
//! │  BLOCKED, CANCELED: never change with time                              │
//! │                                                                         │
//! │                       Payment-driven (apply_payment)                    │
//! │                                                                         │
//! │  TRIALING ─► ACTIVE, period = [trial_ends_at, +period)                  │
//! │  ACTIVE ───► ACTIVE, period end += period                               │
//! │  GRACE ────► ACTIVE, period end = old period end + period               │
//! │  BLOCKED ──► ACTIVE, period = [confirmed_at, +period)                   │
//! │  CANCELED ─► error                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Boundary Convention
//! `now == boundary` counts as past the boundary. A profile whose trial ends
//! at `2024-01-16T00:00Z` is BLOCKED at exactly that instant.
//!
//! ## Idempotency
//! `recompute(recompute(p, t).profile, t)` never produces events. Time never
//! moves a profile backwards: feeding an earlier `now` cannot turn BLOCKED
//! into TRIALING or GRACE into ACTIVE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::policy::BillingPolicy;
use crate::schedule;
use crate::types::{BillingProfile, BillingStatus, Contact, Currency, FiscalIdentity, Provider};
use crate::TRIAL_PAYMENT_NUDGE_DAYS;

// =============================================================================
// Transition
// =============================================================================

/// Something the clock did to a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockEvent {
    TrialExpired,
    PeriodExpired,
    GraceExpired,
    PaymentApplied,
    PendingChangeApplied,
    ChangeStaged,
    ChangeCleared,
    Canceled,
    IdentityUpdated,
}

/// The interval a confirmed payment paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaidPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Result of running the clock over a profile.
///
/// `profile` is the full record to persist; when `events` is empty it is
/// identical to the input and nothing needs to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub profile: BillingProfile,
    pub events: Vec<ClockEvent>,
    pub paid_period: Option<PaidPeriod>,
}

impl Transition {
    fn unchanged(profile: BillingProfile) -> Self {
        Transition {
            profile,
            events: Vec::new(),
            paid_period: None,
        }
    }

    /// Returns true if the profile must be persisted.
    pub fn changed(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn has(&self, event: ClockEvent) -> bool {
        self.events.contains(&event)
    }
}

// =============================================================================
// Creation
// =============================================================================

/// Creates the initial TRIALING profile for a new account.
///
/// New accounts bill in DOP through manual transfer; use
/// [`start_trial_in`] to pick the currency explicitly.
pub fn start_trial(
    account_id: impl Into<String>,
    contact: Contact,
    created_at: DateTime<Utc>,
    policy: &BillingPolicy,
) -> BillingProfile {
    start_trial_in(account_id, contact, Currency::Dop, created_at, policy)
}

/// Creates the initial TRIALING profile billed in `currency`.
pub fn start_trial_in(
    account_id: impl Into<String>,
    contact: Contact,
    currency: Currency,
    created_at: DateTime<Utc>,
    policy: &BillingPolicy,
) -> BillingProfile {
    BillingProfile {
        account_id: account_id.into(),
        status: BillingStatus::Trialing,
        currency,
        provider: currency.default_provider(),
        contact_email: contact.email,
        display_name: contact.display_name,
        legal_name: None,
        tax_id: None,
        billing_address: None,
        trial_started_at: created_at,
        trial_ends_at: Some(created_at + policy.trial_length()),
        current_period_start: None,
        current_period_end: None,
        grace_ends_at: None,
        blocked_at: None,
        canceled_at: None,
        pending_currency: None,
        pending_provider: None,
        created_at,
        updated_at: created_at,
        version: 0,
    }
}

// =============================================================================
// Recompute
// =============================================================================

fn require(
    profile: &BillingProfile,
    value: Option<DateTime<Utc>>,
    field: &'static str,
) -> CoreResult<DateTime<Utc>> {
    value.ok_or_else(|| CoreError::MissingTimestamp {
        account_id: profile.account_id.clone(),
        status: profile.status,
        field,
    })
}

/// Computes the status an account should have at `now`.
///
/// Cascades through several boundaries in one call: an ACTIVE profile
/// that was not looked at for weeks comes out BLOCKED, with the grace
/// window it passed through recorded.
///
/// ## Errors
/// [`CoreError::MissingTimestamp`] when the governing boundary of the
/// current status is not set.
pub fn recompute(
    profile: &BillingProfile,
    now: DateTime<Utc>,
    policy: &BillingPolicy,
) -> CoreResult<Transition> {
    let mut next = profile.clone();
    let mut events = Vec::new();

    loop {
        match next.status {
            BillingStatus::Trialing => {
                let trial_end = require(&next, next.trial_ends_at, "trial_ends_at")?;
                if now < trial_end {
                    break;
                }
                next.status = BillingStatus::Blocked;
                next.blocked_at = Some(trial_end);
                events.push(ClockEvent::TrialExpired);
            }
            BillingStatus::Active => {
                let period_end = require(&next, next.current_period_end, "current_period_end")?;
                if now < period_end {
                    break;
                }
                next.status = BillingStatus::Grace;
                next.grace_ends_at = Some(period_end + policy.grace_length());
                events.push(ClockEvent::PeriodExpired);
            }
            BillingStatus::Grace => {
                let grace_end = require(&next, next.grace_ends_at, "grace_ends_at")?;
                if now < grace_end {
                    break;
                }
                next.status = BillingStatus::Blocked;
                next.blocked_at = Some(grace_end);
                events.push(ClockEvent::GraceExpired);
            }
            BillingStatus::Blocked | BillingStatus::Canceled => break,
        }
    }

    if events.is_empty() {
        return Ok(Transition::unchanged(next));
    }

    next.updated_at = now;
    Ok(Transition {
        profile: next,
        events,
        paid_period: None,
    })
}

// =============================================================================
// Payments
// =============================================================================

/// Applies a confirmed payment to the profile.
///
/// The profile is first brought current at `confirmed_at`, so a payment
/// confirmed at or after `grace_ends_at` is treated as a BLOCKED
/// reactivation and starts a fresh period at `confirmed_at`.
///
/// A staged currency/provider change takes effect here, but only when the
/// payment was made in the staged currency. A payment in the billing
/// currency extends the period and leaves the change staged.
///
/// ## Errors
/// - [`CoreError::SubscriptionCanceled`] on a canceled profile
/// - [`CoreError::CurrencyMismatch`] when `paid_in` is neither the billing
///   nor the staged currency
///
/// ## Example
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use movo_core::{clock, BillingPolicy, BillingStatus, Contact, Currency};
///
/// let policy = BillingPolicy::default();
/// let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let mut profile = clock::start_trial("acct-1", Contact::default(), created, &policy);
/// profile.status = BillingStatus::Grace;
/// profile.current_period_end = Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap());
/// profile.grace_ends_at = Some(Utc.with_ymd_and_hms(2024, 1, 13, 0, 0, 0).unwrap());
///
/// let paid = Utc.with_ymd_and_hms(2024, 1, 12, 0, 0, 0).unwrap();
/// let t = clock::apply_payment(&profile, Currency::Dop, paid, &policy).unwrap();
/// assert_eq!(t.profile.status, BillingStatus::Active);
/// assert_eq!(
///     t.profile.current_period_end,
///     Some(Utc.with_ymd_and_hms(2024, 2, 9, 0, 0, 0).unwrap())
/// );
/// ```
pub fn apply_payment(
    profile: &BillingProfile,
    paid_in: Currency,
    confirmed_at: DateTime<Utc>,
    policy: &BillingPolicy,
) -> CoreResult<Transition> {
    if profile.status != BillingStatus::Canceled && !profile.settles_in(paid_in) {
        return Err(CoreError::CurrencyMismatch {
            expected: profile.currency,
            actual: paid_in,
        });
    }

    let current = recompute(profile, confirmed_at, policy)?;
    let mut events = current.events;
    let mut next = current.profile;
    let period = policy.period_length();

    let (start, candidate_end) = match next.status {
        BillingStatus::Canceled => {
            return Err(CoreError::SubscriptionCanceled {
                account_id: next.account_id,
            })
        }
        BillingStatus::Trialing => {
            let trial_end = require(&next, next.trial_ends_at, "trial_ends_at")?;
            (trial_end, trial_end + period)
        }
        BillingStatus::Active | BillingStatus::Grace => {
            let period_end = require(&next, next.current_period_end, "current_period_end")?;
            (period_end, period_end + period)
        }
        BillingStatus::Blocked => (confirmed_at, confirmed_at + period),
    };

    // The paid end never moves backwards.
    let end = match next.current_period_end {
        Some(previous) if previous > candidate_end => previous,
        _ => candidate_end,
    };

    if next.status != BillingStatus::Active || next.current_period_start.is_none() {
        next.current_period_start = Some(start);
    }
    next.status = BillingStatus::Active;
    next.current_period_end = Some(end);
    next.grace_ends_at = None;
    next.blocked_at = None;
    events.push(ClockEvent::PaymentApplied);

    if next.has_pending_change() && next.renewal_currency() == paid_in {
        let currency = next.pending_currency.take().unwrap_or(next.currency);
        let provider = next
            .pending_provider
            .take()
            .unwrap_or_else(|| currency.default_provider());
        next.currency = currency;
        next.provider = provider;
        events.push(ClockEvent::PendingChangeApplied);
    }

    next.updated_at = confirmed_at;

    Ok(Transition {
        profile: next,
        events,
        paid_period: Some(PaidPeriod { start, end }),
    })
}

// =============================================================================
// Administrative Transitions
// =============================================================================

/// Cancels the subscription. Canceling twice is a no-op.
pub fn cancel(profile: &BillingProfile, at: DateTime<Utc>) -> Transition {
    if profile.status == BillingStatus::Canceled {
        return Transition::unchanged(profile.clone());
    }

    let mut next = profile.clone();
    next.status = BillingStatus::Canceled;
    next.canceled_at = Some(at);
    next.updated_at = at;

    Transition {
        profile: next,
        events: vec![ClockEvent::Canceled],
        paid_period: None,
    }
}

/// Stages a currency/provider change for the next period extension.
///
/// Staging the profile's current setup drops any staged change instead.
pub fn stage_change(
    profile: &BillingProfile,
    currency: Currency,
    provider: Option<Provider>,
    at: DateTime<Utc>,
) -> CoreResult<Transition> {
    if profile.status == BillingStatus::Canceled {
        return Err(CoreError::SubscriptionCanceled {
            account_id: profile.account_id.clone(),
        });
    }

    let provider = provider.unwrap_or_else(|| currency.default_provider());
    if currency == profile.currency && provider == profile.provider {
        return Ok(clear_staged_change(profile, at));
    }

    if profile.pending_currency == Some(currency) && profile.pending_provider == Some(provider) {
        return Ok(Transition::unchanged(profile.clone()));
    }

    let mut next = profile.clone();
    next.pending_currency = Some(currency);
    next.pending_provider = Some(provider);
    next.updated_at = at;

    Ok(Transition {
        profile: next,
        events: vec![ClockEvent::ChangeStaged],
        paid_period: None,
    })
}

/// Drops a staged currency/provider change.
pub fn clear_staged_change(profile: &BillingProfile, at: DateTime<Utc>) -> Transition {
    if !profile.has_pending_change() {
        return Transition::unchanged(profile.clone());
    }

    let mut next = profile.clone();
    next.pending_currency = None;
    next.pending_provider = None;
    next.updated_at = at;

    Transition {
        profile: next,
        events: vec![ClockEvent::ChangeCleared],
        paid_period: None,
    }
}

/// Records who receipts are made out to. Setting the same identity again
/// is a no-op.
///
/// Receipts already issued keep the identity they were issued with.
pub fn set_fiscal_identity(
    profile: &BillingProfile,
    identity: &FiscalIdentity,
    at: DateTime<Utc>,
) -> Transition {
    if profile.fiscal_identity().as_ref() == Some(identity) {
        return Transition::unchanged(profile.clone());
    }

    let mut next = profile.clone();
    next.legal_name = Some(identity.legal_name.clone());
    next.tax_id = Some(identity.tax_id.clone());
    next.billing_address = Some(identity.address.clone());
    next.updated_at = at;

    Transition {
        profile: next,
        events: vec![ClockEvent::IdentityUpdated],
        paid_period: None,
    }
}

// =============================================================================
// Billing State (view)
// =============================================================================

/// What the application shell needs to gate access and draw the banner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BillingState {
    pub account_id: String,
    /// Status as of the evaluation instant, even if not yet persisted.
    pub status: BillingStatus,
    pub can_access_app: bool,
    pub needs_payment: bool,
    /// Calendar days until the governing boundary.
    pub days_remaining: Option<i64>,
    #[ts(as = "Option<String>")]
    pub next_boundary: Option<DateTime<Utc>>,
    pub currency: Currency,
    pub provider: Provider,
    pub price_cents: i64,
    pub pending_currency: Option<Currency>,
}

impl BillingState {
    /// Evaluates the access state of a profile at `now`.
    pub fn evaluate(
        profile: &BillingProfile,
        now: DateTime<Utc>,
        policy: &BillingPolicy,
    ) -> CoreResult<Self> {
        let effective = recompute(profile, now, policy)?.profile;
        let next_boundary = effective.governing_boundary();
        let days_remaining = next_boundary.map(|b| schedule::days_until(b, now));

        let can_access_app = matches!(
            effective.status,
            BillingStatus::Trialing | BillingStatus::Active | BillingStatus::Grace
        );
        let needs_payment = match effective.status {
            BillingStatus::Blocked | BillingStatus::Grace => true,
            BillingStatus::Trialing => {
                days_remaining.is_some_and(|d| d <= TRIAL_PAYMENT_NUDGE_DAYS)
            }
            BillingStatus::Active | BillingStatus::Canceled => false,
        };

        Ok(BillingState {
            account_id: effective.account_id.clone(),
            status: effective.status,
            can_access_app,
            needs_payment,
            days_remaining,
            next_boundary,
            currency: effective.currency,
            provider: effective.provider,
            price_cents: policy.price(effective.renewal_currency()).cents(),
            pending_currency: effective.pending_currency,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
