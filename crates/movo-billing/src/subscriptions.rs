//! # Subscription Service
//!
//! Creates billing profiles and applies the clock's administrative
//! transitions (cancel, staged currency changes) with version-checked
//! writes.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  read profile (vN) ──► pure transition (movo-core) ──► changed?        │
//! │                                                         │  no → done   │
//! │                                                         ▼              │
//! │                                    update WHERE version = N            │
//! │                                         │  conflict → re-read, retry   │
//! │                                         ▼                              │
//! │                                    profile vN+1                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::context::BillingContext;
use crate::error::{BillingError, BillingResult};
use crate::retry::with_conflict_retry;
use movo_core::clock::{self, ClockEvent, Transition};
use movo_core::validation::{validate_account_id, validate_email, validate_fiscal_identity};
use movo_core::{
    BillingProfile, BillingState, Contact, CoreResult, Currency, FiscalIdentity, Provider,
};

/// A persisted profile and what happened to it.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub profile: BillingProfile,
    pub events: Vec<ClockEvent>,
}

/// Subscription lifecycle operations.
#[derive(Clone)]
pub struct SubscriptionService {
    ctx: BillingContext,
}

impl SubscriptionService {
    pub fn new(ctx: BillingContext) -> Self {
        SubscriptionService { ctx }
    }

    /// Starts the trial for a new account.
    ///
    /// Creating a subscription for an account that already has one returns
    /// the existing profile unchanged.
    pub async fn create_subscription(
        &self,
        account_id: &str,
        contact: Contact,
        currency: Option<Currency>,
    ) -> BillingResult<BillingProfile> {
        validate_account_id(account_id)?;
        if let Some(email) = contact.email.as_deref() {
            validate_email(email)?;
        }

        if let Some(existing) = self.ctx.store.get_profile(account_id).await? {
            debug!(account_id, "Billing profile already exists");
            return Ok(existing);
        }

        let now = self.ctx.time.now();
        let profile = clock::start_trial_in(
            account_id,
            contact,
            currency.unwrap_or(Currency::Dop),
            now,
            &self.ctx.policy,
        );

        match self.ctx.store.insert_profile(&profile).await {
            Ok(()) => {}
            Err(movo_db::DbError::UniqueViolation { .. }) => {
                return self.get_profile(account_id).await;
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            account_id,
            currency = %profile.currency,
            trial_ends_at = ?profile.trial_ends_at,
            "Trial started"
        );
        Ok(profile)
    }

    /// Gets the stored profile.
    pub async fn get_profile(&self, account_id: &str) -> BillingResult<BillingProfile> {
        self.ctx
            .store
            .get_profile(account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("billing_profile", account_id))
    }

    /// Evaluates the access state as of now, without writing.
    pub async fn get_state(&self, account_id: &str) -> BillingResult<BillingState> {
        let profile = self.get_profile(account_id).await?;
        let now = self.ctx.time.now();
        Ok(BillingState::evaluate(&profile, now, &self.ctx.policy)?)
    }

    /// Returns true if the account may not use the application right now.
    pub async fn is_account_blocked(&self, account_id: &str) -> BillingResult<bool> {
        Ok(!self.get_state(account_id).await?.can_access_app)
    }

    /// Brings the stored status up to date as of `now`.
    pub async fn refresh_at(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<ProfileUpdate> {
        let policy = self.ctx.policy.clone();
        self.update_with_retry(account_id, "refresh", move |profile, _| {
            clock::recompute(profile, now, &policy)
        })
        .await
    }

    /// Cancels the subscription. Terminal.
    pub async fn cancel(&self, account_id: &str) -> BillingResult<BillingProfile> {
        let update = self
            .update_with_retry(account_id, "cancel", |profile, now| {
                Ok(clock::cancel(profile, now))
            })
            .await?;

        if update.events.contains(&ClockEvent::Canceled) {
            info!(account_id, "Subscription canceled");
        }
        Ok(update.profile)
    }

    /// Stages a currency (and optionally provider) switch for the next renewal.
    pub async fn request_currency_change(
        &self,
        account_id: &str,
        currency: Currency,
        provider: Option<Provider>,
    ) -> BillingResult<BillingProfile> {
        let update = self
            .update_with_retry(account_id, "request_currency_change", move |profile, now| {
                clock::stage_change(profile, currency, provider, now)
            })
            .await?;

        info!(
            account_id,
            pending_currency = ?update.profile.pending_currency,
            "Currency change staged"
        );
        Ok(update.profile)
    }

    /// Drops a staged currency change.
    pub async fn cancel_currency_change(&self, account_id: &str) -> BillingResult<BillingProfile> {
        let update = self
            .update_with_retry(account_id, "cancel_currency_change", |profile, now| {
                Ok(clock::clear_staged_change(profile, now))
            })
            .await?;
        Ok(update.profile)
    }

    /// Sets the legal name, tax ID and address printed on future receipts.
    pub async fn update_fiscal_identity(
        &self,
        account_id: &str,
        identity: FiscalIdentity,
    ) -> BillingResult<BillingProfile> {
        validate_fiscal_identity(&identity)?;
        let identity = FiscalIdentity {
            legal_name: identity.legal_name.trim().to_string(),
            tax_id: identity.tax_id.trim().to_string(),
            address: identity.address.trim().to_string(),
        };

        let update = self
            .update_with_retry(account_id, "update_fiscal_identity", |profile, now| {
                Ok(clock::set_fiscal_identity(profile, &identity, now))
            })
            .await?;

        if update.events.contains(&ClockEvent::IdentityUpdated) {
            info!(account_id, tax_id = %identity.tax_id, "Fiscal identity updated");
        }
        Ok(update.profile)
    }

    /// Read, transform, version-checked write; re-run on conflict.
    pub(crate) async fn update_with_retry<F>(
        &self,
        account_id: &str,
        operation: &'static str,
        transform: F,
    ) -> BillingResult<ProfileUpdate>
    where
        F: Fn(&BillingProfile, DateTime<Utc>) -> CoreResult<Transition>,
    {
        let transform = &transform;
        with_conflict_retry(self.ctx.retry, operation, || async move {
            let profile = self.get_profile(account_id).await?;
            let transition = transform(&profile, self.ctx.time.now())?;

            if !transition.changed() {
                return Ok(ProfileUpdate {
                    profile,
                    events: Vec::new(),
                });
            }

            let stored = self
                .ctx
                .store
                .update_profile(&transition.profile, profile.version)
                .await?;

            debug!(
                account_id,
                operation,
                events = ?transition.events,
                version = stored.version,
                "Profile transition persisted"
            );

            Ok(ProfileUpdate {
                profile: stored,
                events: transition.events,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, harness};
    use movo_core::BillingStatus;

    #[tokio::test]
    async fn test_create_subscription_starts_trial() {
        let h = harness(at(2024, 1, 1)).await;
        let profile = h
            .services
            .subscriptions
            .create_subscription("acct-1", Contact::new("owner@example.com", "Owner"), None)
            .await
            .unwrap();

        assert_eq!(profile.status, BillingStatus::Trialing);
        assert_eq!(profile.currency, Currency::Dop);
        assert_eq!(profile.provider, Provider::Manual);
        assert_eq!(profile.trial_ends_at, Some(at(2024, 1, 16)));

        // Second create is a no-op.
        h.clock.advance(chrono::Duration::days(3));
        let again = h
            .services
            .subscriptions
            .create_subscription("acct-1", Contact::default(), Some(Currency::Usd))
            .await
            .unwrap();
        assert_eq!(again, profile);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_email() {
        let h = harness(at(2024, 1, 1)).await;
        let err = h
            .services
            .subscriptions
            .create_subscription("acct-1", Contact::new("not-an-email", "Owner"), None)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_state_blocks_after_trial() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        h.clock.set(at(2024, 1, 15));
        let state = h.services.subscriptions.get_state("acct-1").await.unwrap();
        assert_eq!(state.status, BillingStatus::Trialing);
        assert_eq!(state.days_remaining, Some(1));
        assert!(state.needs_payment);

        h.clock.set(at(2024, 1, 17));
        assert!(h.services.subscriptions.is_account_blocked("acct-1").await.unwrap());

        // Evaluation alone does not persist anything.
        let stored = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(stored.status, BillingStatus::Trialing);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        let first = h
            .services
            .subscriptions
            .refresh_at("acct-1", at(2024, 1, 17))
            .await
            .unwrap();
        assert_eq!(first.profile.status, BillingStatus::Blocked);
        assert_eq!(first.events, vec![ClockEvent::TrialExpired]);
        assert_eq!(first.profile.version, 1);

        let second = h
            .services
            .subscriptions
            .refresh_at("acct-1", at(2024, 1, 17))
            .await
            .unwrap();
        assert!(second.events.is_empty());
        assert_eq!(second.profile.version, 1);
    }

    #[tokio::test]
    async fn test_update_fiscal_identity() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        let identity = FiscalIdentity {
            legal_name: " Colmado Rosa SRL ".to_string(),
            tax_id: "131-12345-6".to_string(),
            address: "Calle El Conde 12, Santo Domingo".to_string(),
        };
        let profile = h
            .services
            .subscriptions
            .update_fiscal_identity("acct-1", identity.clone())
            .await
            .unwrap();
        assert_eq!(profile.legal_name.as_deref(), Some("Colmado Rosa SRL"));
        assert_eq!(profile.version, 1);

        let again = h
            .services
            .subscriptions
            .update_fiscal_identity("acct-1", identity.clone())
            .await
            .unwrap();
        assert_eq!(again.version, 1);

        let err = h
            .services
            .subscriptions
            .update_fiscal_identity(
                "acct-1",
                FiscalIdentity {
                    tax_id: String::new(),
                    ..identity
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        let canceled = h.services.subscriptions.cancel("acct-1").await.unwrap();
        assert_eq!(canceled.status, BillingStatus::Canceled);
        assert_eq!(canceled.canceled_at, Some(at(2024, 1, 1)));

        let again = h.services.subscriptions.cancel("acct-1").await.unwrap();
        assert_eq!(again.version, canceled.version);

        let err = h
            .services
            .subscriptions
            .request_currency_change("acct-1", Currency::Usd, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::SubscriptionCanceled { .. }));
    }

    #[tokio::test]
    async fn test_currency_change_is_staged() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        let staged = h
            .services
            .subscriptions
            .request_currency_change("acct-1", Currency::Usd, None)
            .await
            .unwrap();
        assert_eq!(staged.currency, Currency::Dop);
        assert_eq!(staged.pending_currency, Some(Currency::Usd));
        assert_eq!(staged.pending_provider, Some(Provider::Automated));

        let cleared = h
            .services
            .subscriptions
            .cancel_currency_change("acct-1")
            .await
            .unwrap();
        assert!(!cleared.has_pending_change());
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let h = harness(at(2024, 1, 1)).await;
        let err = h.services.subscriptions.cancel("ghost").await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound { .. }));
    }
}
