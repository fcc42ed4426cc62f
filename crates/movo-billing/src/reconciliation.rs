//! # Payment Reconciliation
//!
//! Moves payments from PENDING to CONFIRMED or REJECTED and extends the
//! paid period on confirmation.
//!
//! ## Payment Paths
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  Manual (DOP bank transfer)                                              │
//! │    submit_manual_payment ──► PENDING ──► admin confirm ──► CONFIRMED     │
//! │                                     └──► admin reject  ──► REJECTED      │
//! │                                                                          │
//! │  Automated (USD card processor)                                          │
//! │    provider event (idempotency key)                                      │
//! │      succeeded ──► PENDING ──► CONFIRMED       (replay → Duplicate)      │
//! │      failed    ──► REJECTED                    (replay → Duplicate)      │
//! │      canceled  ──► subscription CANCELED                                 │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Confirmation
//! The payment row and the profile are written in one transaction; the
//! profile write is version-checked. Losing a race re-reads both and tries
//! again, so a payment confirmed by someone else surfaces as
//! [`BillingError::AlreadyFinalized`] rather than a second extension.
//! The payment's currency is checked again against the profile at that
//! point; a staged change is applied only by a payment in the staged
//! currency.
//! The receipt is issued and emailed after the commit; if either fails the
//! billing cycle backfills the receipt and retries the email.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::BillingContext;
use crate::error::{BillingError, BillingResult};
use crate::receipts::ReceiptService;
use crate::retry::with_conflict_retry;
use crate::subscriptions::SubscriptionService;
use movo_core::clock;
use movo_core::validation::{
    validate_account_id, validate_idempotency_key, validate_payment_amount,
    validate_payment_currency, validate_proof_url, validate_rejection_reason,
    validate_settlement_currency,
};
use movo_core::{
    BillingPayment, BillingProfile, BillingReceipt, BillingStatus, Currency, PaymentStatus,
    ProviderEvent, ProviderEventStatus, Provider, ValidationError,
};
use movo_db::{ConfirmationWrite, DbError};

const PROVIDER_FAILURE_REASON: &str = "Payment failed at provider";

/// A confirmed payment with the profile it extended.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedPayment {
    pub payment: BillingPayment,
    pub profile: BillingProfile,
    /// `None` when issuing failed; the billing cycle retries it.
    pub receipt: Option<BillingReceipt>,
}

/// What handling a provider event did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProviderEventOutcome {
    /// The payment was confirmed and the period extended.
    Applied(ConfirmedPayment),
    /// The event was already handled; nothing changed.
    Duplicate {
        payment: BillingPayment,
        receipt: Option<BillingReceipt>,
    },
    /// A failed payment was recorded.
    Recorded { payment: BillingPayment },
    /// The subscription was canceled.
    Canceled { profile: BillingProfile },
}

#[derive(Clone)]
pub struct ReconciliationService {
    ctx: BillingContext,
    subscriptions: SubscriptionService,
    receipts: ReceiptService,
}

impl ReconciliationService {
    pub fn new(ctx: BillingContext, receipts: ReceiptService) -> Self {
        ReconciliationService {
            subscriptions: SubscriptionService::new(ctx.clone()),
            receipts,
            ctx,
        }
    }

    // =========================================================================
    // Manual Payments
    // =========================================================================

    /// Records a bank transfer awaiting admin review.
    pub async fn submit_manual_payment(
        &self,
        account_id: &str,
        amount_cents: i64,
        currency: Currency,
        proof_url: &str,
    ) -> BillingResult<BillingPayment> {
        validate_payment_amount(amount_cents)?;
        let profile = self.subscriptions.get_profile(account_id).await?;
        if profile.status == BillingStatus::Canceled {
            return Err(BillingError::SubscriptionCanceled {
                account_id: account_id.to_string(),
            });
        }
        validate_payment_currency(&profile, currency)?;
        validate_proof_url(proof_url)?;

        let payment = self.new_payment(
            &profile,
            amount_cents,
            currency,
            Provider::Manual,
            Some(proof_url.to_string()),
            None,
            None,
        );
        self.ctx.store.insert_payment(&payment).await?;

        info!(
            account_id,
            payment_id = %payment.id,
            amount_cents,
            currency = %currency,
            "Manual payment submitted"
        );
        Ok(payment)
    }

    /// Confirms a pending payment on behalf of an admin.
    pub async fn confirm_payment(
        &self,
        payment_id: &str,
        confirmed_by: &str,
    ) -> BillingResult<ConfirmedPayment> {
        if confirmed_by.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "confirmed_by".to_string(),
            }
            .into());
        }
        self.confirm(payment_id, Some(confirmed_by.to_string())).await
    }

    /// Rejects a pending payment. The profile is not touched.
    ///
    /// The reason is optional; a blank one is stored as no reason.
    pub async fn reject_payment(
        &self,
        payment_id: &str,
        reason: &str,
    ) -> BillingResult<BillingPayment> {
        let reason = validate_rejection_reason(reason)?;
        let payment = self.load_payment(payment_id).await?;
        ensure_pending(&payment)?;

        let now = self.ctx.time.now();
        let rejected = self
            .ctx
            .store
            .reject_payment(payment_id, reason, now)
            .await?;

        let current = self.load_payment(payment_id).await?;
        if !rejected {
            return Err(BillingError::AlreadyFinalized {
                payment_id: payment_id.to_string(),
                status: current.status,
            });
        }

        info!(
            account_id = %current.account_id,
            payment_id,
            reason = reason.unwrap_or("-"),
            "Payment rejected"
        );
        Ok(current)
    }

    /// Payments of an account, newest first.
    pub async fn list_payments(&self, account_id: &str) -> BillingResult<Vec<BillingPayment>> {
        self.subscriptions.get_profile(account_id).await?;
        Ok(self.ctx.store.list_payments(account_id).await?)
    }

    // =========================================================================
    // Provider Events
    // =========================================================================

    /// Applies an already-verified event from the automated provider.
    ///
    /// Replaying an event with the same idempotency key changes nothing.
    pub async fn handle_provider_event(
        &self,
        event: &ProviderEvent,
    ) -> BillingResult<ProviderEventOutcome> {
        validate_idempotency_key(&event.idempotency_key)?;
        validate_account_id(&event.account_id)?;

        match event.status {
            ProviderEventStatus::PaymentSucceeded => self.handle_succeeded(event).await,
            ProviderEventStatus::PaymentFailed => self.handle_failed(event).await,
            ProviderEventStatus::SubscriptionCanceled => {
                let profile = self.subscriptions.cancel(&event.account_id).await?;
                Ok(ProviderEventOutcome::Canceled { profile })
            }
        }
    }

    async fn handle_succeeded(&self, event: &ProviderEvent) -> BillingResult<ProviderEventOutcome> {
        let key = event.idempotency_key.as_str();

        let payment = match self.ctx.store.find_payment_by_idempotency_key(key).await? {
            Some(existing) => existing,
            None => {
                validate_payment_amount(event.amount_cents)?;
                let profile = self.subscriptions.get_profile(&event.account_id).await?;
                validate_settlement_currency(&profile, event.currency)?;

                let payment = self.new_payment(
                    &profile,
                    event.amount_cents,
                    event.currency,
                    Provider::Automated,
                    None,
                    Some(key.to_string()),
                    event.reference.clone(),
                );
                match self.ctx.store.insert_payment(&payment).await {
                    Ok(()) => payment,
                    // Same event delivered twice at once; the other insert won.
                    Err(DbError::UniqueViolation { .. }) => self
                        .ctx
                        .store
                        .find_payment_by_idempotency_key(key)
                        .await?
                        .ok_or_else(|| BillingError::not_found("billing_payment", key))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if payment.account_id != event.account_id {
            return Err(ValidationError::InvalidFormat {
                field: "idempotency_key".to_string(),
                reason: "already used by another account".to_string(),
            }
            .into());
        }

        if payment.status != PaymentStatus::Pending {
            return self.duplicate(payment).await;
        }

        match self.confirm(&payment.id, None).await {
            Ok(confirmed) => Ok(ProviderEventOutcome::Applied(confirmed)),
            Err(BillingError::AlreadyFinalized { .. }) => {
                let current = self.load_payment(&payment.id).await?;
                self.duplicate(current).await
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_failed(&self, event: &ProviderEvent) -> BillingResult<ProviderEventOutcome> {
        let key = event.idempotency_key.as_str();
        if let Some(existing) = self.ctx.store.find_payment_by_idempotency_key(key).await? {
            return self.duplicate(existing).await;
        }

        let profile = self.subscriptions.get_profile(&event.account_id).await?;
        // Failure events may omit the amount; record what the period costs.
        let amount_cents = if event.amount_cents > 0 {
            event.amount_cents
        } else {
            self.ctx.policy.price(event.currency).cents()
        };

        let now = self.ctx.time.now();
        let mut payment = self.new_payment(
            &profile,
            amount_cents,
            event.currency,
            Provider::Automated,
            None,
            Some(key.to_string()),
            event.reference.clone(),
        );
        payment.status = PaymentStatus::Rejected;
        payment.rejection_reason = Some(PROVIDER_FAILURE_REASON.to_string());
        payment.rejected_at = Some(now);

        match self.ctx.store.insert_payment(&payment).await {
            Ok(()) => {}
            Err(DbError::UniqueViolation { .. }) => {
                let existing = self
                    .ctx
                    .store
                    .find_payment_by_idempotency_key(key)
                    .await?
                    .ok_or_else(|| BillingError::not_found("billing_payment", key))?;
                return self.duplicate(existing).await;
            }
            Err(e) => return Err(e.into()),
        }

        warn!(
            account_id = %event.account_id,
            payment_id = %payment.id,
            reference = ?event.reference,
            "Provider reported a failed payment"
        );
        Ok(ProviderEventOutcome::Recorded { payment })
    }

    async fn duplicate(&self, payment: BillingPayment) -> BillingResult<ProviderEventOutcome> {
        let receipt = if payment.status == PaymentStatus::Confirmed {
            self.ctx
                .store
                .get_receipt_by_payment(&payment.account_id, &payment.id)
                .await?
        } else {
            None
        };
        info!(
            account_id = %payment.account_id,
            payment_id = %payment.id,
            status = %payment.status,
            "Provider event already handled"
        );
        Ok(ProviderEventOutcome::Duplicate { payment, receipt })
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    async fn confirm(
        &self,
        payment_id: &str,
        confirmed_by: Option<String>,
    ) -> BillingResult<ConfirmedPayment> {
        let confirmed_by = &confirmed_by;
        let (payment, profile) = with_conflict_retry(self.ctx.retry, "confirm_payment", || async move {
            let payment = self.load_payment(payment_id).await?;
            ensure_pending(&payment)?;

            let profile = self.subscriptions.get_profile(&payment.account_id).await?;
            let now = self.ctx.time.now();
            let transition =
                clock::apply_payment(&profile, payment.currency, now, &self.ctx.policy)?;
            let period = transition.paid_period.ok_or_else(|| {
                BillingError::Integrity(format!(
                    "payment {} applied without a paid period",
                    payment_id
                ))
            })?;

            let write = ConfirmationWrite {
                payment_id: payment_id.to_string(),
                confirmed_at: now,
                confirmed_by: confirmed_by.clone(),
                period_start: period.start,
                period_end: period.end,
                profile: transition.profile,
                expected_version: profile.version,
            };
            Ok(self.ctx.store.commit_confirmation(&write).await?)
        })
        .await?;

        info!(
            account_id = %payment.account_id,
            payment_id,
            confirmed_by = ?payment.confirmed_by,
            period_end = ?payment.period_end,
            status = %profile.status,
            "Payment confirmed"
        );

        let receipt = match self.receipts.issue(&payment).await {
            Ok(receipt) => Some(self.receipts.deliver(&profile, receipt, &payment).await),
            Err(e) => {
                warn!(
                    payment_id,
                    error = %e,
                    "Receipt not issued, leaving it for the billing cycle"
                );
                None
            }
        };

        Ok(ConfirmedPayment {
            payment,
            profile,
            receipt,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load_payment(&self, payment_id: &str) -> BillingResult<BillingPayment> {
        self.ctx
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::not_found("billing_payment", payment_id))
    }

    #[allow(clippy::too_many_arguments)]
    fn new_payment(
        &self,
        profile: &BillingProfile,
        amount_cents: i64,
        currency: Currency,
        provider: Provider,
        proof_url: Option<String>,
        idempotency_key: Option<String>,
        reference: Option<String>,
    ) -> BillingPayment {
        let now: DateTime<Utc> = self.ctx.time.now();
        BillingPayment {
            id: Uuid::new_v4().to_string(),
            account_id: profile.account_id.clone(),
            amount_cents,
            currency,
            provider,
            status: PaymentStatus::Pending,
            proof_url,
            idempotency_key,
            reference,
            confirmed_by: None,
            rejection_reason: None,
            created_at: now,
            confirmed_at: None,
            rejected_at: None,
            period_start: None,
            period_end: None,
        }
    }
}

fn ensure_pending(payment: &BillingPayment) -> BillingResult<()> {
    if payment.status.is_final() {
        return Err(BillingError::AlreadyFinalized {
            payment_id: payment.id.clone(),
            status: payment.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, harness};
    use chrono::Duration;

    const PROOF: &str = "https://proofs.example.com/transfer.png";

    fn usd_event(key: &str, status: ProviderEventStatus) -> ProviderEvent {
        ProviderEvent {
            idempotency_key: key.to_string(),
            account_id: "acct-1".to_string(),
            amount_cents: 2_000,
            currency: Currency::Usd,
            status,
            reference: Some("inv_123".to_string()),
        }
    }

    #[tokio::test]
    async fn test_submit_validates_input() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let svc = &h.services.reconciliation;

        let err = svc
            .submit_manual_payment("acct-1", 0, Currency::Dop, PROOF)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidAmount { amount_cents: 0 }));

        let err = svc
            .submit_manual_payment("acct-1", 2_000, Currency::Usd, PROOF)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::CurrencyMismatch {
                expected: Currency::Dop,
                actual: Currency::Usd
            }
        ));

        let err = svc
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, "ftp://nope")
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = svc
            .submit_manual_payment("ghost", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound { .. }));

        assert!(svc.list_payments("acct-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_during_trial_starts_at_trial_end() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        h.clock.set(at(2024, 1, 10));
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);

        let confirmed = h
            .services
            .reconciliation
            .confirm_payment(&payment.id, "admin-1")
            .await
            .unwrap();

        assert_eq!(confirmed.payment.status, PaymentStatus::Confirmed);
        assert_eq!(confirmed.payment.confirmed_by.as_deref(), Some("admin-1"));
        assert_eq!(confirmed.payment.period_start, Some(at(2024, 1, 16)));
        assert_eq!(confirmed.payment.period_end, Some(at(2024, 2, 15)));
        assert_eq!(confirmed.profile.status, BillingStatus::Active);
        assert_eq!(confirmed.profile.current_period_end, Some(at(2024, 2, 15)));
        assert_eq!(confirmed.receipt.unwrap().number, "REC-00001");
    }

    #[tokio::test]
    async fn test_confirm_in_grace_extends_from_period_end() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        h.pay_manual("acct-1").await; // period ends 2024-02-15

        h.clock.set(at(2024, 2, 17));
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();
        let confirmed = h
            .services
            .reconciliation
            .confirm_payment(&payment.id, "admin-1")
            .await
            .unwrap();

        assert_eq!(confirmed.payment.period_start, Some(at(2024, 2, 15)));
        assert_eq!(confirmed.profile.current_period_end, Some(at(2024, 3, 16)));
        assert_eq!(confirmed.profile.grace_ends_at, None);
    }

    #[tokio::test]
    async fn test_confirm_when_blocked_starts_fresh() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        h.clock.set(at(2024, 1, 20));
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();
        let confirmed = h
            .services
            .reconciliation
            .confirm_payment(&payment.id, "admin-1")
            .await
            .unwrap();

        assert_eq!(confirmed.payment.period_start, Some(at(2024, 1, 20)));
        assert_eq!(confirmed.profile.current_period_end, Some(at(2024, 2, 19)));
        assert_eq!(confirmed.profile.blocked_at, None);
    }

    #[tokio::test]
    async fn test_second_confirm_is_already_finalized() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let payment = h.pay_manual("acct-1").await;
        let before = h.services.subscriptions.get_profile("acct-1").await.unwrap();

        let err = h
            .services
            .reconciliation
            .confirm_payment(&payment.id, "admin-2")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::AlreadyFinalized {
                status: PaymentStatus::Confirmed,
                ..
            }
        ));

        let after = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(after.current_period_end, before.current_period_end);
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn test_confirm_on_canceled_keeps_payment_pending() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();
        h.services.subscriptions.cancel("acct-1").await.unwrap();

        let err = h
            .services
            .reconciliation
            .confirm_payment(&payment.id, "admin-1")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::SubscriptionCanceled { .. }));

        let stored = h.store.get_payment(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_reject_leaves_profile_untouched() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let before = h.services.subscriptions.get_profile("acct-1").await.unwrap();

        let payment = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();

        let rejected = h
            .services
            .reconciliation
            .reject_payment(&payment.id, "Comprobante ilegible")
            .await
            .unwrap();
        assert_eq!(rejected.status, PaymentStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Comprobante ilegible"));

        let after = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(after, before);

        let err = h
            .services
            .reconciliation
            .confirm_payment(&payment.id, "admin-1")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::AlreadyFinalized { .. }));
    }

    #[tokio::test]
    async fn test_reject_without_reason() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();

        let rejected = h
            .services
            .reconciliation
            .reject_payment(&payment.id, "   ")
            .await
            .unwrap();
        assert_eq!(rejected.status, PaymentStatus::Rejected);
        assert_eq!(rejected.rejection_reason, None);
        assert_eq!(rejected.rejected_at, Some(at(2024, 1, 1)));
    }

    #[tokio::test]
    async fn test_staged_change_does_not_block_billing_currency() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        h.services
            .subscriptions
            .request_currency_change("acct-1", Currency::Usd, None)
            .await
            .unwrap();
        let svc = &h.services.reconciliation;

        let payment = svc
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();
        assert_eq!(payment.currency, Currency::Dop);

        let err = svc
            .submit_manual_payment("acct-1", 2_000, Currency::Usd, PROOF)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::CurrencyMismatch {
                expected: Currency::Dop,
                actual: Currency::Usd
            }
        ));
    }

    #[tokio::test]
    async fn test_confirming_old_currency_keeps_change_staged() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();
        h.services
            .subscriptions
            .request_currency_change("acct-1", Currency::Usd, None)
            .await
            .unwrap();

        let confirmed = h
            .services
            .reconciliation
            .confirm_payment(&payment.id, "admin-1")
            .await
            .unwrap();

        assert_eq!(confirmed.payment.currency, Currency::Dop);
        assert_eq!(confirmed.profile.status, BillingStatus::Active);
        assert_eq!(confirmed.profile.currency, Currency::Dop);
        assert_eq!(confirmed.profile.provider, Provider::Manual);
        assert_eq!(confirmed.profile.pending_currency, Some(Currency::Usd));
        assert_eq!(confirmed.receipt.unwrap().currency, Currency::Dop);
    }

    #[tokio::test]
    async fn test_confirm_rechecks_currency_after_switch() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let transfer = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();

        // The account moves to USD through the provider before the transfer is reviewed.
        h.services
            .subscriptions
            .request_currency_change("acct-1", Currency::Usd, None)
            .await
            .unwrap();
        h.services
            .reconciliation
            .handle_provider_event(&usd_event("evt_1", ProviderEventStatus::PaymentSucceeded))
            .await
            .unwrap();

        let err = h
            .services
            .reconciliation
            .confirm_payment(&transfer.id, "admin-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::CurrencyMismatch {
                expected: Currency::Usd,
                actual: Currency::Dop
            }
        ));
        let stored = h.store.get_payment(&transfer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_provider_event_is_idempotent() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial_usd("acct-1").await;
        let svc = &h.services.reconciliation;
        let event = usd_event("evt_1", ProviderEventStatus::PaymentSucceeded);

        let first = svc.handle_provider_event(&event).await.unwrap();
        let applied = match first {
            ProviderEventOutcome::Applied(c) => c,
            other => panic!("expected Applied, got {:?}", other),
        };
        assert_eq!(applied.payment.provider, Provider::Automated);
        assert_eq!(applied.payment.reference.as_deref(), Some("inv_123"));

        h.clock.advance(Duration::hours(1));
        let second = svc.handle_provider_event(&event).await.unwrap();
        match second {
            ProviderEventOutcome::Duplicate { payment, receipt } => {
                assert_eq!(payment.id, applied.payment.id);
                assert_eq!(receipt.map(|r| r.number).as_deref(), Some("REC-00001"));
            }
            other => panic!("expected Duplicate, got {:?}", other),
        }

        let profile = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(profile.current_period_end, applied.profile.current_period_end);
        assert_eq!(svc.list_payments("acct-1").await.unwrap().len(), 1);
        assert_eq!(h.services.receipts.list_receipts("acct-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_event_checks_currency() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await; // DOP account

        let err = h
            .services
            .reconciliation
            .handle_provider_event(&usd_event("evt_1", ProviderEventStatus::PaymentSucceeded))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::CurrencyMismatch { .. }));

        // A staged switch to USD makes the same event acceptable.
        h.services
            .subscriptions
            .request_currency_change("acct-1", Currency::Usd, None)
            .await
            .unwrap();
        let outcome = h
            .services
            .reconciliation
            .handle_provider_event(&usd_event("evt_1", ProviderEventStatus::PaymentSucceeded))
            .await
            .unwrap();
        match outcome {
            ProviderEventOutcome::Applied(c) => {
                assert_eq!(c.profile.currency, Currency::Usd);
                assert_eq!(c.profile.provider, Provider::Automated);
                assert!(!c.profile.has_pending_change());
            }
            other => panic!("expected Applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_event_is_recorded_once() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial_usd("acct-1").await;
        let svc = &h.services.reconciliation;
        let mut event = usd_event("evt_fail", ProviderEventStatus::PaymentFailed);
        event.amount_cents = 0;

        let outcome = svc.handle_provider_event(&event).await.unwrap();
        match outcome {
            ProviderEventOutcome::Recorded { payment } => {
                assert_eq!(payment.status, PaymentStatus::Rejected);
                assert_eq!(payment.amount_cents, 2_000);
            }
            other => panic!("expected Recorded, got {:?}", other),
        }

        let again = svc.handle_provider_event(&event).await.unwrap();
        assert!(matches!(again, ProviderEventOutcome::Duplicate { receipt: None, .. }));

        let profile = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(profile.status, BillingStatus::Trialing);
        assert_eq!(profile.version, 0);
    }

    #[tokio::test]
    async fn test_cancel_event() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial_usd("acct-1").await;

        let outcome = h
            .services
            .reconciliation
            .handle_provider_event(&usd_event("evt_c", ProviderEventStatus::SubscriptionCanceled))
            .await
            .unwrap();
        match outcome {
            ProviderEventOutcome::Canceled { profile } => {
                assert_eq!(profile.status, BillingStatus::Canceled)
            }
            other => panic!("expected Canceled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_confirmations_extend_once() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, PROOF)
            .await
            .unwrap();

        let a = h.services.reconciliation.clone();
        let b = h.services.reconciliation.clone();
        let (id_a, id_b) = (payment.id.clone(), payment.id.clone());
        let (ra, rb) = tokio::join!(
            async move { a.confirm_payment(&id_a, "admin-1").await },
            async move { b.confirm_payment(&id_b, "admin-2").await },
        );

        let outcomes = [ra.is_ok(), rb.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);

        let profile = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(profile.current_period_end, Some(at(2024, 2, 15)));
    }
}
