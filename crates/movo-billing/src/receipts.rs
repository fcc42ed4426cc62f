//! # Receipts
//!
//! Issues receipts for confirmed payments. Issuing is idempotent: a payment
//! has at most one receipt, and asking again returns it.
//!
//! Receipt numbers are `REC-00001`, `REC-00002`, ... per account, assigned
//! by the store inside a transaction.
//!
//! Each receipt is emailed once. A failed send leaves `email_sent_at` empty
//! and the billing cycle tries again while the receipt is inside the
//! notification retention window.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::context::BillingContext;
use crate::error::{BillingError, BillingResult};
use crate::notifier::{Notifier, ReceiptMailOutcome};
use movo_core::{BillingPayment, BillingProfile, BillingReceipt, PaymentStatus};

#[derive(Clone)]
pub struct ReceiptService {
    ctx: BillingContext,
    notifier: Notifier,
}

impl ReceiptService {
    pub fn new(ctx: BillingContext, notifier: Notifier) -> Self {
        ReceiptService { ctx, notifier }
    }

    /// Returns the receipt for a confirmed payment, issuing it if needed.
    pub async fn generate_receipt(&self, payment_id: &str) -> BillingResult<BillingReceipt> {
        let payment = self
            .ctx
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::not_found("billing_payment", payment_id))?;

        self.issue(&payment).await
    }

    pub(crate) async fn issue(&self, payment: &BillingPayment) -> BillingResult<BillingReceipt> {
        if payment.status != PaymentStatus::Confirmed {
            return Err(BillingError::PaymentNotConfirmed {
                payment_id: payment.id.clone(),
                status: payment.status,
            });
        }

        let receipt = self
            .ctx
            .store
            .create_receipt(payment, self.ctx.time.now())
            .await?;

        info!(
            account_id = %receipt.account_id,
            payment_id = %receipt.payment_id,
            number = %receipt.number,
            "Receipt issued"
        );
        Ok(receipt)
    }

    /// Emails the receipt of a payment unless it already went out.
    pub async fn email_receipt(&self, payment_id: &str) -> BillingResult<ReceiptMailOutcome> {
        let receipt = self.get_receipt(payment_id).await?;
        let payment = self
            .ctx
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::not_found("billing_payment", payment_id))?;
        let profile = self.load_profile(&receipt.account_id).await?;

        self.notifier
            .send_receipt(&profile, &receipt, &payment, self.ctx.time.now())
            .await
    }

    /// Sends a freshly issued receipt. Failures are logged and left for the
    /// billing cycle; the receipt is returned either way.
    pub(crate) async fn deliver(
        &self,
        profile: &BillingProfile,
        receipt: BillingReceipt,
        payment: &BillingPayment,
    ) -> BillingReceipt {
        match self
            .notifier
            .send_receipt(profile, &receipt, payment, self.ctx.time.now())
            .await
        {
            Ok(ReceiptMailOutcome::Sent(sent)) => sent,
            Ok(_) => receipt,
            Err(e) => {
                warn!(
                    account_id = %receipt.account_id,
                    number = %receipt.number,
                    error = %e,
                    "Receipt email not sent, leaving it for the billing cycle"
                );
                receipt
            }
        }
    }

    /// Emails receipts of `account_id` that were issued inside the retention
    /// window and never went out. Returns how many were sent.
    pub(crate) async fn send_pending(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<usize> {
        let since = now - self.ctx.policy.notification_retention();
        let unsent = self.ctx.store.list_unsent_receipts(account_id, since).await?;
        if unsent.is_empty() {
            return Ok(0);
        }

        let profile = self.load_profile(account_id).await?;
        let mut sent = 0;
        for receipt in &unsent {
            let Some(payment) = self.ctx.store.get_payment(&receipt.payment_id).await? else {
                warn!(account_id, number = %receipt.number, "Receipt without its payment, not mailed");
                continue;
            };
            match self.notifier.send_receipt(&profile, receipt, &payment, now).await? {
                ReceiptMailOutcome::Sent(_) => sent += 1,
                ReceiptMailOutcome::NoContact => break,
                ReceiptMailOutcome::AlreadySent => {}
            }
        }

        Ok(sent)
    }

    async fn load_profile(&self, account_id: &str) -> BillingResult<BillingProfile> {
        self.ctx
            .store
            .get_profile(account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("billing_profile", account_id))
    }

    /// Receipt for a payment.
    pub async fn get_receipt(&self, payment_id: &str) -> BillingResult<BillingReceipt> {
        let payment = self
            .ctx
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::not_found("billing_payment", payment_id))?;

        self.ctx
            .store
            .get_receipt_by_payment(&payment.account_id, payment_id)
            .await?
            .ok_or_else(|| BillingError::not_found("billing_receipt", payment_id))
    }

    /// All receipts of an account, in issue order.
    pub async fn list_receipts(&self, account_id: &str) -> BillingResult<Vec<BillingReceipt>> {
        Ok(self.ctx.store.list_receipts(account_id).await?)
    }

    /// Issues receipts for confirmed payments that are missing one.
    ///
    /// Returns how many were issued. A failure on one payment is logged and
    /// the rest are still attempted.
    pub async fn backfill(&self, account_id: &str) -> BillingResult<usize> {
        let pending = self.ctx.store.list_unreceipted_payments(account_id).await?;
        let mut issued = 0;

        for payment in &pending {
            match self.issue(payment).await {
                Ok(_) => issued += 1,
                Err(e) => warn!(
                    account_id,
                    payment_id = %payment.id,
                    error = %e,
                    "Receipt backfill failed"
                ),
            }
        }

        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, harness};
    use movo_core::{Currency, FiscalIdentity};

    #[tokio::test]
    async fn test_receipt_requires_confirmed_payment() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        let payment = h
            .services
            .reconciliation
            .submit_manual_payment("acct-1", 130_000, Currency::Dop, "https://proofs.example.com/1.png")
            .await
            .unwrap();

        let err = h
            .services
            .receipts
            .generate_receipt(&payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::PaymentNotConfirmed { .. }));

        let err = h.services.receipts.get_receipt(&payment.id).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_receipts_are_numbered_per_account() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        let first = h.pay_manual("acct-1").await;
        let second = h.pay_manual("acct-1").await;

        let receipts = h.services.receipts.list_receipts("acct-1").await.unwrap();
        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts[0].number, "REC-00001");
        assert_eq!(receipts[0].payment_id, first.id);
        assert_eq!(receipts[1].number, "REC-00002");
        assert_eq!(receipts[1].payment_id, second.id);

        // Asking again returns the same receipt.
        let again = h.services.receipts.generate_receipt(&first.id).await.unwrap();
        assert_eq!(again.id, receipts[0].id);
        assert_eq!(again.period_end, first.period_end);
    }

    #[tokio::test]
    async fn test_backfill_with_nothing_missing() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        h.pay_manual("acct-1").await;

        assert_eq!(h.services.receipts.backfill("acct-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_confirmation_emails_receipt_with_identity() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        h.services
            .subscriptions
            .update_fiscal_identity(
                "acct-1",
                FiscalIdentity {
                    legal_name: "Colmado Rosa SRL".to_string(),
                    tax_id: "131-12345-6".to_string(),
                    address: "Calle El Conde 12".to_string(),
                },
            )
            .await
            .unwrap();

        let payment = h.pay_manual("acct-1").await;

        let receipt = h.services.receipts.get_receipt(&payment.id).await.unwrap();
        assert_eq!(receipt.legal_name.as_deref(), Some("Colmado Rosa SRL"));
        assert_eq!(receipt.email_sent_at, Some(at(2024, 1, 1)));

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "acct-1@example.com");
        assert!(sent[0].subject.starts_with("Recibo de pago REC-00001"));
        assert!(sent[0].html.contains("131-12345-6"));
        assert!(sent[0].html.contains("Transferencia bancaria"));

        // Asking again does not send a second copy.
        let again = h.services.receipts.email_receipt(&payment.id).await.unwrap();
        assert_eq!(again, ReceiptMailOutcome::AlreadySent);
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_receipt_email_is_retried() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        h.mailer.set_failing(true);
        let payment = h.pay_manual("acct-1").await;
        let receipt = h.services.receipts.get_receipt(&payment.id).await.unwrap();
        assert_eq!(receipt.email_sent_at, None);

        // Still failing: nothing stamped.
        let err = h
            .services
            .receipts
            .send_pending("acct-1", at(2024, 1, 2))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        h.mailer.set_failing(false);
        let sent = h
            .services
            .receipts
            .send_pending("acct-1", at(2024, 1, 3))
            .await
            .unwrap();
        assert_eq!(sent, 1);

        let receipt = h.services.receipts.get_receipt(&payment.id).await.unwrap();
        assert_eq!(receipt.email_sent_at, Some(at(2024, 1, 3)));
        assert_eq!(h.mailer.sent().len(), 1);
        assert_eq!(
            h.services.receipts.send_pending("acct-1", at(2024, 1, 4)).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_old_unsent_receipts_are_dropped() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        h.mailer.set_failing(true);
        h.pay_manual("acct-1").await;
        h.mailer.set_failing(false);

        let late = at(2024, 1, 1) + h.ctx.policy.notification_retention() + chrono::Duration::days(1);
        assert_eq!(h.services.receipts.send_pending("acct-1", late).await.unwrap(), 0);
        assert!(h.mailer.sent().is_empty());
    }
}
