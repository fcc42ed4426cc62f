//! # Reminder Notifier
//!
//! Sends at most one email per (account, kind, boundary).
//!
//! ## Flow
//! ```text
//! due_notice(profile, now) ── none ──► NotDue
//!        │
//!        ▼
//! contact email? ── none ──► NoContact
//!        │
//!        ▼
//! already in log? ── yes ──► AlreadySent
//!        │
//!        ▼
//! render ──► send (timeout) ── error ──► Err (retried next cycle)
//!        │
//!        ▼
//! record in log ──► Sent
//! ```
//!
//! The log entry is written only after the provider accepted the message,
//! so a failed send is attempted again on the next cycle.
//!
//! Receipt emails follow the same rule with `email_sent_at` on the receipt
//! in place of the log entry.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::MailSettings;
use crate::context::BillingContext;
use crate::error::{BillingError, BillingResult};
use crate::mailer::{EmailMessage, Mailer};
use crate::templates::{self, ReceiptEmailContext, TemplateContext};
use movo_core::schedule;
use movo_core::{BillingPayment, BillingProfile, BillingReceipt, Money, NotificationKind, Provider};

/// Result of one notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "kind", rename_all = "snake_case")]
pub enum NotifyOutcome {
    Sent(NotificationKind),
    AlreadySent(NotificationKind),
    NotDue,
    NoContact,
}

/// Result of one receipt email attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptMailOutcome {
    /// Delivered; carries the receipt with `email_sent_at` set.
    Sent(BillingReceipt),
    AlreadySent,
    NoContact,
}

#[derive(Clone)]
pub struct Notifier {
    ctx: BillingContext,
    mailer: Arc<dyn Mailer>,
    settings: MailSettings,
}

impl Notifier {
    pub fn new(ctx: BillingContext, mailer: Arc<dyn Mailer>, settings: MailSettings) -> Self {
        Notifier {
            ctx,
            mailer,
            settings,
        }
    }

    /// Sends the reminder due for `profile` at `now`, if any.
    ///
    /// `profile` should already be brought current by the clock.
    pub async fn notify(
        &self,
        profile: &BillingProfile,
        now: DateTime<Utc>,
    ) -> BillingResult<NotifyOutcome> {
        let Some(notice) = schedule::due_notice(profile, now, &self.ctx.policy) else {
            return Ok(NotifyOutcome::NotDue);
        };

        // Blocked accounts are reminded once per retention window, not forever.
        if notice.boundary + self.ctx.policy.notification_retention() <= now {
            return Ok(NotifyOutcome::NotDue);
        }

        let Some(email) = contact_email(profile) else {
            debug!(account_id = %profile.account_id, kind = %notice.kind, "No contact email, skipping");
            return Ok(NotifyOutcome::NoContact);
        };

        let account_id = profile.account_id.as_str();
        if self
            .ctx
            .store
            .notification_sent(account_id, notice.kind, notice.boundary)
            .await?
        {
            return Ok(NotifyOutcome::AlreadySent(notice.kind));
        }

        let message = self.compose(profile, notice.kind, email, now);
        self.deliver(&message).await?;

        let expires_at = notice.boundary + self.ctx.policy.notification_retention();
        self.ctx
            .store
            .record_notification(account_id, notice.kind, notice.boundary, now, expires_at)
            .await?;

        info!(
            account_id,
            kind = %notice.kind,
            boundary = %notice.boundary,
            mailer = self.mailer.name(),
            "Reminder sent"
        );
        Ok(NotifyOutcome::Sent(notice.kind))
    }

    /// Emails `receipt` to the account contact and stamps `email_sent_at`.
    ///
    /// `payment` is the payment the receipt was issued for.
    pub async fn send_receipt(
        &self,
        profile: &BillingProfile,
        receipt: &BillingReceipt,
        payment: &BillingPayment,
        now: DateTime<Utc>,
    ) -> BillingResult<ReceiptMailOutcome> {
        if receipt.email_sent_at.is_some() {
            return Ok(ReceiptMailOutcome::AlreadySent);
        }

        let Some(email) = contact_email(profile) else {
            debug!(account_id = %profile.account_id, number = %receipt.number, "No contact email, receipt not mailed");
            return Ok(ReceiptMailOutcome::NoContact);
        };

        let rendered = templates::render_receipt(&self.receipt_context(profile, receipt, payment));
        self.deliver(&EmailMessage {
            to: email.to_string(),
            subject: rendered.subject,
            html: rendered.html,
        })
        .await?;

        if !self.ctx.store.mark_receipt_emailed(&receipt.id, now).await? {
            return Ok(ReceiptMailOutcome::AlreadySent);
        }

        info!(
            account_id = %receipt.account_id,
            number = %receipt.number,
            mailer = self.mailer.name(),
            "Receipt emailed"
        );
        let mut sent = receipt.clone();
        sent.email_sent_at = Some(now);
        Ok(ReceiptMailOutcome::Sent(sent))
    }

    fn receipt_context(
        &self,
        profile: &BillingProfile,
        receipt: &BillingReceipt,
        payment: &BillingPayment,
    ) -> ReceiptEmailContext {
        let method = match receipt.provider {
            Provider::Automated => "Tarjeta de crédito/débito",
            Provider::Manual => "Transferencia bancaria",
            Provider::None => "Otro",
        };
        let period = match (receipt.period_start, receipt.period_end) {
            (Some(start), Some(end)) => Some(format!(
                "{} - {}",
                start.format(DATE_FORMAT),
                end.format(DATE_FORMAT)
            )),
            _ => None,
        };

        ReceiptEmailContext {
            brand_name: self.settings.brand_name.clone(),
            recipient_name: profile.display_name.clone(),
            number: receipt.number.clone(),
            amount: Money::from_cents(receipt.amount_cents).format(receipt.currency),
            issued_on: receipt.issued_at.format(DATE_FORMAT).to_string(),
            period,
            method: method.to_string(),
            reference: payment
                .reference
                .clone()
                .or_else(|| payment.idempotency_key.clone()),
            identity: receipt.fiscal_identity(),
            year: receipt.issued_at.year(),
        }
    }

    fn compose(
        &self,
        profile: &BillingProfile,
        kind: NotificationKind,
        to: &str,
        now: DateTime<Utc>,
    ) -> EmailMessage {
        let currency = profile.renewal_currency();
        let context = TemplateContext {
            brand_name: self.settings.brand_name.clone(),
            recipient_name: profile.display_name.clone(),
            billing_url: self.settings.billing_url(),
            amount_due: self.ctx.policy.price(currency).format(currency),
            year: now.year(),
        };
        let rendered = templates::render(kind, &context);

        EmailMessage {
            to: to.to_string(),
            subject: rendered.subject,
            html: rendered.html,
        }
    }

    async fn deliver(&self, message: &EmailMessage) -> BillingResult<()> {
        let timeout = self.settings.timeout();
        match tokio::time::timeout(timeout, self.mailer.send(message)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BillingError::Timeout {
                operation: format!("{} send", self.mailer.name()),
                seconds: timeout.as_secs(),
            }),
        }
    }
}

const DATE_FORMAT: &str = "%d/%m/%Y";

fn contact_email(profile: &BillingProfile) -> Option<&str> {
    profile
        .contact_email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
}
