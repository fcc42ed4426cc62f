//! # Billing Cycle
//!
//! One pass over every account: advance the clock, backfill missing
//! receipts and their emails, send due reminders, then purge expired log
//! entries.
//!
//! ## Per-Account Steps
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │  refresh     │───►│  backfill    │───►│  re-read     │───►│  notify      │
//! │  (CAS write) │    │  receipts,   │    │  profile     │    │  (deduped)   │
//! │              │    │  send unsent │    │              │    │              │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//!        │ integrity error
//!        ▼
//!   count, log, skip this account
//! ```
//!
//! The reminder is chosen from the profile as stored right before sending,
//! so a payment confirmed while the account was being processed is seen.
//!
//! Accounts are processed concurrently up to the configured limit. Running
//! a cycle twice at the same instant changes nothing and sends nothing the
//! second time.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::context::BillingContext;
use crate::error::{BillingError, BillingResult};
use crate::notifier::{Notifier, NotifyOutcome};
use crate::receipts::ReceiptService;
use crate::subscriptions::SubscriptionService;
use movo_core::clock;
use movo_core::{BillingProfile, ClockEvent};

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub processed: u64,
    pub trial_expired: u64,
    pub period_expired: u64,
    pub grace_expired: u64,
    pub notifications_sent: u64,
    pub notification_errors: u64,
    pub integrity_errors: u64,
    pub account_errors: u64,
    pub receipts_backfilled: u64,
    pub receipts_emailed: u64,
    pub log_entries_purged: u64,
}

impl CycleReport {
    fn merge(&mut self, other: CycleReport) {
        self.processed += other.processed;
        self.trial_expired += other.trial_expired;
        self.period_expired += other.period_expired;
        self.grace_expired += other.grace_expired;
        self.notifications_sent += other.notifications_sent;
        self.notification_errors += other.notification_errors;
        self.integrity_errors += other.integrity_errors;
        self.account_errors += other.account_errors;
        self.receipts_backfilled += other.receipts_backfilled;
        self.receipts_emailed += other.receipts_emailed;
        self.log_entries_purged += other.log_entries_purged;
    }
}

pub struct BillingCycle {
    ctx: BillingContext,
    subscriptions: SubscriptionService,
    receipts: ReceiptService,
    notifier: Notifier,
    concurrency: usize,
}

impl BillingCycle {
    pub fn new(
        ctx: BillingContext,
        receipts: ReceiptService,
        notifier: Notifier,
        concurrency: usize,
    ) -> Self {
        BillingCycle {
            subscriptions: SubscriptionService::new(ctx.clone()),
            receipts,
            ctx,
            notifier,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs the cycle as of the time source's current instant.
    pub async fn run_now(&self) -> BillingResult<CycleReport> {
        self.run_once(self.ctx.time.now()).await
    }

    /// Runs the cycle as of `now`.
    ///
    /// Fails only if the account list cannot be read; per-account failures
    /// are counted in the report.
    pub async fn run_once(&self, now: DateTime<Utc>) -> BillingResult<CycleReport> {
        let account_ids = self.ctx.store.list_account_ids().await?;
        info!(accounts = account_ids.len(), now = %now, "Billing cycle started");

        let mut report = stream::iter(account_ids)
            .map(|account_id| async move { self.process_account(&account_id, now).await })
            .buffer_unordered(self.concurrency)
            .fold(CycleReport::default(), |mut acc, r| async move {
                acc.merge(r);
                acc
            })
            .await;

        match self.ctx.store.purge_notifications(now).await {
            Ok(purged) => report.log_entries_purged = purged,
            Err(e) => warn!(error = %e, "Failed to purge notification log"),
        }

        info!(
            processed = report.processed,
            trial_expired = report.trial_expired,
            period_expired = report.period_expired,
            grace_expired = report.grace_expired,
            notifications_sent = report.notifications_sent,
            notification_errors = report.notification_errors,
            integrity_errors = report.integrity_errors,
            account_errors = report.account_errors,
            receipts_backfilled = report.receipts_backfilled,
            receipts_emailed = report.receipts_emailed,
            log_entries_purged = report.log_entries_purged,
            "Billing cycle finished"
        );
        Ok(report)
    }

    async fn process_account(&self, account_id: &str, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            processed: 1,
            ..CycleReport::default()
        };

        let update = match self.subscriptions.refresh_at(account_id, now).await {
            Ok(update) => update,
            Err(e) if e.is_integrity() => {
                error!(account_id, error = %e, "Billing profile is inconsistent, skipping");
                report.integrity_errors = 1;
                return report;
            }
            Err(e) => {
                error!(account_id, error = %e, "Failed to refresh billing profile");
                report.account_errors = 1;
                return report;
            }
        };

        for event in &update.events {
            match event {
                ClockEvent::TrialExpired => report.trial_expired += 1,
                ClockEvent::PeriodExpired => report.period_expired += 1,
                ClockEvent::GraceExpired => report.grace_expired += 1,
                _ => {}
            }
        }
        if !update.events.is_empty() {
            info!(
                account_id,
                status = %update.profile.status,
                events = ?update.events,
                "Billing status advanced"
            );
        }

        match self.receipts.backfill(account_id).await {
            Ok(issued) => report.receipts_backfilled = issued as u64,
            Err(e) => warn!(account_id, error = %e, "Receipt backfill failed"),
        }

        match self.receipts.send_pending(account_id, now).await {
            Ok(sent) => report.receipts_emailed = sent as u64,
            Err(e) => warn!(account_id, error = %e, "Receipt email not sent, will retry next cycle"),
        }

        match self.remind(account_id, &update.profile, now).await {
            Ok(NotifyOutcome::Sent(_)) => report.notifications_sent = 1,
            Ok(_) => {}
            Err(e) => {
                warn!(account_id, error = %e, "Reminder not sent, will retry next cycle");
                report.notification_errors = 1;
            }
        }

        report
    }

    /// Sends the reminder due for the account's latest stored state.
    ///
    /// `refreshed` is what this cycle wrote; if the profile moved since
    /// (a confirmation, a cancel), the stored version is evaluated instead.
    async fn remind(
        &self,
        account_id: &str,
        refreshed: &BillingProfile,
        now: DateTime<Utc>,
    ) -> BillingResult<NotifyOutcome> {
        let stored = self
            .ctx
            .store
            .get_profile(account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("billing_profile", account_id))?;

        if stored.version == refreshed.version {
            return self.notifier.notify(refreshed, now).await;
        }

        debug!(
            account_id,
            refreshed_version = refreshed.version,
            stored_version = stored.version,
            "Profile changed during the cycle, notifying from the stored version"
        );
        let latest = clock::recompute(&stored, now, &self.ctx.policy)?.profile;
        self.notifier.notify(&latest, now).await
    }
}

#[cfg(test)]
mod tests {
    use crate::notifier::NotifyOutcome;
    use crate::testing::{at, harness, harness_with_mailer, FailingMailer};
    use chrono::Duration;
    use movo_core::{BillingStatus, Currency, NotificationKind, PaymentStatus};
    use movo_db::ConfirmationWrite;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_trial_runs_out() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let cycle = &h.services.cycle;

        let report = cycle.run_once(at(2024, 1, 15)).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.notifications_sent, 1);

        let report = cycle.run_once(at(2024, 1, 17)).await.unwrap();
        assert_eq!(report.trial_expired, 1);
        assert_eq!(report.notifications_sent, 1);

        let profile = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(profile.status, BillingStatus::Blocked);
        assert_eq!(profile.blocked_at, Some(at(2024, 1, 16)));

        let kinds: Vec<_> = h.mailer.sent().iter().map(|m| m.subject.clone()).collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds[1].contains("bloqueada"));
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        h.trial("acct-2").await;

        let now = at(2024, 1, 13);
        let first = h.services.cycle.run_once(now).await.unwrap();
        assert_eq!(first.notifications_sent, 2);

        let second = h.services.cycle.run_once(now).await.unwrap();
        assert_eq!(second.processed, 2);
        assert_eq!(second.notifications_sent, 0);
        assert_eq!(h.mailer.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_missed_cycles_cascade() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        h.pay_manual("acct-1").await; // paid through 2024-02-15

        // Nothing ran for weeks; the account passes through grace into block.
        let report = h.services.cycle.run_once(at(2024, 3, 1)).await.unwrap();
        assert_eq!(report.period_expired, 1);
        assert_eq!(report.grace_expired, 1);

        let profile = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(profile.status, BillingStatus::Blocked);
        assert_eq!(profile.blocked_at, Some(at(2024, 2, 18)));
        assert!(h.mailer.sent()[h.mailer.sent().len() - 1]
            .subject
            .contains("bloqueada"));
    }

    #[tokio::test]
    async fn test_send_failures_are_retried_next_cycle() {
        let h = harness_with_mailer(at(2024, 1, 1), Arc::new(FailingMailer)).await;
        h.trial("acct-1").await;

        let report = h.services.cycle.run_once(at(2024, 1, 15)).await.unwrap();
        assert_eq!(report.notification_errors, 1);
        assert_eq!(report.notifications_sent, 0);

        let logged = h
            .store
            .notification_sent("acct-1", NotificationKind::Trial(1), at(2024, 1, 16))
            .await
            .unwrap();
        assert!(!logged);
    }

    #[tokio::test]
    async fn test_backfills_missing_receipt() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        // Confirmation committed without the receipt step.
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment(
                "acct-1",
                130_000,
                Currency::Dop,
                "https://proofs.example.com/1.png",
            )
            .await
            .unwrap();
        let profile = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        let t = movo_core::clock::apply_payment(&profile, Currency::Dop, at(2024, 1, 1), &h.ctx.policy).unwrap();
        let period = t.paid_period.unwrap();
        let (confirmed, _) = h
            .store
            .commit_confirmation(&ConfirmationWrite {
                payment_id: payment.id.clone(),
                confirmed_at: at(2024, 1, 1),
                confirmed_by: Some("admin-1".to_string()),
                period_start: period.start,
                period_end: period.end,
                profile: t.profile,
                expected_version: profile.version,
            })
            .await
            .unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Confirmed);

        let report = h.services.cycle.run_once(at(2024, 1, 2)).await.unwrap();
        assert_eq!(report.receipts_backfilled, 1);

        let receipt = h.services.receipts.get_receipt(&payment.id).await.unwrap();
        assert_eq!(receipt.number, "REC-00001");

        let report = h.services.cycle.run_once(at(2024, 1, 2)).await.unwrap();
        assert_eq!(report.receipts_backfilled, 0);
    }

    #[tokio::test]
    async fn test_inconsistent_profile_is_isolated() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        h.trial("acct-2").await;

        // ACTIVE without a period end.
        let mut broken = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        broken.status = BillingStatus::Active;
        broken.current_period_end = None;
        h.store.update_profile(&broken, 0).await.unwrap();

        let report = h.services.cycle.run_once(at(2024, 1, 17)).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.integrity_errors, 1);
        assert_eq!(report.trial_expired, 1);
    }

    #[tokio::test]
    async fn test_confirmation_racing_the_cycle() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment(
                "acct-1",
                130_000,
                Currency::Dop,
                "https://proofs.example.com/1.png",
            )
            .await
            .unwrap();

        let now = at(2024, 1, 17);
        h.clock.set(now);
        let cycle = h.services.cycle.clone();
        let reconciliation = h.services.reconciliation.clone();
        let id = payment.id.clone();

        let (report, confirmed) = tokio::join!(
            async move { cycle.run_once(now).await },
            async move { reconciliation.confirm_payment(&id, "admin-1").await },
        );
        report.unwrap();
        let confirmed = confirmed.unwrap();

        // Whichever wrote first, the payment extended the account exactly once.
        let profile = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(profile.status, BillingStatus::Active);
        assert_eq!(profile.current_period_end, confirmed.profile.current_period_end);
        assert_eq!(profile.current_period_end, Some(now + Duration::days(30)));
    }

    #[tokio::test]
    async fn test_reminder_uses_profile_stored_after_refresh() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        let payment = h
            .services
            .reconciliation
            .submit_manual_payment(
                "acct-1",
                130_000,
                Currency::Dop,
                "https://proofs.example.com/1.png",
            )
            .await
            .unwrap();

        // The cycle blocks the account, then the transfer is confirmed
        // before the reminder goes out.
        let now = at(2024, 1, 17);
        h.clock.set(now);
        let refreshed = h
            .services
            .subscriptions
            .refresh_at("acct-1", now)
            .await
            .unwrap()
            .profile;
        assert_eq!(refreshed.status, BillingStatus::Blocked);
        h.services
            .reconciliation
            .confirm_payment(&payment.id, "admin-1")
            .await
            .unwrap();

        let outcome = h.services.cycle.remind("acct-1", &refreshed, now).await.unwrap();
        assert_eq!(outcome, NotifyOutcome::NotDue);
        assert!(!h
            .mailer
            .sent()
            .iter()
            .any(|m| m.subject.contains("bloqueada")));
    }

    #[tokio::test]
    async fn test_cycle_retries_receipt_email() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;

        h.mailer.set_failing(true);
        let payment = h.pay_manual("acct-1").await;
        let report = h.services.cycle.run_once(at(2024, 1, 2)).await.unwrap();
        assert_eq!(report.receipts_emailed, 0);

        h.mailer.set_failing(false);
        let report = h.services.cycle.run_once(at(2024, 1, 3)).await.unwrap();
        assert_eq!(report.receipts_emailed, 1);

        let receipt = h.services.receipts.get_receipt(&payment.id).await.unwrap();
        assert_eq!(receipt.email_sent_at, Some(at(2024, 1, 3)));
        assert!(h.mailer.sent()[0].subject.starts_with("Recibo de pago REC-00001"));

        let report = h.services.cycle.run_once(at(2024, 1, 4)).await.unwrap();
        assert_eq!(report.receipts_emailed, 0);
    }
}
