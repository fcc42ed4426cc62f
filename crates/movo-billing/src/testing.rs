//! Shared fixtures for the service tests: in-memory store, fixed clock and
//! mailers that record or fail.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{CycleSettings, MailSettings};
use crate::context::{BillingContext, BillingServices};
use crate::mailer::{EmailMessage, MailError, Mailer};
use crate::retry::RetryPolicy;
use crate::time::FixedClock;
use movo_core::{BillingPayment, BillingPolicy, BillingProfile, Contact, Currency};
use movo_db::{BillingStore, Database, DbConfig};

pub(crate) fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// Keeps every message it accepted. Can be switched to reject everything.
#[derive(Default)]
pub(crate) struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub(crate) fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Rejects every message.
pub(crate) struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _message: &EmailMessage) -> Result<(), MailError> {
        Err(MailError::Rejected {
            status: 503,
            body: "unavailable".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

pub(crate) struct Harness {
    pub ctx: BillingContext,
    pub store: Arc<dyn BillingStore>,
    pub clock: Arc<FixedClock>,
    pub mailer: Arc<RecordingMailer>,
    pub services: BillingServices,
}

impl Harness {
    /// DOP trial with a contact email.
    pub(crate) async fn trial(&self, account_id: &str) -> BillingProfile {
        self.services
            .subscriptions
            .create_subscription(
                account_id,
                Contact::new(format!("{}@example.com", account_id), "Colmado Rosa"),
                None,
            )
            .await
            .unwrap()
    }

    pub(crate) async fn trial_usd(&self, account_id: &str) -> BillingProfile {
        self.services
            .subscriptions
            .create_subscription(
                account_id,
                Contact::new(format!("{}@example.com", account_id), "Cafe Luna"),
                Some(Currency::Usd),
            )
            .await
            .unwrap()
    }

    /// Submits and confirms one period's transfer at the current clock.
    pub(crate) async fn pay_manual(&self, account_id: &str) -> BillingPayment {
        let profile = self.services.subscriptions.get_profile(account_id).await.unwrap();
        let currency = profile.currency;
        let payment = self
            .services
            .reconciliation
            .submit_manual_payment(
                account_id,
                self.ctx.policy.price(currency).cents(),
                currency,
                "https://proofs.example.com/transfer.png",
            )
            .await
            .unwrap();

        self.services
            .reconciliation
            .confirm_payment(&payment.id, "admin-1")
            .await
            .unwrap()
            .payment
    }
}

pub(crate) async fn harness(now: DateTime<Utc>) -> Harness {
    let mailer = Arc::new(RecordingMailer::default());
    build(now, mailer.clone(), mailer).await
}

pub(crate) async fn harness_with_mailer(now: DateTime<Utc>, mailer: Arc<dyn Mailer>) -> Harness {
    build(now, mailer, Arc::new(RecordingMailer::default())).await
}

async fn build(
    now: DateTime<Utc>,
    mailer: Arc<dyn Mailer>,
    recording: Arc<RecordingMailer>,
) -> Harness {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let store: Arc<dyn BillingStore> = Arc::new(db);
    let clock = Arc::new(FixedClock::new(now));

    let ctx = BillingContext::new(store.clone(), clock.clone(), BillingPolicy::default())
        .with_retry(RetryPolicy {
            initial: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(2),
        });
    let services = BillingServices::new(
        ctx.clone(),
        mailer,
        MailSettings::default(),
        &CycleSettings::default(),
    );

    Harness {
        ctx,
        store,
        clock,
        mailer: recording,
        services,
    }
}
