//! # Service Context
//!
//! What every billing service needs: the store, a time source, the policy
//! and the conflict-retry timings. Cheap to clone.
//!
//! ```rust,ignore
//! let ctx = BillingContext::new(Arc::new(db), Arc::new(SystemTime), config.policy.clone())
//!     .with_retry(RetryPolicy::from(&config.cycle));
//! let services = BillingServices::new(ctx, mailer, config.mail.clone(), &config.cycle);
//! services.reconciliation.confirm_payment("pay-1", "admin-7").await?;
//! ```

use std::sync::Arc;

use crate::config::{CycleSettings, MailSettings};
use crate::cycle::BillingCycle;
use crate::mailer::Mailer;
use crate::notifier::Notifier;
use crate::receipts::ReceiptService;
use crate::reconciliation::ReconciliationService;
use crate::retry::RetryPolicy;
use crate::subscriptions::SubscriptionService;
use crate::time::TimeSource;
use movo_core::BillingPolicy;
use movo_db::BillingStore;

/// Shared dependencies of the billing services.
#[derive(Clone)]
pub struct BillingContext {
    pub store: Arc<dyn BillingStore>,
    pub time: Arc<dyn TimeSource>,
    pub policy: Arc<BillingPolicy>,
    pub retry: RetryPolicy,
}

impl BillingContext {
    pub fn new(
        store: Arc<dyn BillingStore>,
        time: Arc<dyn TimeSource>,
        policy: BillingPolicy,
    ) -> Self {
        BillingContext {
            store,
            time,
            policy: Arc::new(policy),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// All billing services wired over one context.
#[derive(Clone)]
pub struct BillingServices {
    pub subscriptions: SubscriptionService,
    pub reconciliation: ReconciliationService,
    pub receipts: ReceiptService,
    pub notifier: Notifier,
    pub cycle: Arc<BillingCycle>,
}

impl BillingServices {
    pub fn new(
        ctx: BillingContext,
        mailer: Arc<dyn Mailer>,
        mail: MailSettings,
        cycle: &CycleSettings,
    ) -> Self {
        let subscriptions = SubscriptionService::new(ctx.clone());
        let notifier = Notifier::new(ctx.clone(), mailer, mail);
        let receipts = ReceiptService::new(ctx.clone(), notifier.clone());
        let reconciliation = ReconciliationService::new(ctx.clone(), receipts.clone());
        let cycle = Arc::new(BillingCycle::new(
            ctx,
            receipts.clone(),
            notifier.clone(),
            cycle.concurrency,
        ));

        BillingServices {
            subscriptions,
            reconciliation,
            receipts,
            notifier,
            cycle,
        }
    }
}
