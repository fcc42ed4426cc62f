//! # movo-billing: Billing Services for MOVO
//!
//! Runs the subscription lifecycle of every MOVO account: trials, paid
//! periods, grace, blocking, payments from two provider paths, receipts
//! and reminder emails.
//!
//! ## Layering
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  apps/billing-worker            BillingAgent (interval loop)          │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  movo-billing                                                         │
//! │    SubscriptionService   ReconciliationService   ReceiptService       │
//! │    BillingCycle ──► Notifier ──► templates ──► Arc<dyn Mailer>        │
//! │              all over BillingContext { store, time, policy, retry }   │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  movo-db     BillingStore (SQLite, version-checked writes)            │
//! │  movo-core   clock, schedule, validation (pure)                       │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let config = BillingConfig::load(None)?;
//! let db = Database::new(DbConfig::new(config.database.resolved_path())).await?;
//! let ctx = BillingContext::new(Arc::new(db), Arc::new(SystemTime), config.policy.clone());
//! let services = BillingServices::new(ctx, mailer::from_settings(&config.mail)?, config.mail.clone(), &config.cycle);
//!
//! services.subscriptions.create_subscription("acct-1", contact, None).await?;
//! let report = services.cycle.run_now().await?;
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod cycle;
pub mod error;
pub mod mailer;
pub mod notifier;
pub mod receipts;
pub mod reconciliation;
pub mod retry;
pub mod subscriptions;
pub mod templates;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{BillingAgent, BillingAgentHandle};
pub use config::{BillingConfig, CycleSettings, DatabaseSettings, MailProvider, MailSettings};
pub use context::{BillingContext, BillingServices};
pub use cycle::{BillingCycle, CycleReport};
pub use error::{BillingError, BillingResult};
pub use mailer::{EmailMessage, LogMailer, MailError, Mailer, ResendMailer};
pub use notifier::{Notifier, NotifyOutcome, ReceiptMailOutcome};
pub use receipts::ReceiptService;
pub use reconciliation::{ConfirmedPayment, ProviderEventOutcome, ReconciliationService};
pub use retry::RetryPolicy;
pub use subscriptions::{ProfileUpdate, SubscriptionService};
pub use time::{FixedClock, SystemTime, TimeSource};
