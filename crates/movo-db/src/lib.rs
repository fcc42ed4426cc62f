//! # movo-db: Database Layer for MOVO Billing
//!
//! SQLite storage for billing profiles, payments, receipts and the
//! notification log, using sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MOVO Billing Data Flow                           │
//! │                                                                         │
//! │  Daily cycle / admin confirm / provider webhook                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     movo-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ ProfileRepo   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ PaymentRepo   │    │ 001_billing_ │  │   │
//! │  │   │               │    │ ReceiptRepo   │    │   schema.sql │  │   │
//! │  │   │               │    │ NotifLogRepo  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │            ▲                                                    │   │
//! │  │            │ BillingStore trait (store.rs)                      │   │
//! │  └────────────┼────────────────────────────────────────────────────┘   │
//! │               │                                                         │
//! │       movo-billing services                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//! - [`store`] - The `BillingStore` seam and its instrumented decorator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use movo_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("billing.db")).await?;
//! let profile = db.profiles().get("acct-1").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use store::{BillingStore, InstrumentedStore};

// Repository re-exports for convenience
pub use repository::notification::NotificationLogRepository;
pub use repository::payment::{ConfirmationWrite, PaymentRepository};
pub use repository::profile::ProfileRepository;
pub use repository::receipt::ReceiptRepository;
