//! # Repository Module
//!
//! Database repository implementations for MOVO billing.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Billing service                                                       │
//! │       │                                                                 │
//! │       │  db.profiles().update_if_version(&profile, 3)                  │
//! │       ▼                                                                 │
//! │  ProfileRepository                                                     │
//! │  ├── insert(&self, profile)                                            │
//! │  ├── get(&self, account_id)                                            │
//! │  └── update_if_version(&self, profile, expected)  ← CAS on `version`   │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`profile::ProfileRepository`] - Billing profiles, version-checked writes
//! - [`payment::PaymentRepository`] - Payments and atomic confirmation
//! - [`receipt::ReceiptRepository`] - Receipts with per-account numbering
//! - [`notification::NotificationLogRepository`] - Sent-notice dedup log

pub mod notification;
pub mod payment;
pub mod profile;
pub mod receipt;
