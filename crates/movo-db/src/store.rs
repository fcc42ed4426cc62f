//! # Billing Store
//!
//! The persistence seam the billing services are written against.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  movo-billing services                                                 │
//! │       │  Arc<dyn BillingStore>                                          │
//! │       ▼                                                                 │
//! │  InstrumentedStore<S>   ← span per call, elapsed time, error level     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database               ← repositories over SqlitePool                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error, Instrument};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::payment::ConfirmationWrite;
use movo_core::{BillingPayment, BillingProfile, BillingReceipt, NotificationKind};

// =============================================================================
// Trait
// =============================================================================

/// Storage operations used by the billing services.
///
/// Profile writes are version-checked; a lost race surfaces as
/// [`DbError::VersionConflict`] and is safe to retry after re-reading.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // --- Profiles -----------------------------------------------------------

    async fn insert_profile(&self, profile: &BillingProfile) -> DbResult<()>;

    async fn get_profile(&self, account_id: &str) -> DbResult<Option<BillingProfile>>;

    async fn list_account_ids(&self) -> DbResult<Vec<String>>;

    /// Writes `profile` if the stored version is still `expected_version`.
    async fn update_profile(
        &self,
        profile: &BillingProfile,
        expected_version: i64,
    ) -> DbResult<BillingProfile>;

    // --- Payments -----------------------------------------------------------

    async fn insert_payment(&self, payment: &BillingPayment) -> DbResult<()>;

    async fn get_payment(&self, payment_id: &str) -> DbResult<Option<BillingPayment>>;

    async fn find_payment_by_idempotency_key(&self, key: &str)
        -> DbResult<Option<BillingPayment>>;

    /// Newest first.
    async fn list_payments(&self, account_id: &str) -> DbResult<Vec<BillingPayment>>;

    async fn list_unreceipted_payments(&self, account_id: &str) -> DbResult<Vec<BillingPayment>>;

    /// Returns `false` if the payment was no longer pending.
    async fn reject_payment(
        &self,
        payment_id: &str,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Confirms the payment and writes the profile atomically.
    async fn commit_confirmation(
        &self,
        write: &ConfirmationWrite,
    ) -> DbResult<(BillingPayment, BillingProfile)>;

    // --- Receipts -----------------------------------------------------------

    /// Issues the receipt for a confirmed payment, or returns the existing one.
    async fn create_receipt(
        &self,
        payment: &BillingPayment,
        issued_at: DateTime<Utc>,
    ) -> DbResult<BillingReceipt>;

    async fn get_receipt_by_payment(
        &self,
        account_id: &str,
        payment_id: &str,
    ) -> DbResult<Option<BillingReceipt>>;

    async fn list_receipts(&self, account_id: &str) -> DbResult<Vec<BillingReceipt>>;

    /// Receipts issued since `issued_since` whose email has not gone out.
    async fn list_unsent_receipts(
        &self,
        account_id: &str,
        issued_since: DateTime<Utc>,
    ) -> DbResult<Vec<BillingReceipt>>;

    /// Returns `false` if the receipt was already marked.
    async fn mark_receipt_emailed(&self, receipt_id: &str, at: DateTime<Utc>) -> DbResult<bool>;

    // --- Notification log ---------------------------------------------------

    async fn notification_sent(
        &self,
        account_id: &str,
        kind: NotificationKind,
        boundary: DateTime<Utc>,
    ) -> DbResult<bool>;

    async fn record_notification(
        &self,
        account_id: &str,
        kind: NotificationKind,
        boundary: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DbResult<bool>;

    async fn purge_notifications(&self, now: DateTime<Utc>) -> DbResult<u64>;
}

// =============================================================================
// SQLite Implementation
// =============================================================================

#[async_trait]
impl BillingStore for Database {
    async fn insert_profile(&self, profile: &BillingProfile) -> DbResult<()> {
        self.profiles().insert(profile).await
    }

    async fn get_profile(&self, account_id: &str) -> DbResult<Option<BillingProfile>> {
        self.profiles().get(account_id).await
    }

    async fn list_account_ids(&self) -> DbResult<Vec<String>> {
        self.profiles().list_account_ids().await
    }

    async fn update_profile(
        &self,
        profile: &BillingProfile,
        expected_version: i64,
    ) -> DbResult<BillingProfile> {
        self.profiles().update_if_version(profile, expected_version).await
    }

    async fn insert_payment(&self, payment: &BillingPayment) -> DbResult<()> {
        self.payments().insert(payment).await
    }

    async fn get_payment(&self, payment_id: &str) -> DbResult<Option<BillingPayment>> {
        self.payments().get(payment_id).await
    }

    async fn find_payment_by_idempotency_key(
        &self,
        key: &str,
    ) -> DbResult<Option<BillingPayment>> {
        self.payments().get_by_idempotency_key(key).await
    }

    async fn list_payments(&self, account_id: &str) -> DbResult<Vec<BillingPayment>> {
        self.payments().list_for_account(account_id).await
    }

    async fn list_unreceipted_payments(&self, account_id: &str) -> DbResult<Vec<BillingPayment>> {
        self.payments().list_confirmed_without_receipt(account_id).await
    }

    async fn reject_payment(
        &self,
        payment_id: &str,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.payments().reject(payment_id, reason, at).await
    }

    async fn commit_confirmation(
        &self,
        write: &ConfirmationWrite,
    ) -> DbResult<(BillingPayment, BillingProfile)> {
        self.payments().confirm_with_profile(write).await
    }

    async fn create_receipt(
        &self,
        payment: &BillingPayment,
        issued_at: DateTime<Utc>,
    ) -> DbResult<BillingReceipt> {
        self.receipts().create_for_payment(payment, issued_at).await
    }

    async fn get_receipt_by_payment(
        &self,
        account_id: &str,
        payment_id: &str,
    ) -> DbResult<Option<BillingReceipt>> {
        self.receipts().get_by_payment(account_id, payment_id).await
    }

    async fn list_receipts(&self, account_id: &str) -> DbResult<Vec<BillingReceipt>> {
        self.receipts().list_for_account(account_id).await
    }

    async fn list_unsent_receipts(
        &self,
        account_id: &str,
        issued_since: DateTime<Utc>,
    ) -> DbResult<Vec<BillingReceipt>> {
        self.receipts().list_unsent(account_id, issued_since).await
    }

    async fn mark_receipt_emailed(&self, receipt_id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        self.receipts().mark_emailed(receipt_id, at).await
    }

    async fn notification_sent(
        &self,
        account_id: &str,
        kind: NotificationKind,
        boundary: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.notifications().exists(account_id, kind, boundary).await
    }

    async fn record_notification(
        &self,
        account_id: &str,
        kind: NotificationKind,
        boundary: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.notifications()
            .record(account_id, kind, boundary, sent_at, expires_at)
            .await
    }

    async fn purge_notifications(&self, now: DateTime<Utc>) -> DbResult<u64> {
        self.notifications().purge_expired(now).await
    }
}

// =============================================================================
// Instrumentation Decorator
// =============================================================================

/// Wraps a store so every call runs in a `billing_store` span and reports
/// its duration. Lost races log at debug, everything else at error.
#[derive(Debug, Clone)]
pub struct InstrumentedStore<S> {
    inner: S,
}

impl<S: BillingStore> InstrumentedStore<S> {
    pub fn new(inner: S) -> Self {
        InstrumentedStore { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn observe<T, F>(&self, op: &'static str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>> + Send,
    {
        let span = tracing::debug_span!("billing_store", op);
        let started = Instant::now();
        let result = fut.instrument(span).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => debug!(op, elapsed_ms, "store call completed"),
            Err(e) if e.is_conflict() => debug!(op, elapsed_ms, error = %e, "store call lost a race"),
            Err(DbError::NotFound { .. }) => debug!(op, elapsed_ms, "store call found nothing"),
            Err(e) => error!(op, elapsed_ms, error = %e, "store call failed"),
        }

        result
    }
}

#[async_trait]
impl<S: BillingStore> BillingStore for InstrumentedStore<S> {
    async fn insert_profile(&self, profile: &BillingProfile) -> DbResult<()> {
        self.observe("insert_profile", self.inner.insert_profile(profile))
            .await
    }

    async fn get_profile(&self, account_id: &str) -> DbResult<Option<BillingProfile>> {
        self.observe("get_profile", self.inner.get_profile(account_id))
            .await
    }

    async fn list_account_ids(&self) -> DbResult<Vec<String>> {
        self.observe("list_account_ids", self.inner.list_account_ids())
            .await
    }

    async fn update_profile(
        &self,
        profile: &BillingProfile,
        expected_version: i64,
    ) -> DbResult<BillingProfile> {
        self.observe(
            "update_profile",
            self.inner.update_profile(profile, expected_version),
        )
        .await
    }

    async fn insert_payment(&self, payment: &BillingPayment) -> DbResult<()> {
        self.observe("insert_payment", self.inner.insert_payment(payment))
            .await
    }

    async fn get_payment(&self, payment_id: &str) -> DbResult<Option<BillingPayment>> {
        self.observe("get_payment", self.inner.get_payment(payment_id))
            .await
    }

    async fn find_payment_by_idempotency_key(
        &self,
        key: &str,
    ) -> DbResult<Option<BillingPayment>> {
        self.observe(
            "find_payment_by_idempotency_key",
            self.inner.find_payment_by_idempotency_key(key),
        )
        .await
    }

    async fn list_payments(&self, account_id: &str) -> DbResult<Vec<BillingPayment>> {
        self.observe("list_payments", self.inner.list_payments(account_id))
            .await
    }

    async fn list_unreceipted_payments(&self, account_id: &str) -> DbResult<Vec<BillingPayment>> {
        self.observe(
            "list_unreceipted_payments",
            self.inner.list_unreceipted_payments(account_id),
        )
        .await
    }

    async fn reject_payment(
        &self,
        payment_id: &str,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.observe(
            "reject_payment",
            self.inner.reject_payment(payment_id, reason, at),
        )
        .await
    }

    async fn commit_confirmation(
        &self,
        write: &ConfirmationWrite,
    ) -> DbResult<(BillingPayment, BillingProfile)> {
        self.observe("commit_confirmation", self.inner.commit_confirmation(write))
            .await
    }

    async fn create_receipt(
        &self,
        payment: &BillingPayment,
        issued_at: DateTime<Utc>,
    ) -> DbResult<BillingReceipt> {
        self.observe(
            "create_receipt",
            self.inner.create_receipt(payment, issued_at),
        )
        .await
    }

    async fn get_receipt_by_payment(
        &self,
        account_id: &str,
        payment_id: &str,
    ) -> DbResult<Option<BillingReceipt>> {
        self.observe(
            "get_receipt_by_payment",
            self.inner.get_receipt_by_payment(account_id, payment_id),
        )
        .await
    }

    async fn list_receipts(&self, account_id: &str) -> DbResult<Vec<BillingReceipt>> {
        self.observe("list_receipts", self.inner.list_receipts(account_id))
            .await
    }

    async fn list_unsent_receipts(
        &self,
        account_id: &str,
        issued_since: DateTime<Utc>,
    ) -> DbResult<Vec<BillingReceipt>> {
        self.observe(
            "list_unsent_receipts",
            self.inner.list_unsent_receipts(account_id, issued_since),
        )
        .await
    }

    async fn mark_receipt_emailed(&self, receipt_id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        self.observe(
            "mark_receipt_emailed",
            self.inner.mark_receipt_emailed(receipt_id, at),
        )
        .await
    }

    async fn notification_sent(
        &self,
        account_id: &str,
        kind: NotificationKind,
        boundary: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.observe(
            "notification_sent",
            self.inner.notification_sent(account_id, kind, boundary),
        )
        .await
    }

    async fn record_notification(
        &self,
        account_id: &str,
        kind: NotificationKind,
        boundary: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.observe(
            "record_notification",
            self.inner
                .record_notification(account_id, kind, boundary, sent_at, expires_at),
        )
        .await
    }

    async fn purge_notifications(&self, now: DateTime<Utc>) -> DbResult<u64> {
        self.observe("purge_notifications", self.inner.purge_notifications(now))
            .await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;
    use chrono::TimeZone;
    use movo_core::{clock, BillingPolicy, Contact};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_instrumented_store_delegates() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store: Arc<dyn BillingStore> = Arc::new(InstrumentedStore::new(db));

        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let profile =
            clock::start_trial("acct-1", Contact::default(), created, &BillingPolicy::default());
        store.insert_profile(&profile).await.unwrap();

        assert_eq!(store.get_profile("acct-1").await.unwrap(), Some(profile.clone()));
        assert_eq!(store.list_account_ids().await.unwrap(), vec!["acct-1".to_string()]);

        store.update_profile(&profile, 0).await.unwrap();
        let err = store.update_profile(&profile, 0).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
