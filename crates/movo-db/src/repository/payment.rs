//! # Payment Repository
//!
//! Payments move PENDING → CONFIRMED or PENDING → REJECTED exactly once.
//!
//! ## Atomic Confirmation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │    UPDATE billing_payments SET status = 'confirmed', ...                │
//! │     WHERE id = ? AND status = 'pending'          (0 rows → StaleState)  │
//! │    UPDATE billing_profiles SET ..., version = version + 1               │
//! │     WHERE account_id = ? AND version = ?       (0 rows → VersionConflict│
//! │  COMMIT                                          payment stays pending) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Either both rows change or neither does.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::profile::cas_update;
use movo_core::{BillingPayment, BillingProfile};

const PAYMENT_COLUMNS: &str = r#"
    id, account_id, amount_cents, currency, provider, status, proof_url,
    idempotency_key, reference, confirmed_by, rejection_reason, created_at,
    confirmed_at, rejected_at, period_start, period_end
"#;

/// Everything one confirmation writes.
#[derive(Debug, Clone)]
pub struct ConfirmationWrite {
    pub payment_id: String,
    pub confirmed_at: DateTime<Utc>,
    /// Admin user id for manual confirmations, `None` for provider events.
    pub confirmed_by: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Profile after the payment was applied.
    pub profile: BillingProfile,
    /// Version the profile had when it was read.
    pub expected_version: i64,
}

/// Repository for payment operations.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Inserts a new payment.
    ///
    /// A reused `idempotency_key` fails with `UniqueViolation`.
    pub async fn insert(&self, payment: &BillingPayment) -> DbResult<()> {
        debug!(
            payment_id = %payment.id,
            account_id = %payment.account_id,
            amount_cents = payment.amount_cents,
            "Inserting payment"
        );

        sqlx::query(
            r#"
            INSERT INTO billing_payments (
                id, account_id, amount_cents, currency, provider, status, proof_url,
                idempotency_key, reference, confirmed_by, rejection_reason, created_at,
                confirmed_at, rejected_at, period_start, period_end
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.account_id)
        .bind(payment.amount_cents)
        .bind(payment.currency)
        .bind(payment.provider)
        .bind(payment.status)
        .bind(&payment.proof_url)
        .bind(&payment.idempotency_key)
        .bind(&payment.reference)
        .bind(&payment.confirmed_by)
        .bind(&payment.rejection_reason)
        .bind(payment.created_at)
        .bind(payment.confirmed_at)
        .bind(payment.rejected_at)
        .bind(payment.period_start)
        .bind(payment.period_end)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                value: payment
                    .idempotency_key
                    .clone()
                    .unwrap_or_else(|| payment.id.clone()),
                field,
            },
            other => other,
        })?;

        Ok(())
    }

    /// Gets a payment by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<BillingPayment>> {
        let sql = format!("SELECT {} FROM billing_payments WHERE id = ?", PAYMENT_COLUMNS);
        let payment = sqlx::query_as::<_, BillingPayment>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    /// Finds the payment recorded for a provider idempotency key.
    pub async fn get_by_idempotency_key(&self, key: &str) -> DbResult<Option<BillingPayment>> {
        let sql = format!(
            "SELECT {} FROM billing_payments WHERE idempotency_key = ?",
            PAYMENT_COLUMNS
        );
        let payment = sqlx::query_as::<_, BillingPayment>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    /// Lists an account's payments, newest first.
    pub async fn list_for_account(&self, account_id: &str) -> DbResult<Vec<BillingPayment>> {
        let sql = format!(
            "SELECT {} FROM billing_payments WHERE account_id = ? ORDER BY created_at DESC, id DESC",
            PAYMENT_COLUMNS
        );
        let payments = sqlx::query_as::<_, BillingPayment>(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    /// Confirmed payments of an account that have no receipt yet, oldest first.
    pub async fn list_confirmed_without_receipt(
        &self,
        account_id: &str,
    ) -> DbResult<Vec<BillingPayment>> {
        let sql = format!(
            r#"
            SELECT {} FROM billing_payments p
            WHERE p.account_id = ?
              AND p.status = 'confirmed'
              AND NOT EXISTS (
                  SELECT 1 FROM billing_receipts r
                  WHERE r.account_id = p.account_id AND r.payment_id = p.id
              )
            ORDER BY p.confirmed_at ASC, p.id ASC
            "#,
            PAYMENT_COLUMNS
        );
        let payments = sqlx::query_as::<_, BillingPayment>(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    /// Rejects a PENDING payment. The reason is optional.
    ///
    /// Returns `false` if the payment was no longer pending.
    pub async fn reject(
        &self,
        id: &str,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE billing_payments
               SET status = 'rejected', rejection_reason = ?, rejected_at = ?
             WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Confirms a payment and persists the extended profile in one transaction.
    ///
    /// ## Errors
    /// - `StaleState` if the payment already left PENDING
    /// - `VersionConflict` if the profile changed since it was read
    pub async fn confirm_with_profile(
        &self,
        write: &ConfirmationWrite,
    ) -> DbResult<(BillingPayment, BillingProfile)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let confirmed = sqlx::query(
            r#"
            UPDATE billing_payments
               SET status = 'confirmed', confirmed_at = ?, confirmed_by = ?,
                   period_start = ?, period_end = ?
             WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(write.confirmed_at)
        .bind(&write.confirmed_by)
        .bind(write.period_start)
        .bind(write.period_end)
        .bind(&write.payment_id)
        .execute(&mut *tx)
        .await?;

        if confirmed.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(DbError::StaleState {
                entity: "billing_payment".to_string(),
                id: write.payment_id.clone(),
            });
        }

        let updated = cas_update(&mut *tx, &write.profile, write.expected_version).await?;
        if updated == 0 {
            return Err(DbError::VersionConflict {
                account_id: write.profile.account_id.clone(),
                expected_version: write.expected_version,
            });
        }

        let sql = format!("SELECT {} FROM billing_payments WHERE id = ?", PAYMENT_COLUMNS);
        let payment = sqlx::query_as::<_, BillingPayment>(&sql)
            .bind(&write.payment_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(
            payment_id = %write.payment_id,
            account_id = %write.profile.account_id,
            "Payment confirmed"
        );

        let mut profile = write.profile.clone();
        profile.version = write.expected_version + 1;
        Ok((payment, profile))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{Duration, TimeZone};
    use movo_core::{clock, BillingPolicy, Contact, Currency, PaymentStatus, Provider};

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    async fn setup() -> (Database, BillingProfile) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let profile = clock::start_trial(
            "acct-1",
            Contact::new("owner@example.com", "Owner"),
            created(),
            &BillingPolicy::default(),
        );
        db.profiles().insert(&profile).await.unwrap();
        (db, profile)
    }

    fn pending(id: &str, key: Option<&str>, at: DateTime<Utc>) -> BillingPayment {
        BillingPayment {
            id: id.to_string(),
            account_id: "acct-1".to_string(),
            amount_cents: 130_000,
            currency: Currency::Dop,
            provider: Provider::Manual,
            status: PaymentStatus::Pending,
            proof_url: Some("https://files.example.com/proof.png".to_string()),
            idempotency_key: key.map(str::to_string),
            reference: None,
            confirmed_by: None,
            rejection_reason: None,
            created_at: at,
            confirmed_at: None,
            rejected_at: None,
            period_start: None,
            period_end: None,
        }
    }

    fn confirmation(profile: &BillingProfile, payment_id: &str) -> ConfirmationWrite {
        let policy = BillingPolicy::default();
        let at = created() + Duration::days(5);
        let transition = clock::apply_payment(profile, profile.currency, at, &policy).unwrap();
        let period = transition.paid_period.unwrap();
        ConfirmationWrite {
            payment_id: payment_id.to_string(),
            confirmed_at: at,
            confirmed_by: Some("admin-1".to_string()),
            period_start: period.start,
            period_end: period.end,
            profile: transition.profile,
            expected_version: profile.version,
        }
    }

    #[tokio::test]
    async fn test_idempotency_key_is_unique() {
        let (db, _) = setup().await;
        db.payments().insert(&pending("pay-1", Some("evt_1"), created())).await.unwrap();

        let err = db
            .payments()
            .insert(&pending("pay-2", Some("evt_1"), created()))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref value, .. } if value == "evt_1"));

        let found = db.payments().get_by_idempotency_key("evt_1").await.unwrap().unwrap();
        assert_eq!(found.id, "pay-1");
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let (db, _) = setup().await;
        db.payments().insert(&pending("pay-1", None, created())).await.unwrap();
        db.payments()
            .insert(&pending("pay-2", None, created() + Duration::hours(1)))
            .await
            .unwrap();

        let ids: Vec<String> = db
            .payments()
            .list_for_account("acct-1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["pay-2".to_string(), "pay-1".to_string()]);
    }

    #[tokio::test]
    async fn test_confirm_updates_payment_and_profile_together() {
        let (db, profile) = setup().await;
        db.payments().insert(&pending("pay-1", None, created())).await.unwrap();

        let write = confirmation(&profile, "pay-1");
        let (payment, stored) = db.payments().confirm_with_profile(&write).await.unwrap();

        assert_eq!(payment.status, PaymentStatus::Confirmed);
        assert_eq!(payment.confirmed_by.as_deref(), Some("admin-1"));
        assert_eq!(payment.period_end, Some(write.period_end));
        assert_eq!(stored.version, 1);

        let loaded = db.profiles().get("acct-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, movo_core::BillingStatus::Active);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_confirm_twice_is_stale() {
        let (db, profile) = setup().await;
        db.payments().insert(&pending("pay-1", None, created())).await.unwrap();

        let write = confirmation(&profile, "pay-1");
        db.payments().confirm_with_profile(&write).await.unwrap();

        let err = db.payments().confirm_with_profile(&write).await.unwrap_err();
        assert!(matches!(err, DbError::StaleState { .. }));
    }

    #[tokio::test]
    async fn test_version_conflict_rolls_back_payment() {
        let (db, profile) = setup().await;
        db.payments().insert(&pending("pay-1", None, created())).await.unwrap();

        // Another writer bumps the profile first.
        db.profiles().update_if_version(&profile, 0).await.unwrap();

        let write = confirmation(&profile, "pay-1");
        let err = db.payments().confirm_with_profile(&write).await.unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { .. }));

        let payment = db.payments().get("pay-1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.confirmed_at.is_none());
    }

    #[tokio::test]
    async fn test_reject_only_pending() {
        let (db, _) = setup().await;
        db.payments().insert(&pending("pay-1", None, created())).await.unwrap();

        assert!(db.payments().reject("pay-1", Some("blurry proof"), created()).await.unwrap());
        assert!(!db.payments().reject("pay-1", None, created()).await.unwrap());

        let payment = db.payments().get("pay-1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Rejected);
        assert_eq!(payment.rejection_reason.as_deref(), Some("blurry proof"));
    }
}
