//! # Receipt Repository
//!
//! Receipts are immutable and numbered per account: `REC-00001`,
//! `REC-00002`, ... At most one receipt exists per payment.
//!
//! ## Numbering
//! ```text
//! BEGIN
//!   SELECT COALESCE(MAX(sequence), 0) + 1 FROM billing_receipts WHERE account_id = ?
//!   INSERT ... (sequence = n, number = 'REC-0000n')
//! COMMIT
//!
//! UNIQUE(account_id, payment_id)  → second receipt for a payment is refused
//! UNIQUE(account_id, sequence)    → two writers never share a number
//! ```
//!
//! On a unique violation the writer re-reads: if the receipt for this
//! payment now exists it is returned, otherwise the numbering is retried.
//!
//! The account's fiscal identity is copied onto the receipt inside the same
//! transaction. `email_sent_at` is the only column written after issue.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use movo_core::{BillingPayment, BillingReceipt};

const RECEIPT_COLUMNS: &str = r#"
    id, account_id, payment_id, sequence, number, amount_cents, currency,
    provider, period_start, period_end, legal_name, tax_id, address,
    issued_at, email_sent_at
"#;

/// Attempts at claiming a sequence number before giving up.
const MAX_NUMBERING_ATTEMPTS: u32 = 5;

/// Repository for receipt operations.
#[derive(Debug, Clone)]
pub struct ReceiptRepository {
    pool: SqlitePool,
}

impl ReceiptRepository {
    /// Creates a new ReceiptRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReceiptRepository { pool }
    }

    /// Gets the receipt issued for a payment.
    pub async fn get_by_payment(
        &self,
        account_id: &str,
        payment_id: &str,
    ) -> DbResult<Option<BillingReceipt>> {
        let sql = format!(
            "SELECT {} FROM billing_receipts WHERE account_id = ? AND payment_id = ?",
            RECEIPT_COLUMNS
        );
        let receipt = sqlx::query_as::<_, BillingReceipt>(&sql)
            .bind(account_id)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(receipt)
    }

    /// Lists an account's receipts in sequence order.
    pub async fn list_for_account(&self, account_id: &str) -> DbResult<Vec<BillingReceipt>> {
        let sql = format!(
            "SELECT {} FROM billing_receipts WHERE account_id = ? ORDER BY sequence ASC",
            RECEIPT_COLUMNS
        );
        let receipts = sqlx::query_as::<_, BillingReceipt>(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(receipts)
    }

    /// Lists receipts issued at or after `issued_since` whose email has not
    /// gone out yet, oldest first.
    pub async fn list_unsent(
        &self,
        account_id: &str,
        issued_since: DateTime<Utc>,
    ) -> DbResult<Vec<BillingReceipt>> {
        let sql = format!(
            r#"
            SELECT {} FROM billing_receipts
            WHERE account_id = ? AND email_sent_at IS NULL AND issued_at >= ?
            ORDER BY sequence ASC
            "#,
            RECEIPT_COLUMNS
        );
        let receipts = sqlx::query_as::<_, BillingReceipt>(&sql)
            .bind(account_id)
            .bind(issued_since)
            .fetch_all(&self.pool)
            .await?;

        Ok(receipts)
    }

    /// Stamps `email_sent_at`. Returns false if it was already stamped.
    pub async fn mark_emailed(&self, receipt_id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE billing_receipts SET email_sent_at = ? WHERE id = ? AND email_sent_at IS NULL",
        )
        .bind(at)
        .bind(receipt_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Issues the receipt for a confirmed payment, or returns the existing one.
    ///
    /// The caller checks that the payment is confirmed.
    pub async fn create_for_payment(
        &self,
        payment: &BillingPayment,
        issued_at: DateTime<Utc>,
    ) -> DbResult<BillingReceipt> {
        for attempt in 1..=MAX_NUMBERING_ATTEMPTS {
            if let Some(existing) = self.get_by_payment(&payment.account_id, &payment.id).await? {
                return Ok(existing);
            }

            match self.insert_next(payment, issued_at).await {
                Ok(receipt) => return Ok(receipt),
                Err(DbError::UniqueViolation { field, .. }) => {
                    warn!(
                        payment_id = %payment.id,
                        attempt,
                        field = %field,
                        "Receipt numbering collided, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(existing) = self.get_by_payment(&payment.account_id, &payment.id).await? {
            return Ok(existing);
        }

        Err(DbError::Internal(format!(
            "could not number receipt for payment {} after {} attempts",
            payment.id, MAX_NUMBERING_ATTEMPTS
        )))
    }

    async fn insert_next(
        &self,
        payment: &BillingPayment,
        issued_at: DateTime<Utc>,
    ) -> DbResult<BillingReceipt> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let sequence: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM billing_receipts WHERE account_id = ?",
        )
        .bind(&payment.account_id)
        .fetch_one(&mut *tx)
        .await?;

        let (legal_name, tax_id, address): (Option<String>, Option<String>, Option<String>) =
            sqlx::query_as(
                "SELECT legal_name, tax_id, billing_address FROM billing_profiles WHERE account_id = ?",
            )
            .bind(&payment.account_id)
            .fetch_optional(&mut *tx)
            .await?
            .unwrap_or_default();

        let receipt = BillingReceipt {
            id: Uuid::new_v4().to_string(),
            account_id: payment.account_id.clone(),
            payment_id: payment.id.clone(),
            sequence,
            number: BillingReceipt::format_number(sequence),
            amount_cents: payment.amount_cents,
            currency: payment.currency,
            provider: payment.provider,
            period_start: payment.period_start,
            period_end: payment.period_end,
            legal_name,
            tax_id,
            address,
            issued_at,
            email_sent_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO billing_receipts (
                id, account_id, payment_id, sequence, number, amount_cents,
                currency, provider, period_start, period_end, legal_name, tax_id,
                address, issued_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&receipt.id)
        .bind(&receipt.account_id)
        .bind(&receipt.payment_id)
        .bind(receipt.sequence)
        .bind(&receipt.number)
        .bind(receipt.amount_cents)
        .bind(receipt.currency)
        .bind(receipt.provider)
        .bind(receipt.period_start)
        .bind(receipt.period_end)
        .bind(&receipt.legal_name)
        .bind(&receipt.tax_id)
        .bind(&receipt.address)
        .bind(receipt.issued_at)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(
            account_id = %receipt.account_id,
            payment_id = %receipt.payment_id,
            number = %receipt.number,
            "Receipt issued"
        );

        Ok(receipt)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
