//! # Billing Profile Repository
//!
//! One row per account. Every write after creation goes through
//! [`ProfileRepository::update_if_version`], which only succeeds when the
//! stored `version` still matches what the caller read.
//!
//! ## Compare-and-Swap
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UPDATE billing_profiles                                               │
//! │     SET status = ?, ..., version = version + 1                          │
//! │   WHERE account_id = ? AND version = ?expected                          │
//! │                                                                         │
//! │  1 row  → committed, returned profile carries expected + 1              │
//! │  0 rows → row missing (NotFound) or moved on (VersionConflict)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use movo_core::BillingProfile;

pub(crate) const PROFILE_COLUMNS: &str = r#"
    account_id, status, currency, provider, contact_email, display_name,
    legal_name, tax_id, billing_address, trial_started_at, trial_ends_at, current_period_start, current_period_end,
    grace_ends_at, blocked_at, canceled_at, pending_currency, pending_provider,
    created_at, updated_at, version
"#;

/// Repository for billing profile operations.
#[derive(Debug, Clone)]
pub struct ProfileRepository {
    pool: SqlitePool,
}

impl ProfileRepository {
    /// Creates a new ProfileRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProfileRepository { pool }
    }

    /// Inserts a new profile.
    ///
    /// Fails with `UniqueViolation` if the account already has one.
    pub async fn insert(&self, profile: &BillingProfile) -> DbResult<()> {
        debug!(account_id = %profile.account_id, status = %profile.status, "Inserting billing profile");

        sqlx::query(
            r#"
            INSERT INTO billing_profiles (
                account_id, status, currency, provider, contact_email, display_name,
                legal_name, tax_id, billing_address,
                trial_started_at, trial_ends_at, current_period_start, current_period_end,
                grace_ends_at, blocked_at, canceled_at, pending_currency, pending_provider,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.account_id)
        .bind(profile.status)
        .bind(profile.currency)
        .bind(profile.provider)
        .bind(&profile.contact_email)
        .bind(&profile.display_name)
        .bind(&profile.legal_name)
        .bind(&profile.tax_id)
        .bind(&profile.billing_address)
        .bind(profile.trial_started_at)
        .bind(profile.trial_ends_at)
        .bind(profile.current_period_start)
        .bind(profile.current_period_end)
        .bind(profile.grace_ends_at)
        .bind(profile.blocked_at)
        .bind(profile.canceled_at)
        .bind(profile.pending_currency)
        .bind(profile.pending_provider)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .bind(profile.version)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: profile.account_id.clone(),
            },
            other => other,
        })?;

        Ok(())
    }

    /// Gets a profile by account ID.
    pub async fn get(&self, account_id: &str) -> DbResult<Option<BillingProfile>> {
        let sql = format!(
            "SELECT {} FROM billing_profiles WHERE account_id = ?",
            PROFILE_COLUMNS
        );
        let profile = sqlx::query_as::<_, BillingProfile>(&sql)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(profile)
    }

    /// Lists every account ID, in a stable order.
    pub async fn list_account_ids(&self) -> DbResult<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT account_id FROM billing_profiles ORDER BY account_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(ids)
    }

    /// Persists `profile` if the stored version is still `expected_version`.
    ///
    /// Returns the profile as stored (with the incremented version).
    pub async fn update_if_version(
        &self,
        profile: &BillingProfile,
        expected_version: i64,
    ) -> DbResult<BillingProfile> {
        let rows = cas_update(&self.pool, profile, expected_version).await?;
        if rows == 0 {
            return Err(self.miss(&profile.account_id, expected_version).await);
        }

        debug!(
            account_id = %profile.account_id,
            version = expected_version + 1,
            status = %profile.status,
            "Billing profile updated"
        );

        let mut stored = profile.clone();
        stored.version = expected_version + 1;
        Ok(stored)
    }

    /// Distinguishes a missing row from a lost race.
    async fn miss(&self, account_id: &str, expected_version: i64) -> DbError {
        match self.get(account_id).await {
            Ok(Some(_)) => DbError::VersionConflict {
                account_id: account_id.to_string(),
                expected_version,
            },
            Ok(None) => DbError::not_found("billing_profile", account_id),
            Err(e) => e,
        }
    }
}

/// Version-checked profile write against any executor (pool or transaction).
///
/// Returns the number of rows affected: 1 on success, 0 if the version moved.
pub(crate) async fn cas_update<'e, E>(
    executor: E,
    profile: &BillingProfile,
    expected_version: i64,
) -> DbResult<u64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE billing_profiles SET
            status = ?,
            currency = ?,
            provider = ?,
            contact_email = ?,
            display_name = ?,
            legal_name = ?,
            tax_id = ?,
            billing_address = ?,
            trial_ends_at = ?,
            current_period_start = ?,
            current_period_end = ?,
            grace_ends_at = ?,
            blocked_at = ?,
            canceled_at = ?,
            pending_currency = ?,
            pending_provider = ?,
            updated_at = ?,
            version = version + 1
        WHERE account_id = ? AND version = ?
        "#,
    )
    .bind(profile.status)
    .bind(profile.currency)
    .bind(profile.provider)
    .bind(&profile.contact_email)
    .bind(&profile.display_name)
    .bind(&profile.legal_name)
    .bind(&profile.tax_id)
    .bind(&profile.billing_address)
    .bind(profile.trial_ends_at)
    .bind(profile.current_period_start)
    .bind(profile.current_period_end)
    .bind(profile.grace_ends_at)
    .bind(profile.blocked_at)
    .bind(profile.canceled_at)
    .bind(profile.pending_currency)
    .bind(profile.pending_provider)
    .bind(profile.updated_at)
    .bind(&profile.account_id)
    .bind(expected_version)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{TimeZone, Utc};
    use movo_core::clock;
    use movo_core::{BillingPolicy, BillingStatus, Contact, FiscalIdentity};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn trial_profile(account_id: &str) -> BillingProfile {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        clock::start_trial(
            account_id,
            Contact::new("owner@example.com", "Owner"),
            created,
            &BillingPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let db = test_db().await;
        let profile = trial_profile("acct-1");
        db.profiles().insert(&profile).await.unwrap();

        let loaded = db.profiles().get("acct-1").await.unwrap().unwrap();
        assert_eq!(loaded, profile);
        assert!(db.profiles().get("acct-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let db = test_db().await;
        let profile = trial_profile("acct-1");
        db.profiles().insert(&profile).await.unwrap();

        let err = db.profiles().insert(&profile).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_update_if_version_detects_conflict() {
        let db = test_db().await;
        let mut profile = trial_profile("acct-1");
        db.profiles().insert(&profile).await.unwrap();

        profile.status = BillingStatus::Blocked;
        let stored = db.profiles().update_if_version(&profile, 0).await.unwrap();
        assert_eq!(stored.version, 1);

        // Second writer still holding version 0 loses.
        let err = db.profiles().update_if_version(&profile, 0).await.unwrap_err();
        assert!(err.is_conflict());

        let loaded = db.profiles().get("acct-1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.status, BillingStatus::Blocked);
    }

    #[tokio::test]
    async fn test_update_missing_profile_is_not_found() {
        let db = test_db().await;
        let profile = trial_profile("acct-ghost");
        let err = db.profiles().update_if_version(&profile, 0).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_account_ids_sorted() {
        let db = test_db().await;
        db.profiles().insert(&trial_profile("acct-b")).await.unwrap();
        db.profiles().insert(&trial_profile("acct-a")).await.unwrap();

        assert_eq!(
            db.profiles().list_account_ids().await.unwrap(),
            vec!["acct-a".to_string(), "acct-b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fiscal_identity_persists() {
        let db = test_db().await;
        let profile = trial_profile("acct-1");
        db.profiles().insert(&profile).await.unwrap();

        let identity = FiscalIdentity {
            legal_name: "Colmado Rosa SRL".to_string(),
            tax_id: "131-12345-6".to_string(),
            address: "Calle El Conde 12".to_string(),
        };
        let next = clock::set_fiscal_identity(&profile, &identity, profile.created_at).profile;
        db.profiles().update_if_version(&next, 0).await.unwrap();

        let loaded = db.profiles().get("acct-1").await.unwrap().unwrap();
        assert_eq!(loaded.fiscal_identity(), Some(identity));
    }
}
