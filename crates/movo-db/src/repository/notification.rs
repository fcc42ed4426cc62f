//! # Notification Log Repository
//!
//! Remembers which reminders were delivered so each one goes out at most
//! once per `(account, kind, boundary)`. Entries expire after the
//! retention window and are purged by the daily cycle.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use movo_core::NotificationKind;

/// Repository for the notification log.
#[derive(Debug, Clone)]
pub struct NotificationLogRepository {
    pool: SqlitePool,
}

impl NotificationLogRepository {
    /// Creates a new NotificationLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        NotificationLogRepository { pool }
    }

    /// Returns true if this reminder was already delivered.
    pub async fn exists(
        &self,
        account_id: &str,
        kind: NotificationKind,
        boundary: DateTime<Utc>,
    ) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notification_log
            WHERE account_id = ? AND kind = ? AND boundary = ?
            "#,
        )
        .bind(account_id)
        .bind(kind.key())
        .bind(boundary)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Records a delivered reminder.
    ///
    /// Returns `false` if an entry for the same key already existed.
    pub async fn record(
        &self,
        account_id: &str,
        kind: NotificationKind,
        boundary: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO notification_log (id, account_id, kind, boundary, sent_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(account_id)
        .bind(kind.key())
        .bind(boundary)
        .bind(sent_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Deletes entries whose expiry is before `now`. Returns how many went.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result =
            sqlx::query("DELETE FROM notification_log WHERE julianday(expires_at) < julianday(?)")
                .bind(now)
                .execute(&self.pool)
                .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged, "Purged expired notification log entries");
        }
        Ok(purged)
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
    use movo_core::{clock, BillingPolicy, Contact};

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let profile =
            clock::start_trial("acct-1", Contact::default(), created, &BillingPolicy::default());
        db.profiles().insert(&profile).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_record_once_per_key() {
        let db = setup().await;
        let boundary = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        let sent = Utc.with_ymd_and_hms(2024, 1, 9, 8, 0, 0).unwrap();
        let expires = sent + Duration::days(90);
        let log = db.notifications();

        assert!(!log.exists("acct-1", NotificationKind::Trial(7), boundary).await.unwrap());
        assert!(log
            .record("acct-1", NotificationKind::Trial(7), boundary, sent, expires)
            .await
            .unwrap());
        assert!(!log
            .record("acct-1", NotificationKind::Trial(7), boundary, sent, expires)
            .await
            .unwrap());
        assert!(log.exists("acct-1", NotificationKind::Trial(7), boundary).await.unwrap());

        // Same kind against a different boundary is a different reminder.
        let next_boundary = boundary + Duration::days(30);
        assert!(!log.exists("acct-1", NotificationKind::Trial(7), next_boundary).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = setup().await;
        let boundary = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        let sent = Utc.with_ymd_and_hms(2024, 1, 9, 8, 0, 0).unwrap();
        let log = db.notifications();

        log.record("acct-1", NotificationKind::Trial(7), boundary, sent, sent + Duration::days(1))
            .await
            .unwrap();
        log.record("acct-1", NotificationKind::Trial(3), boundary, sent, sent + Duration::days(90))
            .await
            .unwrap();

        let purged = log.purge_expired(sent + Duration::days(2)).await.unwrap();
        assert_eq!(purged, 1);

        assert!(!log.exists("acct-1", NotificationKind::Trial(7), boundary).await.unwrap());
        assert!(log.exists("acct-1", NotificationKind::Trial(3), boundary).await.unwrap());
    }
}
