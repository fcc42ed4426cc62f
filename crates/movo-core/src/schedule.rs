//! # Notification Schedule
//!
//! Decides whether an account is owed a reminder today, and which one.
//!
//! ```text
//! status     boundary             thresholds (days left)   kind
//! ─────────  ───────────────────  ───────────────────────  ──────────
//! trialing   trial_ends_at        7, 3, 2, 1, 0            trial_N
//! active     current_period_end   3, 2, 1, 0               due_N
//! grace      grace_ends_at        2, 1, 0                  grace_N
//! blocked    blocked_at           once                     blocked
//! canceled   -                    -                        -
//! ```
//!
//! Day counts are calendar days in UTC, so a trial ending on the 16th is
//! "1 day left" for the whole of the 15th regardless of the hour the cycle
//! runs. The `(account, kind, boundary)` triple returned here is the
//! deduplication key of the notification log.

use chrono::{DateTime, Utc};

use crate::policy::BillingPolicy;
use crate::types::{BillingProfile, BillingStatus, NotificationKind};

/// A reminder that is due for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueNotice {
    pub kind: NotificationKind,
    /// Boundary the reminder is about; part of the dedup key.
    pub boundary: DateTime<Utc>,
    pub days_remaining: i64,
}

/// Calendar days (UTC) from `now` until `boundary`. Negative once past.
pub fn days_until(boundary: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (boundary.date_naive() - now.date_naive()).num_days()
}

/// Returns the reminder due for `profile` at `now`, if any.
///
/// Expects a profile already brought current by the clock. A boundary that
/// has already passed never yields a countdown reminder, even on the same
/// calendar day.
pub fn due_notice(
    profile: &BillingProfile,
    now: DateTime<Utc>,
    policy: &BillingPolicy,
) -> Option<DueNotice> {
    let (boundary, thresholds, make): (DateTime<Utc>, &[u32], fn(u32) -> NotificationKind) =
        match profile.status {
            BillingStatus::Trialing => (
                profile.trial_ends_at?,
                policy.trial_thresholds.as_slice(),
                NotificationKind::Trial as fn(u32) -> NotificationKind,
            ),
            BillingStatus::Active => (
                profile.current_period_end?,
                policy.due_thresholds.as_slice(),
                NotificationKind::Due as fn(u32) -> NotificationKind,
            ),
            BillingStatus::Grace => (
                profile.grace_ends_at?,
                policy.grace_thresholds.as_slice(),
                NotificationKind::Grace as fn(u32) -> NotificationKind,
            ),
            BillingStatus::Blocked => {
                return profile.blocked_at.map(|boundary| DueNotice {
                    kind: NotificationKind::Blocked,
                    boundary,
                    days_remaining: 0,
                });
            }
            BillingStatus::Canceled => return None,
        };

    if now >= boundary {
        return None;
    }

    let days = days_until(boundary, now);
    let days_u32 = u32::try_from(days).ok()?;
    if !thresholds.contains(&days_u32) {
        return None;
    }

    Some(DueNotice {
        kind: make(days_u32),
        boundary,
        days_remaining: days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::types::Contact;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn trial_profile() -> BillingProfile {
        clock::start_trial(
            "acct-1",
            Contact::new("owner@shop.do", "Colmado Rosa"),
            at(2024, 1, 1, 0),
            &BillingPolicy::default(),
        )
    }

    #[test]
    fn test_days_until_uses_calendar_days() {
        assert_eq!(days_until(at(2024, 1, 16, 0), at(2024, 1, 15, 23)), 1);
        assert_eq!(days_until(at(2024, 1, 16, 0), at(2024, 1, 15, 0)), 1);
        assert_eq!(days_until(at(2024, 1, 16, 18), at(2024, 1, 16, 8)), 0);
        assert_eq!(days_until(at(2024, 1, 16, 0), at(2024, 1, 18, 0)), -2);
    }

    #[test]
    fn test_trial_reminder_on_threshold_days() {
        let policy = BillingPolicy::default();
        let p = trial_profile();

        let notice = due_notice(&p, at(2024, 1, 15, 8), &policy).unwrap();
        assert_eq!(notice.kind, NotificationKind::Trial(1));
        assert_eq!(notice.boundary, at(2024, 1, 16, 0));

        let notice = due_notice(&p, at(2024, 1, 9, 8), &policy).unwrap();
        assert_eq!(notice.kind, NotificationKind::Trial(7));

        // 5 days left is not a threshold.
        assert!(due_notice(&p, at(2024, 1, 11, 8), &policy).is_none());
    }

    #[test]
    fn test_same_day_reminder_only_before_boundary() {
        let policy = BillingPolicy::default();
        let mut p = trial_profile();
        p.trial_ends_at = Some(at(2024, 1, 16, 18));

        let notice = due_notice(&p, at(2024, 1, 16, 8), &policy).unwrap();
        assert_eq!(notice.kind, NotificationKind::Trial(0));
        assert!(due_notice(&p, at(2024, 1, 16, 19), &policy).is_none());
    }

    #[test]
    fn test_due_and_grace_reminders() {
        let policy = BillingPolicy::default();
        let mut p = trial_profile();
        p.status = BillingStatus::Active;
        p.current_period_end = Some(at(2024, 3, 1, 0));

        let notice = due_notice(&p, at(2024, 2, 27, 8), &policy).unwrap();
        assert_eq!(notice.kind, NotificationKind::Due(3));

        p = clock::recompute(&p, at(2024, 3, 1, 8), &policy).unwrap().profile;
        assert_eq!(p.status, BillingStatus::Grace);
        let notice = due_notice(&p, at(2024, 3, 2, 8), &policy).unwrap();
        assert_eq!(notice.kind, NotificationKind::Grace(2));
        assert_eq!(notice.boundary, at(2024, 3, 4, 0));
    }

    #[test]
    fn test_blocked_notice_keyed_by_block_boundary() {
        let policy = BillingPolicy::default();
        let blocked = clock::recompute(&trial_profile(), at(2024, 1, 17, 8), &policy)
            .unwrap()
            .profile;

        let first = due_notice(&blocked, at(2024, 1, 17, 8), &policy).unwrap();
        let later = due_notice(&blocked, at(2024, 1, 25, 8), &policy).unwrap();
        assert_eq!(first.kind, NotificationKind::Blocked);
        assert_eq!(first.boundary, at(2024, 1, 16, 0));
        assert_eq!(first.boundary, later.boundary);
    }

    #[test]
    fn test_canceled_gets_nothing() {
        let policy = BillingPolicy::default();
        let canceled = clock::cancel(&trial_profile(), at(2024, 1, 2, 0)).profile;
        let day_before_end = at(2024, 1, 16, 0) - Duration::days(1);
        assert!(due_notice(&canceled, day_before_end, &policy).is_none());
    }
}
