/// Renewal reminders
///
/// A subscription is due when it is active and its next renewal date falls
/// between today and today plus the lookahead window, both ends inclusive,
/// compared as UTC calendar days. The per-user query and the periodic sweep
/// share that predicate; the sweep only reports what it finds.

use crate::{
    clock::Clock,
    db::models::{SubscriptionStatus, UserId},
    error::{VaultError, VaultResult},
    metrics,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;

const REMINDER_SELECT: &str = "SELECT s.id, s.user_id, s.service_name, p.name AS platform_name,
        s.next_renewal_date, s.status, s.is_read
     FROM service_subscription s
     JOIN platform_registration r ON r.id = s.platform_registration_id
     JOIN platform p ON p.id = r.platform_id
     WHERE s.deleted_at IS NULL AND r.deleted_at IS NULL AND s.status = 'active'";

#[derive(Debug, Clone, FromRow)]
struct ReminderRow {
    id: i64,
    user_id: UserId,
    service_name: String,
    platform_name: String,
    next_renewal_date: Option<NaiveDate>,
    status: SubscriptionStatus,
    is_read: bool,
}

/// Subscription renewing soon, as shown to its owner
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Reminder {
    pub id: i64,
    pub service_name: String,
    pub platform_name: String,
    pub renewal_date: NaiveDate,
    pub days_remaining: i64,
    pub status: SubscriptionStatus,
    pub is_read: bool,
}

/// Outcome of one sweep over every user's subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub due: usize,
    pub skipped_without_date: usize,
    pub failed_rows: usize,
}

/// Whole days until `renewal_date` starts, never negative
pub fn days_remaining(renewal_date: NaiveDate, now: DateTime<Utc>) -> i64 {
    let renews_at = Utc.from_utc_datetime(&renewal_date.and_time(NaiveTime::MIN));
    (renews_at - now).num_hours().div_euclid(24).max(0)
}

/// Reminder service
pub struct ReminderService {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    window_days: i64,
}

impl ReminderService {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>, window_days: i64) -> Self {
        Self {
            db,
            clock,
            window_days,
        }
    }

    /// First and last renewal day inside the window
    fn window(&self, now: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
        let today = now.date_naive();
        (today, today + Duration::days(self.window_days))
    }

    fn to_reminder(row: ReminderRow, renewal_date: NaiveDate, now: DateTime<Utc>) -> Reminder {
        Reminder {
            id: row.id,
            service_name: row.service_name,
            platform_name: row.platform_name,
            renewal_date,
            days_remaining: days_remaining(renewal_date, now),
            status: row.status,
            is_read: row.is_read,
        }
    }

    /// Due subscriptions owned by `user_id`, soonest first
    pub async fn get_user_reminders(&self, user_id: UserId) -> VaultResult<Vec<Reminder>> {
        let now = self.clock.now();
        let (start, end) = self.window(now);

        let rows = sqlx::query_as::<_, ReminderRow>(&format!(
            "{} AND r.user_id = ?1 AND s.next_renewal_date >= ?2 AND s.next_renewal_date <= ?3
             ORDER BY s.next_renewal_date ASC, s.id ASC",
            REMINDER_SELECT
        ))
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let date = row.next_renewal_date?;
                Some(Self::to_reminder(row, date, now))
            })
            .collect())
    }

    /// Mark a reminder as read. Marking twice is not an error.
    pub async fn mark_as_read(&self, user_id: UserId, subscription_id: i64) -> VaultResult<()> {
        let result = sqlx::query(
            "UPDATE service_subscription SET is_read = 1
             WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        )
        .bind(subscription_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound(
                "Service subscription not found".to_string(),
            ));
        }
        Ok(())
    }

    /// Scan every user's active subscriptions and log the ones due. Rows that
    /// fail to decode are logged and skipped.
    pub async fn sweep(&self) -> VaultResult<SweepReport> {
        let now = self.clock.now();
        let (start, end) = self.window(now);

        let rows = sqlx::query(&format!(
            "{} AND (s.next_renewal_date IS NULL
                  OR (s.next_renewal_date >= ?1 AND s.next_renewal_date <= ?2))
             ORDER BY s.next_renewal_date ASC, s.id ASC",
            REMINDER_SELECT
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;

        let mut report = SweepReport::default();
        for raw in rows {
            let row = match ReminderRow::from_row(&raw) {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!("Skipping undecodable subscription row: {}", e);
                    report.failed_rows += 1;
                    continue;
                }
            };

            let Some(date) = row.next_renewal_date else {
                tracing::info!(
                    subscription_id = row.id,
                    service = %row.service_name,
                    platform = %row.platform_name,
                    "Subscription has no renewal date"
                );
                report.skipped_without_date += 1;
                continue;
            };

            let user_id = row.user_id;
            let reminder = Self::to_reminder(row, date, now);
            tracing::debug!(
                user_id = %user_id,
                subscription_id = reminder.id,
                service = %reminder.service_name,
                platform = %reminder.platform_name,
                renewal_date = %reminder.renewal_date,
                days_remaining = reminder.days_remaining,
                "Upcoming renewal"
            );
            report.due += 1;
        }

        metrics::REMINDERS_DUE.set(report.due as i64);
        if report.due > 0 {
            tracing::info!(due = report.due, window_days = self.window_days, "Found upcoming renewals");
        } else {
            tracing::info!(window_days = self.window_days, "No upcoming renewals");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::FixedClock,
        db::{insert_test_user, test_pool},
        subscription::insert_test_subscription,
    };

    const NOW: &str = "2026-03-01T00:00:00Z";

    struct Fixture {
        db: SqlitePool,
        service: ReminderService,
        user: UserId,
        registration_id: i64,
    }

    async fn fixture() -> Fixture {
        let db = test_pool().await;
        let user = insert_test_user(&db, "alice").await;
        let registration_id = insert_registration(&db, user, "Spotify").await;
        let service = ReminderService::new(db.clone(), Arc::new(FixedClock::at(NOW)), 30);
        Fixture {
            db,
            service,
            user,
            registration_id,
        }
    }

    async fn insert_registration(db: &SqlitePool, user: UserId, platform: &str) -> i64 {
        let now = Utc::now();
        let platform_id: i64 = sqlx::query_scalar(
            "INSERT INTO platform (user_id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3) RETURNING id",
        )
        .bind(user)
        .bind(platform)
        .bind(now)
        .fetch_one(db)
        .await
        .unwrap();
        sqlx::query_scalar(
            "INSERT INTO platform_registration (user_id, platform_id, login_username, created_at, updated_at)
             VALUES (?1, ?2, 'alice', ?3, ?3) RETURNING id",
        )
        .bind(user)
        .bind(platform_id)
        .bind(now)
        .fetch_one(db)
        .await
        .unwrap()
    }

    impl Fixture {
        async fn subscription(&self, name: &str, days_ahead: Option<i64>, status: &str) -> i64 {
            let id =
                insert_test_subscription(&self.db, self.user, self.registration_id, name).await;
            let date = days_ahead.map(|d| {
                FixedClock::at(NOW).0.date_naive() + Duration::days(d)
            });
            sqlx::query(
                "UPDATE service_subscription SET next_renewal_date = ?1, status = ?2 WHERE id = ?3",
            )
            .bind(date)
            .bind(status)
            .bind(id)
            .execute(&self.db)
            .await
            .unwrap();
            id
        }
    }

    #[test]
    fn test_days_remaining() {
        let now = FixedClock::at("2026-03-01T10:00:00Z").0;
        let date = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();

        assert_eq!(days_remaining(date("2026-03-31"), now), 29);
        assert_eq!(days_remaining(date("2026-03-02"), now), 0);
        // Renewing today is already past midnight
        assert_eq!(days_remaining(date("2026-03-01"), now), 0);
    }

    #[tokio::test]
    async fn test_window_boundaries() {
        let f = fixture().await;
        f.subscription("in-29", Some(29), "active").await;
        f.subscription("in-30", Some(30), "active").await;
        f.subscription("out-31", Some(31), "active").await;
        f.subscription("cancelled-5", Some(5), "cancelled").await;
        f.subscription("yesterday", Some(-1), "active").await;
        f.subscription("undated", None, "active").await;

        let reminders = f.service.get_user_reminders(f.user).await.unwrap();
        let names: Vec<_> = reminders.iter().map(|r| r.service_name.as_str()).collect();
        assert_eq!(names, vec!["in-29", "in-30"]);
        assert_eq!(reminders[0].days_remaining, 29);
        assert_eq!(reminders[1].days_remaining, 30);
        assert_eq!(reminders[0].platform_name, "Spotify");
    }

    #[tokio::test]
    async fn test_due_today_clamps_to_zero() {
        let f = fixture().await;
        f.subscription("today", Some(0), "active").await;

        let reminders = f.service.get_user_reminders(f.user).await.unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].days_remaining, 0);
    }

    #[tokio::test]
    async fn test_reminders_are_scoped_to_owner() {
        let f = fixture().await;
        f.subscription("mine", Some(3), "active").await;

        let bob = insert_test_user(&f.db, "bob").await;
        assert!(f.service.get_user_reminders(bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_as_read_is_idempotent() {
        let f = fixture().await;
        let id = f.subscription("mine", Some(3), "active").await;

        f.service.mark_as_read(f.user, id).await.unwrap();
        f.service.mark_as_read(f.user, id).await.unwrap();

        let reminders = f.service.get_user_reminders(f.user).await.unwrap();
        assert!(reminders[0].is_read);

        let bob = insert_test_user(&f.db, "bob").await;
        assert!(matches!(
            f.service.mark_as_read(bob, id).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_counts_due_and_undated() {
        let f = fixture().await;
        f.subscription("due", Some(10), "active").await;
        f.subscription("late", Some(45), "active").await;
        f.subscription("undated", None, "active").await;

        let bob = insert_test_user(&f.db, "bob").await;
        let bobs = insert_registration(&f.db, bob, "Netflix").await;
        let id = insert_test_subscription(&f.db, bob, bobs, "Standard").await;
        sqlx::query("UPDATE service_subscription SET next_renewal_date = '2026-03-15' WHERE id = ?1")
            .bind(id)
            .execute(&f.db)
            .await
            .unwrap();

        let report = f.service.sweep().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                due: 2,
                skipped_without_date: 1,
                failed_rows: 0,
            }
        );
    }
}
