/// Subscription manager
///
/// Recurring services paid for through a platform registration. Each
/// subscription is owned by the registration's user and removed with it.

mod dashboard;
mod manager;

pub use dashboard::DashboardSummary;
pub use manager::SubscriptionManager;

use crate::{db::models::SortOrder, patch::Patch};
use serde::Deserialize;

/// New subscription under an owned registration
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscription {
    pub platform_registration_id: i64,
    pub service_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    #[serde(default)]
    pub cost: f64,
    pub billing_cycle: String,
    /// `YYYY-MM-DD`; absent or empty means no scheduled renewal
    #[serde(default)]
    pub next_renewal_date: Option<String>,
    #[serde(default)]
    pub payment_method_notes: Option<String>,
}

/// Partial update. The owning registration cannot be changed, so unknown
/// keys such as `platform_registration_id` are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionUpdate {
    #[serde(default)]
    pub service_name: Patch<String>,
    #[serde(default)]
    pub description: Patch<String>,
    #[serde(default)]
    pub status: Patch<String>,
    #[serde(default)]
    pub cost: Patch<f64>,
    #[serde(default)]
    pub billing_cycle: Patch<String>,
    /// Empty or `null` clears the renewal date
    #[serde(default)]
    pub next_renewal_date: Patch<Option<String>>,
    #[serde(default)]
    pub payment_method_notes: Patch<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionFilter {
    pub platform_registration_id: Option<i64>,
    pub status: Option<String>,
    pub billing_cycle: Option<String>,
    /// Inclusive `YYYY-MM-DD` bounds on the renewal date
    pub renewal_date_start: Option<String>,
    pub renewal_date_end: Option<String>,
    /// Case-insensitive substring of the platform name
    pub platform_name: Option<String>,
    /// Case-insensitive substring of the linked email address
    pub email: Option<String>,
    /// Case-insensitive exact login username
    pub username: Option<String>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
}

/// Insert an active monthly subscription directly, for tests of other modules
#[cfg(test)]
pub(crate) async fn insert_test_subscription(
    db: &sqlx::SqlitePool,
    user_id: crate::db::models::UserId,
    registration_id: i64,
    service_name: &str,
) -> i64 {
    let now = chrono::Utc::now();
    sqlx::query_scalar(
        "INSERT INTO service_subscription
            (user_id, platform_registration_id, service_name, status, cost, billing_cycle, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'active', 0, 'monthly', ?4, ?4)
         RETURNING id",
    )
    .bind(user_id)
    .bind(registration_id)
    .bind(service_name)
    .bind(now)
    .fetch_one(db)
    .await
    .unwrap()
}
