/// Per-user overview shown on the landing page
use crate::db::models::{BillingCycle, SubscriptionDetail};
use serde::Serialize;
use sqlx::FromRow;

/// Days ahead covered by `upcoming_renewals`, today included
pub const UPCOMING_RENEWAL_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct PlatformSubscriptionCount {
    pub platform_name: String,
    pub subscription_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub active_subscriptions_count: i64,
    pub estimated_monthly_spending: f64,
    pub estimated_yearly_spending: f64,
    /// Active subscriptions renewing within the next 30 days, soonest first
    pub upcoming_renewals: Vec<SubscriptionDetail>,
    /// Active subscriptions grouped by platform name
    pub subscriptions_by_platform: Vec<PlatformSubscriptionCount>,
    pub total_email_accounts: i64,
    pub total_platforms: i64,
    pub total_platform_registrations: i64,
    pub total_service_subscriptions: i64,
}

/// Monthly and yearly spend of the given `(cycle, cost)` pairs.
///
/// One-time and free subscriptions add nothing recurring.
pub fn estimated_spending(subscriptions: impl IntoIterator<Item = (BillingCycle, f64)>) -> (f64, f64) {
    subscriptions
        .into_iter()
        .fold((0.0, 0.0), |(monthly, yearly), (cycle, cost)| match cycle {
            BillingCycle::Monthly => (monthly + cost, yearly + cost * 12.0),
            BillingCycle::Quarterly => (monthly + cost / 3.0, yearly + cost * 4.0),
            BillingCycle::Yearly => (monthly + cost / 12.0, yearly + cost),
            BillingCycle::OneTime | BillingCycle::Free => (monthly, yearly),
        })
}
