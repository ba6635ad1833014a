/// Row types for the ownership graph
use crate::error::{VaultError, VaultResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Primary key of a user account. Every other row carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn from_str(s: &str) -> VaultResult<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(VaultError::invalid("role", format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Banned,
}

impl UserStatus {
    pub fn from_str(s: &str) -> VaultResult<Self> {
        match s {
            "active" => Ok(UserStatus::Active),
            "banned" => Ok(UserStatus::Banned),
            other => Err(VaultError::invalid("status", format!("unknown user status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    FreeTrial,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::FreeTrial => "free_trial",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> VaultResult<Self> {
        match s.trim() {
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "free_trial" => Ok(SubscriptionStatus::FreeTrial),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(VaultError::invalid(
                "status",
                format!(
                    "'{}' is not one of active, cancelled, free_trial, expired",
                    other
                ),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Yearly,
    OneTime,
    Free,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::Yearly => "yearly",
            BillingCycle::OneTime => "one_time",
            BillingCycle::Free => "free",
        }
    }

    pub fn from_str(s: &str) -> VaultResult<Self> {
        match s.trim() {
            "monthly" => Ok(BillingCycle::Monthly),
            "quarterly" => Ok(BillingCycle::Quarterly),
            "yearly" => Ok(BillingCycle::Yearly),
            "one_time" => Ok(BillingCycle::OneTime),
            "free" => Ok(BillingCycle::Free),
            other => Err(VaultError::invalid(
                "billing_cycle",
                format!(
                    "'{}' is not one of monthly, quarterly, yearly, one_time, free",
                    other
                ),
            )),
        }
    }
}

/// User record
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mailbox owned by a user
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EmailAccount {
    pub id: i64,
    pub user_id: UserId,
    pub email_address: String,
    pub provider: String,
    #[serde(skip_serializing)]
    pub password_encrypted: Option<String>,
    pub imap_server: Option<String>,
    pub imap_port: Option<i64>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Third-party site, private to one user
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Platform {
    pub id: i64,
    pub user_id: UserId,
    pub name: String,
    pub website_url: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An identity a user holds on a platform
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PlatformRegistration {
    pub id: i64,
    pub user_id: UserId,
    pub platform_id: i64,
    pub email_account_id: Option<i64>,
    pub login_username: Option<String>,
    #[serde(skip_serializing)]
    pub login_password_encrypted: Option<String>,
    pub notes: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration joined with the names a person recognises
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RegistrationDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub registration: PlatformRegistration,
    pub platform_name: String,
    pub email_address: Option<String>,
    pub has_password: bool,
}

/// Recurring service paid for through a registration
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ServiceSubscription {
    pub id: i64,
    pub user_id: UserId,
    pub platform_registration_id: i64,
    pub service_name: String,
    pub description: String,
    pub status: SubscriptionStatus,
    pub cost: f64,
    pub billing_cycle: BillingCycle,
    pub next_renewal_date: Option<NaiveDate>,
    pub payment_method_notes: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Subscription joined with its registration's platform and identity
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SubscriptionDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub subscription: ServiceSubscription,
    pub platform_name: String,
    pub email_address: Option<String>,
    pub login_username: Option<String>,
}

/// Requested slice of a listing. A page size of zero or less returns every row.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    10
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl Page {
    pub fn all() -> Self {
        Self { page: 1, page_size: 0 }
    }

    /// LIMIT/OFFSET pair, `None` when unbounded
    pub fn limit_offset(&self) -> Option<(i64, i64)> {
        if self.page_size <= 0 {
            return None;
        }
        let page = self.page.max(1);
        Some((self.page_size, (page - 1) * self.page_size))
    }

    pub fn meta(&self, total_items: i64) -> PageMeta {
        let (current_page, page_size, total_pages) = match self.limit_offset() {
            Some((size, _)) => (
                self.page.max(1),
                size,
                (total_items + size - 1) / size,
            ),
            None => (1, total_items, if total_items > 0 { 1 } else { 0 }),
        };
        PageMeta {
            current_page,
            page_size,
            total_items,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PageMeta {
    pub current_page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}
