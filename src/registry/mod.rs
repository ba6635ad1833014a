/// Registration manager
///
/// Owns the email account, platform and platform registration part of the
/// ownership graph: find-or-create, conflict detection and cascading deletes.
/// Every operation is scoped to the calling user; rows owned by someone else
/// are reported as not found.

mod email_accounts;
mod platforms;
mod registrations;

pub use registrations::RegistrationIdentity;
pub(crate) use email_accounts::find_or_create_email_account;
pub(crate) use platforms::find_or_create_platform;
pub(crate) use registrations::insert_registration;

use crate::{
    crypto::CredentialCipher,
    db::models::{Platform, SortOrder},
    patch::Patch,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Registration manager service
pub struct RegistryManager {
    db: SqlitePool,
    cipher: Arc<CredentialCipher>,
}

impl RegistryManager {
    pub fn new(db: SqlitePool, cipher: Arc<CredentialCipher>) -> Self {
        Self { db, cipher }
    }
}

/// Explicit email account creation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEmailAccount {
    pub email_address: String,
    pub password: Option<String>,
    pub provider: Option<String>,
    pub imap_server: Option<String>,
    pub imap_port: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailAccountUpdate {
    #[serde(default)]
    pub email_address: Patch<String>,
    /// `null` or empty removes the stored mailbox password
    #[serde(default)]
    pub password: Patch<Option<String>>,
    #[serde(default)]
    pub provider: Patch<String>,
    #[serde(default)]
    pub imap_server: Patch<Option<String>>,
    #[serde(default)]
    pub imap_port: Patch<Option<i64>>,
    #[serde(default)]
    pub notes: Patch<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailAccountFilter {
    /// Case-insensitive substring of the provider
    pub provider: Option<String>,
    /// Case-insensitive substring of the address
    pub email_address: Option<String>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
}

/// Explicit platform creation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPlatform {
    pub name: String,
    pub website_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformUpdate {
    #[serde(default)]
    pub name: Patch<String>,
    #[serde(default)]
    pub website_url: Patch<String>,
    #[serde(default)]
    pub notes: Patch<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformFilter {
    /// Case-insensitive substring of the name
    pub name: Option<String>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
}

/// Platform with the number of live registrations on it
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PlatformSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub platform: Platform,
    pub registration_count: i64,
}

/// Registration against existing platform and email account ids
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRegistration {
    pub platform_id: i64,
    pub email_account_id: Option<i64>,
    pub login_username: Option<String>,
    pub login_password: Option<String>,
    pub notes: Option<String>,
    pub phone_number: Option<String>,
}

/// Registration by names; the platform and email account are found or created
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRegistrationByNames {
    pub platform_name: String,
    /// Applied only when the platform is created by this call
    pub platform_website_url: Option<String>,
    pub email_address: Option<String>,
    pub login_username: Option<String>,
    pub login_password: Option<String>,
    pub notes: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationUpdate {
    /// Empty or `null` unlinks the email account
    #[serde(default)]
    pub email_address: Patch<Option<String>>,
    /// Empty or `null` clears the username
    #[serde(default)]
    pub login_username: Patch<Option<String>>,
    /// Empty or `null` removes the stored password
    #[serde(default)]
    pub login_password: Patch<Option<String>>,
    #[serde(default)]
    pub notes: Patch<String>,
    #[serde(default)]
    pub phone_number: Patch<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationFilter {
    pub platform_id: Option<i64>,
    pub email_account_id: Option<i64>,
    /// Case-insensitive exact username
    pub username: Option<String>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
}

/// Revealed registration password
#[derive(Debug, Clone, Serialize)]
pub struct RevealedPassword {
    pub password: String,
}

/// Whitelisted ORDER BY column, falling back to `default`
pub(crate) fn order_column(
    requested: Option<&str>,
    allowed: &[(&str, &'static str)],
    default: &'static str,
) -> &'static str {
    requested
        .and_then(|key| allowed.iter().find(|(k, _)| *k == key).map(|(_, col)| *col))
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) async fn test_manager() -> (RegistryManager, crate::db::models::UserId) {
    let db = crate::db::test_pool().await;
    let user = crate::db::insert_test_user(&db, "alice").await;
    let manager = RegistryManager::new(db, Arc::new(crate::crypto::test_cipher()));
    (manager, user)
}

/// Manager over a file-backed pool with several connections
#[cfg(test)]
pub(crate) async fn on_disk_manager(
    dir: &std::path::Path,
) -> (RegistryManager, crate::db::models::UserId) {
    let db = crate::db::create_pool(&dir.join("vault.sqlite"), crate::db::DatabaseOptions::default())
        .await
        .unwrap();
    crate::db::run_migrations(&db).await.unwrap();
    let user = crate::db::insert_test_user(&db, "alice").await;
    let manager = RegistryManager::new(db, Arc::new(crate::crypto::test_cipher()));
    (manager, user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_column_whitelist() {
        let allowed = [("name", "p.name"), ("created_at", "p.created_at")];
        assert_eq!(order_column(Some("name"), &allowed, "p.created_at"), "p.name");
        assert_eq!(
            order_column(Some("name; DROP TABLE platform"), &allowed, "p.created_at"),
            "p.created_at"
        );
        assert_eq!(order_column(None, &allowed, "p.created_at"), "p.created_at");
    }

    #[test]
    fn test_registration_update_distinguishes_clear_from_absent() {
        let update: RegistrationUpdate =
            serde_json::from_str(r#"{"email_address": null, "notes": "x"}"#).unwrap();
        assert_eq!(update.email_address, Patch::Set(None));
        assert_eq!(update.login_username, Patch::Unset);
        assert_eq!(update.notes, Patch::Set("x".to_string()));
    }
}
