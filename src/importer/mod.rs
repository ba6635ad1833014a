/// Bulk import of login records from an external password manager
///
/// Records are processed in order, each in its own transaction, so a failed
/// record leaves nothing behind and never undoes the ones before it. Row
/// numbers in messages start at 2 to line up with the source file, whose
/// first line is a header.

use crate::{
    crypto::CredentialCipher,
    db::{self, models::UserId},
    error::{VaultError, VaultResult},
    metrics,
    registry::{
        find_or_create_email_account, find_or_create_platform, insert_registration,
        RegistrationIdentity,
    },
    validation,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::watch;

const CUSTOM_FIELDS_HEADER: &str = "\n\n--- Custom Fields (Imported) ---\n";

/// One exported login
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRecord {
    pub platform_name: String,
    /// Username or email address used to sign in
    pub login_identifier: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    pub records: Vec<ImportRecord>,
    #[serde(default)]
    pub import_passwords: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub saved_count: usize,
    pub error_count: usize,
    pub error_messages: Vec<String>,
    /// Set when the batch stopped early on cancellation
    pub cancelled: bool,
}

/// Result of a single record
enum RowOutcome {
    Saved { warning: Option<String> },
    Failed(String),
}

/// Import service
pub struct Importer {
    db: SqlitePool,
    cipher: Arc<CredentialCipher>,
}

impl Importer {
    pub fn new(db: SqlitePool, cipher: Arc<CredentialCipher>) -> Self {
        Self { db, cipher }
    }

    /// Import records for `user_id`, checking `cancel` between records
    pub async fn import_records(
        &self,
        user_id: UserId,
        request: ImportRequest,
        cancel: &watch::Receiver<bool>,
    ) -> VaultResult<ImportSummary> {
        let total = request.records.len();
        tracing::info!(user_id = %user_id, records = total, import_passwords = request.import_passwords, "Starting import");

        let mut summary = ImportSummary::default();
        for (index, record) in request.records.into_iter().enumerate() {
            if *cancel.borrow() {
                tracing::warn!(user_id = %user_id, processed = index, total, "Import cancelled");
                summary.cancelled = true;
                break;
            }

            let row = index + 2;
            match self.import_one(user_id, row, record, request.import_passwords).await {
                RowOutcome::Saved { warning } => {
                    summary.saved_count += 1;
                    if let Some(warning) = warning {
                        summary.error_messages.push(warning);
                    }
                    metrics::record_import_row(true);
                    metrics::record_registration_created("import");
                }
                RowOutcome::Failed(message) => {
                    tracing::debug!(user_id = %user_id, row, "{}", message);
                    summary.error_count += 1;
                    summary.error_messages.push(message);
                    metrics::record_import_row(false);
                }
            }
        }

        tracing::info!(
            user_id = %user_id,
            saved = summary.saved_count,
            errors = summary.error_count,
            cancelled = summary.cancelled,
            "Import finished"
        );
        Ok(summary)
    }

    /// Every problem with a row, including a failed begin or commit, comes
    /// back as `Failed` so the batch always runs to the end.
    async fn import_one(
        &self,
        user_id: UserId,
        row: usize,
        record: ImportRecord,
        import_passwords: bool,
    ) -> RowOutcome {
        let Some(platform_name) = validation::optional(Some(record.platform_name.as_str())) else {
            return RowOutcome::Failed(format!(
                "Row {}: platform name is empty (login '{}')",
                row,
                record.login_identifier.trim()
            ));
        };
        let Some(identifier) = validation::optional(Some(record.login_identifier.as_str())) else {
            return RowOutcome::Failed(format!(
                "Row {} ({}): login identifier is empty",
                row, platform_name
            ));
        };

        let mut warning = None;
        let password = match record.password.as_deref().filter(|p| import_passwords && !p.is_empty()) {
            None => None,
            Some(plain) => match self.cipher.encrypt(plain) {
                Ok(sealed) => Some(sealed),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, row, "Password encryption failed: {}", e);
                    warning = Some(format!(
                        "Row {} ({}, {}): password could not be encrypted and was not imported",
                        row, platform_name, identifier
                    ));
                    None
                }
            },
        };
        let notes = notes_with_custom_fields(record.notes.as_deref(), &record.custom_fields);

        let mut tx = match db::begin_write(&self.db).await {
            Ok(tx) => tx,
            Err(e) => return RowOutcome::Failed(row_error(row, &platform_name, &identifier, e)),
        };
        let written: VaultResult<i64> = async {
            let (platform, _) =
                find_or_create_platform(&mut tx, user_id, &platform_name, record.url.as_deref())
                    .await?;

            let identity = if validation::is_email(&identifier) {
                let account = find_or_create_email_account(&mut tx, user_id, &identifier).await?;
                RegistrationIdentity::new(None, Some(account.id))?
            } else {
                RegistrationIdentity::new(Some(&identifier), None)?
            };

            insert_registration(
                &mut tx,
                user_id,
                platform.id,
                &identity,
                password.as_deref(),
                &notes,
                "",
            )
            .await
        }
        .await;

        let registration_id = match written {
            Ok(id) => id,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(row, "Import row rollback failed: {}", rollback);
                }
                return RowOutcome::Failed(row_error(row, &platform_name, &identifier, e));
            }
        };
        if let Err(e) = tx.commit().await {
            return RowOutcome::Failed(row_error(row, &platform_name, &identifier, e.into()));
        }

        tracing::debug!(user_id = %user_id, row, registration_id, platform = %platform_name, "Imported login");
        RowOutcome::Saved { warning }
    }
}

fn row_error(row: usize, platform_name: &str, identifier: &str, err: VaultError) -> String {
    match err {
        VaultError::Conflict(_) => format!(
            "Row {} ({}): '{}' is already registered on this platform",
            row, platform_name, identifier
        ),
        other => {
            tracing::warn!(row, "Import row failed: {}", other);
            format!("Row {} ({}, {}): {}", row, platform_name, identifier, other)
        }
    }
}

fn notes_with_custom_fields(notes: Option<&str>, custom_fields: &BTreeMap<String, String>) -> String {
    let mut combined = notes.unwrap_or_default().to_string();
    if !custom_fields.is_empty() {
        combined.push_str(CUSTOM_FIELDS_HEADER);
        match serde_json::to_string(custom_fields) {
            Ok(json) => combined.push_str(&json),
            Err(_) => {
                for (key, value) in custom_fields {
                    combined.push_str(&format!("{}: {}\n", key, value));
                }
            }
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::test_cipher,
        db::{insert_test_user, test_pool},
    };

    fn record(platform: &str, login: &str) -> ImportRecord {
        ImportRecord {
            platform_name: platform.to_string(),
            login_identifier: login.to_string(),
            ..Default::default()
        }
    }

    async fn setup() -> (Importer, SqlitePool, UserId) {
        let db = test_pool().await;
        let user = insert_test_user(&db, "alice").await;
        (Importer::new(db.clone(), Arc::new(test_cipher())), db, user)
    }

    async fn count(db: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[test]
    fn test_custom_fields_are_appended_as_json() {
        let mut fields = BTreeMap::new();
        fields.insert("pin".to_string(), "1234".to_string());
        let notes = notes_with_custom_fields(Some("family plan"), &fields);
        assert_eq!(
            notes,
            "family plan\n\n--- Custom Fields (Imported) ---\n{\"pin\":\"1234\"}"
        );
        assert_eq!(notes_with_custom_fields(None, &BTreeMap::new()), "");
    }

    #[tokio::test]
    async fn test_invalid_record_is_isolated() {
        let (importer, db, user) = setup().await;
        let (_tx, cancel) = watch::channel(false);

        let request = ImportRequest {
            records: vec![
                record("GitHub", "alice"),
                record("GitHub", "alice@example.com"),
                record("   ", "bob"),
                record("Steam", "gamer"),
                record("Netflix", "alice@example.com"),
            ],
            import_passwords: false,
        };
        let summary = importer.import_records(user, request, &cancel).await.unwrap();

        assert_eq!(summary.saved_count, 4);
        assert_eq!(summary.error_count, 1);
        assert!(summary.error_messages[0].starts_with("Row 4:"));
        assert!(!summary.cancelled);

        assert_eq!(count(&db, "platform").await, 3);
        assert_eq!(count(&db, "email_account").await, 1);
        assert_eq!(count(&db, "platform_registration").await, 4);
    }

    #[tokio::test]
    async fn test_duplicates_are_row_conflicts() {
        let (importer, db, user) = setup().await;
        let (_tx, cancel) = watch::channel(false);

        let request = ImportRequest {
            records: vec![
                record("GitHub", "alice"),
                record("GitHub", "alice"),
                record("GitHub", "alice@example.com"),
                record("GitHub", "alice@example.com"),
            ],
            import_passwords: false,
        };
        let summary = importer.import_records(user, request, &cancel).await.unwrap();

        assert_eq!(summary.saved_count, 2);
        assert_eq!(summary.error_count, 2);
        assert!(summary.error_messages[0].contains("Row 3"));
        assert!(summary.error_messages[1].contains("Row 5"));
        assert_eq!(count(&db, "platform_registration").await, 2);
    }

    #[tokio::test]
    async fn test_failed_row_rolls_back_its_platform() {
        let (importer, db, user) = setup().await;
        let (_tx, cancel) = watch::channel(false);

        sqlx::query(
            "CREATE TRIGGER reject_blocked BEFORE INSERT ON platform_registration
             WHEN NEW.login_username = 'blocked'
             BEGIN SELECT RAISE(ABORT, 'blocked'); END",
        )
        .execute(&db)
        .await
        .unwrap();

        let request = ImportRequest {
            records: vec![record("Kept", "alice"), record("NewCo", "blocked")],
            import_passwords: false,
        };
        let summary = importer.import_records(user, request, &cancel).await.unwrap();

        assert_eq!(summary.saved_count, 1);
        assert_eq!(summary.error_count, 1);
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM platform")
            .fetch_all(&db)
            .await
            .unwrap();
        assert_eq!(names, vec!["Kept"]);
    }

    #[tokio::test]
    async fn test_failed_commit_is_a_row_error() {
        let (importer, db, user) = setup().await;
        let (_tx, cancel) = watch::channel(false);

        // The deferred foreign key only fails at COMMIT
        sqlx::query("CREATE TABLE import_guard_parent (id INTEGER PRIMARY KEY)")
            .execute(&db)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE import_guard (
                parent_id INTEGER REFERENCES import_guard_parent(id) DEFERRABLE INITIALLY DEFERRED
            )",
        )
        .execute(&db)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TRIGGER guard_bad_login AFTER INSERT ON platform_registration
             WHEN NEW.login_username = 'bad'
             BEGIN INSERT INTO import_guard (parent_id) VALUES (999); END",
        )
        .execute(&db)
        .await
        .unwrap();

        let request = ImportRequest {
            records: vec![
                record("GitHub", "alice"),
                record("Netflix", "bad"),
                record("Steam", "gamer"),
            ],
            import_passwords: false,
        };
        let summary = importer.import_records(user, request, &cancel).await.unwrap();

        assert_eq!(summary.saved_count, 2);
        assert_eq!(summary.error_count, 1);
        assert!(summary.error_messages[0].starts_with("Row 3 (Netflix, bad)"));
        assert!(!summary.cancelled);

        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM platform ORDER BY name")
            .fetch_all(&db)
            .await
            .unwrap();
        assert_eq!(names, vec!["GitHub", "Steam"]);
        assert_eq!(count(&db, "import_guard").await, 0);
    }

    #[tokio::test]
    async fn test_passwords_and_urls() {
        let (importer, db, user) = setup().await;
        let (_tx, cancel) = watch::channel(false);

        let mut with_password = record("GitLab", "alice");
        with_password.password = Some("s3cret-pass".to_string());
        with_password.url = Some("https://gitlab.com".to_string());
        let mut skipped_password = record("GitLab", "alice2");
        skipped_password.password = Some(String::new());

        let request = ImportRequest {
            records: vec![with_password, skipped_password],
            import_passwords: true,
        };
        let summary = importer.import_records(user, request, &cancel).await.unwrap();
        assert_eq!(summary.saved_count, 2);

        let sealed: Vec<Option<String>> = sqlx::query_scalar(
            "SELECT login_password_encrypted FROM platform_registration ORDER BY id",
        )
        .fetch_all(&db)
        .await
        .unwrap();
        assert_eq!(
            test_cipher().decrypt(sealed[0].as_deref().unwrap()).unwrap(),
            "s3cret-pass"
        );
        assert!(sealed[1].is_none());

        let url: String = sqlx::query_scalar("SELECT website_url FROM platform WHERE name = 'GitLab'")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(url, "https://gitlab.com");
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_records() {
        let (importer, db, user) = setup().await;
        let (tx, cancel) = watch::channel(false);
        tx.send(true).unwrap();

        let request = ImportRequest {
            records: vec![record("GitHub", "alice")],
            import_passwords: false,
        };
        let summary = importer.import_records(user, request, &cancel).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.saved_count, 0);
        assert_eq!(count(&db, "platform").await, 0);
    }
}
