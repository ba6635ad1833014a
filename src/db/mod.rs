/// Database layer for Vaultkeep
///
/// Manages the SQLite connection pool and the embedded migrations that define
/// the ownership graph (users, email accounts, platforms, registrations and
/// subscriptions) together with its uniqueness and ownership constraints.

pub mod models;

use crate::error::{VaultError, VaultResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::time::Duration;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> VaultResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(if options.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        })
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect_options)
        .await?;

    Ok(pool)
}

/// Run migrations
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> VaultResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| VaultError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Open a transaction that takes the write lock up front.
///
/// A deferred `BEGIN` that reads before writing can lose its snapshot to a
/// concurrent commit and fail with SQLITE_BUSY_SNAPSHOT; `BEGIN IMMEDIATE`
/// makes the second writer wait on the busy timeout instead.
pub async fn begin_write(pool: &SqlitePool) -> VaultResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> VaultResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// In-memory database with the real schema.
///
/// A single connection keeps every query on the same in-memory database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    use std::str::FromStr;

    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// Insert a bare user row for manager tests
#[cfg(test)]
pub async fn insert_test_user(pool: &SqlitePool, username: &str) -> models::UserId {
    let now = chrono::Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO user_account (username, email, password_hash, role, status, created_at, updated_at)
         VALUES (?1, ?2, 'x', 'user', 'active', ?3, ?3)
         RETURNING id",
    )
    .bind(username)
    .bind(format!("{}@example.test", username))
    .bind(now)
    .fetch_one(pool)
    .await
    .unwrap();
    models::UserId(id)
}
