/// Application context and dependency injection
use crate::{
    account::AccountManager,
    auth::{AuthProvider, LocalAuthProvider},
    clock::{Clock, SystemClock},
    config::ServerConfig,
    crypto::CredentialCipher,
    db,
    error::{VaultError, VaultResult},
    importer::Importer,
    registry::RegistryManager,
    reminders::ReminderService,
    subscription::SubscriptionManager,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::watch;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub auth: Arc<dyn AuthProvider>,
    pub accounts: Arc<AccountManager>,
    pub registry: Arc<RegistryManager>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub reminders: Arc<ReminderService>,
    pub importer: Arc<Importer>,
    pub clock: Arc<dyn Clock>,
    /// Flips to `true` when the server begins shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig, shutdown: watch::Receiver<bool>) -> VaultResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        Self::from_parts(config, db, Arc::new(SystemClock), shutdown)
    }

    /// Wire the services onto an already migrated pool
    pub fn from_parts(
        config: ServerConfig,
        db: SqlitePool,
        clock: Arc<dyn Clock>,
        shutdown: watch::Receiver<bool>,
    ) -> VaultResult<Self> {
        let auth: Arc<dyn AuthProvider> = Arc::new(LocalAuthProvider::new(
            &config.security.jwt_secret,
            config.security.token_ttl_hours,
        ));
        let cipher = Arc::new(CredentialCipher::new(config.security.encryption_key.as_bytes())?);

        let accounts = Arc::new(AccountManager::new(db.clone(), Arc::clone(&auth)));
        let registry = Arc::new(RegistryManager::new(db.clone(), Arc::clone(&cipher)));
        let subscriptions = Arc::new(SubscriptionManager::new(db.clone()));
        let reminders = Arc::new(ReminderService::new(
            db.clone(),
            Arc::clone(&clock),
            config.reminders.window_days,
        ));
        let importer = Arc::new(Importer::new(db.clone(), cipher));

        Ok(Self {
            config: Arc::new(config),
            db,
            auth,
            accounts,
            registry,
            subscriptions,
            reminders,
            importer,
            clock,
            shutdown,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> VaultResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                VaultError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }
        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}

/// Context over an in-memory store, with the clock pinned to 2026-03-01
#[cfg(test)]
pub async fn test_context() -> AppContext {
    let db = db::test_pool().await;
    let (_tx, shutdown) = watch::channel(false);
    AppContext::from_parts(
        crate::config::test_config(),
        db,
        Arc::new(crate::clock::FixedClock::at("2026-03-01T00:00:00Z")),
        shutdown,
    )
    .unwrap()
}
