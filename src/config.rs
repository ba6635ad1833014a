/// Configuration management for Vaultkeep
use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub reminders: ReminderConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Token signing and credential encryption
#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    /// Raw key for stored credentials, exactly 32 bytes
    pub encryption_key: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("encryption_key", &"<redacted>")
            .finish()
    }
}

/// Renewal reminder window and background sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    pub window_days: i64,
    pub sweep_enabled: bool,
    pub sweep_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> VaultResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("VAULTKEEP_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("VAULTKEEP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| VaultError::invalid("VAULTKEEP_PORT", "invalid port number"))?;
        let version = env!("CARGO_PKG_VERSION").to_string();

        let data_directory: PathBuf = env::var("VAULTKEEP_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("VAULTKEEP_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("vaultkeep.sqlite"));

        let jwt_secret = env::var("VAULTKEEP_JWT_SECRET").unwrap_or_default();
        let token_ttl_hours = env::var("VAULTKEEP_TOKEN_TTL_HOURS")
            .unwrap_or_else(|_| "72".to_string())
            .parse()
            .map_err(|_| VaultError::invalid("VAULTKEEP_TOKEN_TTL_HOURS", "expected a number of hours"))?;
        let encryption_key = env::var("VAULTKEEP_ENCRYPTION_KEY").unwrap_or_default();

        let window_days = env::var("VAULTKEEP_REMINDER_WINDOW_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| VaultError::invalid("VAULTKEEP_REMINDER_WINDOW_DAYS", "expected a number of days"))?;
        let sweep_enabled = env::var("VAULTKEEP_REMINDER_SWEEP_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let sweep_interval_secs = env::var("VAULTKEEP_REMINDER_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86400);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            security: SecurityConfig {
                jwt_secret,
                token_ttl_hours,
                encryption_key,
            },
            reminders: ReminderConfig {
                window_days,
                sweep_enabled,
                sweep_interval_secs,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> VaultResult<()> {
        if self.service.hostname.is_empty() {
            return Err(VaultError::invalid("VAULTKEEP_HOSTNAME", "hostname cannot be empty"));
        }

        if self.security.jwt_secret.len() < 32 {
            return Err(VaultError::invalid(
                "VAULTKEEP_JWT_SECRET",
                "JWT secret must be at least 32 characters",
            ));
        }

        if self.security.encryption_key.len() != crate::crypto::KEY_SIZE {
            return Err(VaultError::invalid(
                "VAULTKEEP_ENCRYPTION_KEY",
                format!(
                    "encryption key must be exactly {} bytes",
                    crate::crypto::KEY_SIZE
                ),
            ));
        }

        if self.security.token_ttl_hours <= 0 {
            return Err(VaultError::invalid(
                "VAULTKEEP_TOKEN_TTL_HOURS",
                "token lifetime must be positive",
            ));
        }

        if self.reminders.window_days <= 0 {
            return Err(VaultError::invalid(
                "VAULTKEEP_REMINDER_WINDOW_DAYS",
                "reminder window must be at least one day",
            ));
        }

        if self.reminders.sweep_interval_secs == 0 {
            return Err(VaultError::invalid(
                "VAULTKEEP_REMINDER_SWEEP_INTERVAL_SECS",
                "sweep interval must be positive",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 8080,
            version: "test".to_string(),
        },
        storage: StorageConfig {
            data_directory: PathBuf::from("./data"),
            database: PathBuf::from(":memory:"),
        },
        security: SecurityConfig {
            jwt_secret: "test-secret-key-for-testing-only-0123".to_string(),
            token_ttl_hours: 1,
            encryption_key: "0123456789abcdef0123456789abcdef".to_string(),
        },
        reminders: ReminderConfig {
            window_days: 30,
            sweep_enabled: false,
            sweep_interval_secs: 86400,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut config = test_config();
        config.security.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encryption_key_must_be_32_bytes() {
        let mut config = test_config();
        config.security.encryption_key = "0123456789abcdef".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("VAULTKEEP_ENCRYPTION_KEY"));
    }

    #[test]
    fn test_reminder_window_must_be_positive() {
        let mut config = test_config();
        config.reminders.window_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_are_not_debug_printed() {
        let rendered = format!("{:?}", test_config().security);
        assert!(!rendered.contains("test-secret-key"));
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
