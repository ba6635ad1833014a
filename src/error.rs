/// Unified error types for Vaultkeep
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which stored entity a uniqueness conflict was raised against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictEntity {
    User,
    EmailAccount,
    Platform,
    PlatformRegistration,
    ServiceSubscription,
}

impl fmt::Display for ConflictEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictEntity::User => "user",
            ConflictEntity::EmailAccount => "email account",
            ConflictEntity::Platform => "platform",
            ConflictEntity::PlatformRegistration => "platform registration",
            ConflictEntity::ServiceSubscription => "service subscription",
        };
        f.write_str(name)
    }
}

/// A write that would violate a per-user uniqueness constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictError {
    pub entity: ConflictEntity,
    pub fields: Vec<&'static str>,
}

impl ConflictError {
    pub fn new(entity: ConflictEntity, fields: &[&'static str]) -> Self {
        Self {
            entity,
            fields: fields.to_vec(),
        }
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} already exists for ({})", self.entity, self.fields.join(", "))
    }
}

/// Main error type for the service
#[derive(Error, Debug)]
pub enum VaultError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Input rejected before touching storage
    #[error("Invalid {field}: {message}")]
    InvalidInput { field: &'static str, message: String },

    /// Missing rows and rows owned by someone else look the same
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness conflicts
    #[error("Conflict: {0}")]
    Conflict(ConflictError),

    /// Missing, invalid or expired credentials
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    /// Banned accounts
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        VaultError::InvalidInput {
            field,
            message: message.into(),
        }
    }

    pub fn conflict(entity: ConflictEntity, fields: &[&'static str]) -> Self {
        VaultError::Conflict(ConflictError::new(entity, fields))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, VaultError::Conflict(_))
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for VaultError {
    fn into_response(self) -> Response {
        let field = match &self {
            VaultError::InvalidInput { field, .. } => Some(field.to_string()),
            _ => None,
        };

        let (status, error_code, message) = match &self {
            VaultError::InvalidInput { .. } => {
                (StatusCode::BAD_REQUEST, "InvalidInput", self.to_string())
            }
            VaultError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            VaultError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            VaultError::Unauthenticated(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            VaultError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden", self.to_string()),
            VaultError::Database(_) | VaultError::Internal(_) | VaultError::Io(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(), // Don't leak details
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            field,
        });

        (status, body).into_response()
    }
}

/// Result type alias for service operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Map a unique-index violation, or a write that lost to a concurrent
/// writer, onto a typed conflict. Every other database error passes through.
pub fn map_unique_violation(
    err: sqlx::Error,
    entity: ConflictEntity,
    fields: &[&'static str],
) -> VaultError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() || is_busy(&**db_err) {
            return VaultError::conflict(entity, fields);
        }
    }
    VaultError::Database(err)
}

/// SQLITE_BUSY and its extended codes (261, 517, 773)
fn is_busy(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map_or(false, |code| code & 0xff == 5)
}
