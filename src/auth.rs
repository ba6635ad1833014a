/// Login credentials, bearer tokens and the request principal
use crate::{
    context::AppContext,
    db::models::{Role, User, UserId},
    error::{VaultError, VaultResult},
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Password hashing and token issuance for local accounts
pub trait AuthProvider: Send + Sync {
    fn hash_password(&self, password: &str) -> VaultResult<String>;

    fn verify_password(&self, password: &str, hash: &str) -> VaultResult<bool>;

    fn issue_token(&self, user_id: UserId, username: &str, role: Role) -> VaultResult<IssuedToken>;

    /// Invalid, tampered and expired tokens all fail as `Unauthenticated`
    fn parse_token(&self, token: &str) -> VaultResult<Claims>;
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Argon2 password hashes and HS256 JWTs
pub struct LocalAuthProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl LocalAuthProvider {
    pub fn new(jwt_secret: &str, token_ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_ttl: Duration::hours(token_ttl_hours),
        }
    }
}

impl AuthProvider for LocalAuthProvider {
    fn hash_password(&self, password: &str) -> VaultResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| VaultError::Internal(format!("Failed to hash password: {}", e)))
    }

    fn verify_password(&self, password: &str, hash: &str) -> VaultResult<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| VaultError::Internal(format!("Invalid password hash: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    fn issue_token(&self, user_id: UserId, username: &str, role: Role) -> VaultResult<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + self.token_ttl;
        let claims = Claims {
            user_id,
            username: username.to_string(),
            role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| VaultError::Internal(format!("Failed to generate token: {}", e)))?;

        Ok(IssuedToken { token, expires_at })
    }

    fn parse_token(&self, token: &str) -> VaultResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Rejected bearer token: {}", e);
                VaultError::Unauthenticated("Invalid or expired token".to_string())
            })
    }
}

/// The authenticated caller. Every manager call takes its `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn require_admin(&self) -> VaultResult<()> {
        if self.role != Role::Admin {
            tracing::warn!(user_id = %self.user_id, "Admin operation refused");
            return Err(VaultError::Forbidden("Administrator role required".to_string()));
        }
        Ok(())
    }
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            role: user.role,
        }
    }
}

/// Role and status come from the stored account, not the token, so bans and
/// role changes apply to tokens already issued.
#[async_trait]
impl FromRequestParts<AppContext> for Principal {
    type Rejection = VaultError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    VaultError::Unauthenticated("Missing authorization header".to_string())
                })?;

        let claims = state.auth.parse_token(bearer.token())?;
        let user = state.accounts.active_user(claims.user_id).await?;
        Ok(user.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> LocalAuthProvider {
        LocalAuthProvider::new("test-secret-key-for-testing-only-0123", 1)
    }

    #[test]
    fn test_password_hash_verifies() {
        let auth = provider();
        let hash = auth.hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(auth.verify_password("correct horse", &hash).unwrap());
        assert!(!auth.verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn test_token_carries_claims() {
        let auth = provider();
        let issued = auth.issue_token(UserId(7), "alice", Role::User).unwrap();
        let claims = auth.parse_token(&issued.token).unwrap();

        assert_eq!(claims.user_id, UserId(7));
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, Role::User);
    }

    #[test]
    fn test_only_admins_pass_the_admin_check() {
        let mut principal = Principal {
            user_id: UserId(1),
            username: "alice".to_string(),
            role: Role::User,
        };
        assert!(matches!(principal.require_admin(), Err(VaultError::Forbidden(_))));

        principal.role = Role::Admin;
        assert!(principal.require_admin().is_ok());
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let issued = provider().issue_token(UserId(1), "alice", Role::Admin).unwrap();
        let other = LocalAuthProvider::new("another-secret-key-for-testing-only-99", 1);
        assert!(matches!(
            other.parse_token(&issued.token),
            Err(VaultError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        // Negative lifetime puts exp well past the default leeway
        let auth = LocalAuthProvider::new("test-secret-key-for-testing-only-0123", -2);
        let issued = auth.issue_token(UserId(1), "alice", Role::User).unwrap();
        assert!(matches!(
            auth.parse_token(&issued.token),
            Err(VaultError::Unauthenticated(_))
        ));
    }
}
