/// Account manager implementation using runtime queries
use crate::{
    account::RegisterRequest,
    auth::{AuthProvider, IssuedToken, Principal},
    db::models::{Page, Paginated, Role, User, UserId, UserStatus},
    error::{map_unique_violation, ConflictEntity, VaultError, VaultResult},
    validation,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, status, created_at, updated_at";

/// Case-insensitive substring match on username or email
fn push_keyword(qb: &mut QueryBuilder<'_, Sqlite>, keyword: Option<&str>) {
    if let Some(keyword) = keyword {
        let pattern = format!("%{}%", keyword.to_lowercase());
        qb.push(" WHERE LOWER(username) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(email) LIKE ")
            .push_bind(pattern);
    }
}

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    auth: Arc<dyn AuthProvider>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, auth: Arc<dyn AuthProvider>) -> Self {
        Self { db, auth }
    }

    /// Create a new account and sign it in
    pub async fn register(&self, req: RegisterRequest) -> VaultResult<(User, IssuedToken)> {
        let username = validation::required("username", &req.username)?;
        validation::length("username", &username, 3, 20)?;
        let email = validation::email("email", &req.email)?;
        validation::credential("password", &req.password)?;

        if self.username_exists(&username).await? {
            return Err(VaultError::conflict(ConflictEntity::User, &["username"]));
        }
        if self.email_exists(&email).await? {
            return Err(VaultError::conflict(ConflictEntity::User, &["email"]));
        }

        let password_hash = self.hash_password(&req.password).await?;

        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO user_account (username, email, password_hash, role, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             RETURNING id",
        )
        .bind(&username)
        .bind(&email)
        .bind(&password_hash)
        .bind(Role::User)
        .bind(UserStatus::Active)
        .bind(now)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_unique_violation(e, ConflictEntity::User, &["username", "email"]))?;

        let user = User {
            id: UserId(id),
            username,
            email,
            password_hash,
            role: Role::User,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        };

        tracing::info!(user_id = %user.id, username = %user.username, "Registered account");

        let token = self.auth.issue_token(user.id, &user.username, user.role)?;
        Ok((user, token))
    }

    /// Authenticate by username and password
    pub async fn login(&self, username: &str, password: &str) -> VaultResult<(User, IssuedToken)> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM user_account WHERE username = ?1",
            USER_COLUMNS
        ))
        .bind(username.trim())
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| VaultError::Unauthenticated("Invalid username or password".to_string()))?;

        if !self.verify_password(password, &user.password_hash).await? {
            return Err(VaultError::Unauthenticated(
                "Invalid username or password".to_string(),
            ));
        }

        if user.status == UserStatus::Banned {
            tracing::warn!(user_id = %user.id, "Login refused for banned account");
            return Err(VaultError::Forbidden("Account is banned".to_string()));
        }

        let token = self.auth.issue_token(user.id, &user.username, user.role)?;
        Ok((user, token))
    }

    /// Get account by id
    pub async fn get_user(&self, user_id: UserId) -> VaultResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM user_account WHERE id = ?1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| VaultError::NotFound("User not found".to_string()))
    }

    /// Replace the login password after checking the current one
    pub async fn change_password(
        &self,
        user_id: UserId,
        old_password: &str,
        new_password: &str,
    ) -> VaultResult<()> {
        validation::credential("new_password", new_password)?;

        let user = self.get_user(user_id).await?;
        if !self.verify_password(old_password, &user.password_hash).await? {
            return Err(VaultError::invalid("old_password", "does not match"));
        }

        let password_hash = self.hash_password(new_password).await?;
        sqlx::query("UPDATE user_account SET password_hash = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(&password_hash)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.db)
            .await?;

        tracing::info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Account behind a bearer token.
    ///
    /// Checked on every request so a ban or deletion applies to tokens that
    /// were issued before it.
    pub async fn active_user(&self, user_id: UserId) -> VaultResult<User> {
        let user = match self.get_user(user_id).await {
            Ok(user) => user,
            Err(VaultError::NotFound(_)) => {
                return Err(VaultError::Unauthenticated("Account no longer exists".to_string()))
            }
            Err(e) => return Err(e),
        };
        if user.status == UserStatus::Banned {
            tracing::debug!(user_id = %user.id, "Request refused for banned account");
            return Err(VaultError::Forbidden("Account is banned".to_string()));
        }
        Ok(user)
    }

    /// Every account, newest first, optionally narrowed by a keyword
    pub async fn list_users(
        &self,
        actor: &Principal,
        keyword: Option<&str>,
        page: Page,
    ) -> VaultResult<Paginated<User>> {
        actor.require_admin()?;
        let keyword = validation::optional(keyword);

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM user_account");
        push_keyword(&mut count_query, keyword.as_deref());
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.db).await?;

        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM user_account", USER_COLUMNS));
        push_keyword(&mut query, keyword.as_deref());
        query.push(" ORDER BY created_at DESC, id DESC");
        if let Some((limit, offset)) = page.limit_offset() {
            query.push(" LIMIT ").push_bind(limit);
            query.push(" OFFSET ").push_bind(offset);
        }
        let items = query.build_query_as::<User>().fetch_all(&self.db).await?;

        Ok(Paginated {
            items,
            meta: page.meta(total),
        })
    }

    /// Ban or reinstate a user
    pub async fn set_status(
        &self,
        actor: &Principal,
        user_id: UserId,
        status: UserStatus,
    ) -> VaultResult<User> {
        actor.require_admin()?;

        let result = sqlx::query("UPDATE user_account SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound("User not found".to_string()));
        }

        tracing::info!(user_id = %user_id, admin_id = %actor.user_id, status = ?status, "Changed account status");
        self.get_user(user_id).await
    }

    /// Argon2 is CPU-bound, so it runs on the blocking pool
    async fn hash_password(&self, password: &str) -> VaultResult<String> {
        let auth = Arc::clone(&self.auth);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || auth.hash_password(&password))
            .await
            .map_err(|e| VaultError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    async fn verify_password(&self, password: &str, hash: &str) -> VaultResult<bool> {
        let auth = Arc::clone(&self.auth);
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || auth.verify_password(&password, &hash))
            .await
            .map_err(|e| VaultError::Internal(format!("Password check task failed: {}", e)))?
    }

    async fn username_exists(&self, username: &str) -> VaultResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_account WHERE username = ?1")
            .bind(username)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }

    async fn email_exists(&self, email: &str) -> VaultResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_account WHERE email = ?1")
            .bind(email)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }
}
