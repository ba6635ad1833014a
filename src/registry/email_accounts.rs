/// Email accounts: explicit CRUD, find-or-create and the soft cascade delete
use super::{order_column, EmailAccountFilter, EmailAccountUpdate, NewEmailAccount, RegistryManager};
use crate::{
    db::{
        self,
        models::{EmailAccount, Page, Paginated, UserId},
    },
    error::{map_unique_violation, ConflictEntity, VaultError, VaultResult},
    metrics,
    patch::Patch,
    validation,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

pub(crate) const EMAIL_ACCOUNT_COLUMNS: &str = "id, user_id, email_address, provider, password_encrypted, imap_server, imap_port, notes, created_at, updated_at";

const SORTABLE: &[(&str, &str)] = &[
    ("email_address", "email_address"),
    ("provider", "provider"),
    ("notes", "notes"),
    ("created_at", "created_at"),
    ("updated_at", "updated_at"),
];

/// Live email account by address
pub(crate) async fn email_account_by_address(
    conn: &mut SqliteConnection,
    user_id: UserId,
    address: &str,
) -> VaultResult<Option<EmailAccount>> {
    let account = sqlx::query_as::<_, EmailAccount>(&format!(
        "SELECT {} FROM email_account WHERE user_id = ?1 AND email_address = ?2 AND deleted_at IS NULL",
        EMAIL_ACCOUNT_COLUMNS
    ))
    .bind(user_id)
    .bind(address)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(account)
}

/// Live email account by id, `NotFound` when missing or owned by someone else
pub(crate) async fn email_account_by_id(
    conn: &mut SqliteConnection,
    user_id: UserId,
    id: i64,
) -> VaultResult<EmailAccount> {
    sqlx::query_as::<_, EmailAccount>(&format!(
        "SELECT {} FROM email_account WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        EMAIL_ACCOUNT_COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| VaultError::NotFound("Email account not found".to_string()))
}

/// Look up an address for a user and create it when absent.
///
/// A concurrent insert of the same address loses on the unique index and is
/// retried as a lookup; a caller whose snapshot predates the winner's commit
/// gets a conflict.
pub(crate) async fn find_or_create_email_account(
    conn: &mut SqliteConnection,
    user_id: UserId,
    address: &str,
) -> VaultResult<EmailAccount> {
    if let Some(existing) = email_account_by_address(conn, user_id, address).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    let inserted = sqlx::query_as::<_, EmailAccount>(&format!(
        "INSERT INTO email_account (user_id, email_address, provider, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, '', ?4, ?4)
         RETURNING {}",
        EMAIL_ACCOUNT_COLUMNS
    ))
    .bind(user_id)
    .bind(address)
    .bind(validation::provider_of(address))
    .bind(now)
    .fetch_one(&mut *conn)
    .await;

    match inserted {
        Ok(account) => {
            tracing::debug!(user_id = %user_id, email_account_id = account.id, "Created email account");
            Ok(account)
        }
        Err(e) => match map_unique_violation(e, ConflictEntity::EmailAccount, &["email_address"]) {
            VaultError::Conflict(conflict) => email_account_by_address(conn, user_id, address)
                .await?
                .ok_or(VaultError::Conflict(conflict)),
            other => Err(other),
        },
    }
}

fn push_email_account_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    user_id: UserId,
    filter: &EmailAccountFilter,
) {
    qb.push(" WHERE user_id = ").push_bind(user_id);
    qb.push(" AND deleted_at IS NULL");
    if let Some(provider) = validation::optional(filter.provider.as_deref()) {
        qb.push(" AND LOWER(provider) LIKE ")
            .push_bind(format!("%{}%", provider.to_lowercase()));
    }
    if let Some(address) = validation::optional(filter.email_address.as_deref()) {
        qb.push(" AND LOWER(email_address) LIKE ")
            .push_bind(format!("%{}%", address.to_lowercase()));
    }
}

impl RegistryManager {
    /// Find or create an email account in its own transaction
    pub async fn find_or_create_email_account(
        &self,
        user_id: UserId,
        address: &str,
    ) -> VaultResult<EmailAccount> {
        let address = validation::email("email_address", address)?;
        let mut tx = db::begin_write(&self.db).await?;
        let account = find_or_create_email_account(&mut tx, user_id, &address).await?;
        tx.commit().await?;
        Ok(account)
    }

    /// Create an email account; an existing address is a conflict
    pub async fn create_email_account(
        &self,
        user_id: UserId,
        input: NewEmailAccount,
    ) -> VaultResult<EmailAccount> {
        let address = validation::email("email_address", &input.email_address)?;
        let password_encrypted = self.seal_optional("password", input.password.as_deref())?;
        let provider = validation::optional(input.provider.as_deref())
            .unwrap_or_else(|| validation::provider_of(&address));

        let mut conn = self.db.acquire().await?;
        if email_account_by_address(&mut conn, user_id, &address).await?.is_some() {
            metrics::record_conflict("email_account");
            return Err(VaultError::conflict(ConflictEntity::EmailAccount, &["email_address"]));
        }

        let now = Utc::now();
        let account = sqlx::query_as::<_, EmailAccount>(&format!(
            "INSERT INTO email_account (user_id, email_address, provider, password_encrypted, imap_server, imap_port, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             RETURNING {}",
            EMAIL_ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .bind(&address)
        .bind(&provider)
        .bind(&password_encrypted)
        .bind(validation::optional(input.imap_server.as_deref()))
        .bind(input.imap_port)
        .bind(input.notes.unwrap_or_default())
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_unique_violation(e, ConflictEntity::EmailAccount, &["email_address"]))?;

        tracing::info!(user_id = %user_id, email_account_id = account.id, "Created email account");
        Ok(account)
    }

    pub async fn get_email_account(&self, user_id: UserId, id: i64) -> VaultResult<EmailAccount> {
        let mut conn = self.db.acquire().await?;
        email_account_by_id(&mut conn, user_id, id).await
    }

    pub async fn list_email_accounts(
        &self,
        user_id: UserId,
        filter: &EmailAccountFilter,
        page: Page,
    ) -> VaultResult<Paginated<EmailAccount>> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM email_account");
        push_email_account_filters(&mut count_query, user_id, filter);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.db).await?;

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM email_account",
            EMAIL_ACCOUNT_COLUMNS
        ));
        push_email_account_filters(&mut query, user_id, filter);
        let column = order_column(filter.sort_by.as_deref(), SORTABLE, "created_at");
        query.push(format!(
            " ORDER BY {} {}, id {}",
            column,
            filter.order.as_sql(),
            filter.order.as_sql()
        ));
        if let Some((limit, offset)) = page.limit_offset() {
            query.push(" LIMIT ").push_bind(limit);
            query.push(" OFFSET ").push_bind(offset);
        }

        let items = query
            .build_query_as::<EmailAccount>()
            .fetch_all(&self.db)
            .await?;

        Ok(Paginated {
            items,
            meta: page.meta(total),
        })
    }

    pub async fn update_email_account(
        &self,
        user_id: UserId,
        id: i64,
        update: EmailAccountUpdate,
    ) -> VaultResult<EmailAccount> {
        let mut tx = db::begin_write(&self.db).await?;
        let current = email_account_by_id(&mut tx, user_id, id).await?;

        let address = match update.email_address {
            Patch::Set(raw) => validation::email("email_address", &raw)?,
            Patch::Unset => current.email_address.clone(),
        };
        let address_changed = address != current.email_address;
        if address_changed {
            if let Some(other) = email_account_by_address(&mut tx, user_id, &address).await? {
                if other.id != id {
                    metrics::record_conflict("email_account");
                    return Err(VaultError::conflict(
                        ConflictEntity::EmailAccount,
                        &["email_address"],
                    ));
                }
            }
        }

        let provider = match update.provider {
            Patch::Set(p) => p.trim().to_string(),
            Patch::Unset if address_changed => validation::provider_of(&address),
            Patch::Unset => current.provider.clone(),
        };
        let password_encrypted = match update.password {
            Patch::Set(raw) => self.seal_optional("password", raw.as_deref())?,
            Patch::Unset => current.password_encrypted.clone(),
        };
        let imap_server = match update.imap_server {
            Patch::Set(raw) => validation::optional(raw.as_deref()),
            Patch::Unset => current.imap_server.clone(),
        };
        let imap_port = update.imap_port.apply(current.imap_port);
        let notes = update.notes.apply(current.notes.clone());

        let account = sqlx::query_as::<_, EmailAccount>(&format!(
            "UPDATE email_account
             SET email_address = ?1, provider = ?2, password_encrypted = ?3, imap_server = ?4,
                 imap_port = ?5, notes = ?6, updated_at = ?7
             WHERE id = ?8 AND user_id = ?9
             RETURNING {}",
            EMAIL_ACCOUNT_COLUMNS
        ))
        .bind(&address)
        .bind(&provider)
        .bind(&password_encrypted)
        .bind(&imap_server)
        .bind(imap_port)
        .bind(&notes)
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, ConflictEntity::EmailAccount, &["email_address"]))?;

        tx.commit().await?;
        Ok(account)
    }

    /// Soft-delete an email account with every registration and subscription
    /// that hangs off it, all in one transaction.
    pub async fn delete_email_account(&self, user_id: UserId, id: i64) -> VaultResult<()> {
        let mut tx = db::begin_write(&self.db).await?;
        email_account_by_id(&mut tx, user_id, id).await?;

        let now = Utc::now();
        let subscriptions = sqlx::query(
            "UPDATE service_subscription SET deleted_at = ?1
             WHERE user_id = ?2 AND deleted_at IS NULL AND platform_registration_id IN (
                 SELECT id FROM platform_registration WHERE user_id = ?2 AND email_account_id = ?3
             )",
        )
        .bind(now)
        .bind(user_id)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let registrations = sqlx::query(
            "UPDATE platform_registration SET deleted_at = ?1
             WHERE user_id = ?2 AND email_account_id = ?3 AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("UPDATE email_account SET deleted_at = ?1 WHERE id = ?2 AND user_id = ?3")
            .bind(now)
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            email_account_id = id,
            registrations,
            subscriptions,
            "Deleted email account"
        );
        Ok(())
    }

    /// Encrypt a credential if one was given; blank means none
    pub(crate) fn seal_optional(
        &self,
        field: &'static str,
        raw: Option<&str>,
    ) -> VaultResult<Option<String>> {
        match raw.filter(|p| !p.is_empty()) {
            None => Ok(None),
            Some(password) => {
                validation::credential(field, password)?;
                self.cipher.encrypt(password).map(Some)
            }
        }
    }
}
