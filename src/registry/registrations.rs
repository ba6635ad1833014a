/// Platform registrations: the identities a user holds on each platform
use super::{
    email_accounts::{email_account_by_id, find_or_create_email_account},
    order_column,
    platforms::{find_or_create_platform, platform_by_id},
    NewRegistration, NewRegistrationByNames, RegistrationFilter, RegistrationUpdate,
    RegistryManager, RevealedPassword,
};
use crate::{
    db::{
        self,
        models::{Page, Paginated, PlatformRegistration, RegistrationDetail, UserId},
    },
    error::{map_unique_violation, ConflictEntity, VaultError, VaultResult},
    metrics,
    patch::Patch,
    validation,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

const REGISTRATION_COLUMNS: &str = "id, user_id, platform_id, email_account_id, login_username, login_password_encrypted, notes, phone_number, created_at, updated_at";

const DETAIL_SELECT: &str = "SELECT r.id, r.user_id, r.platform_id, r.email_account_id, r.login_username,
        r.login_password_encrypted, r.notes, r.phone_number, r.created_at, r.updated_at,
        p.name AS platform_name, e.email_address AS email_address,
        (r.login_password_encrypted IS NOT NULL) AS has_password
     FROM platform_registration r
     JOIN platform p ON p.id = r.platform_id
     LEFT JOIN email_account e ON e.id = r.email_account_id";

const SORTABLE: &[(&str, &str)] = &[
    ("login_username", "r.login_username"),
    ("notes", "r.notes"),
    ("phone_number", "r.phone_number"),
    ("created_at", "r.created_at"),
    ("updated_at", "r.updated_at"),
    ("email_address", "e.email_address"),
    ("platform_name", "p.name"),
];

/// How a registration identifies the user on its platform: a login name, a
/// linked email account, or both. Blank usernames are normalised away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationIdentity {
    pub login_username: Option<String>,
    pub email_account_id: Option<i64>,
}

impl RegistrationIdentity {
    pub fn new(login_username: Option<&str>, email_account_id: Option<i64>) -> VaultResult<Self> {
        let identity = Self {
            login_username: validation::optional(login_username),
            email_account_id,
        };
        if identity.login_username.is_none() && identity.email_account_id.is_none() {
            return Err(VaultError::invalid(
                "login_username",
                "a login username or an email account is required",
            ));
        }
        Ok(identity)
    }

    fn conflict_fields(&self) -> &'static [&'static str] {
        match (&self.login_username, self.email_account_id) {
            (Some(_), Some(_)) => &["login_username", "email_account_id"],
            (Some(_), None) => &["login_username"],
            _ => &["email_account_id"],
        }
    }

    fn conflict(&self) -> VaultError {
        VaultError::conflict(ConflictEntity::PlatformRegistration, self.conflict_fields())
    }
}

/// Id of a live registration on the platform with the same identity
pub(crate) async fn find_conflicting_registration(
    conn: &mut SqliteConnection,
    user_id: UserId,
    platform_id: i64,
    identity: &RegistrationIdentity,
    exclude_id: Option<i64>,
) -> VaultResult<Option<i64>> {
    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT id FROM platform_registration WHERE deleted_at IS NULL AND user_id = ",
    );
    query.push_bind(user_id);
    query.push(" AND platform_id = ").push_bind(platform_id);

    match &identity.login_username {
        Some(username) => {
            query.push(" AND login_username = ").push_bind(username.clone());
        }
        None => {
            query.push(" AND login_username IS NULL");
        }
    }
    match identity.email_account_id {
        Some(email_account_id) => {
            query.push(" AND email_account_id = ").push_bind(email_account_id);
        }
        None => {
            query.push(" AND email_account_id IS NULL");
        }
    }
    if let Some(id) = exclude_id {
        query.push(" AND id != ").push_bind(id);
    }
    query.push(" LIMIT 1");

    let existing: Option<i64> = query
        .build_query_scalar()
        .fetch_optional(&mut *conn)
        .await?;
    Ok(existing)
}

/// Insert a registration after the identity pre-check. A racing writer that
/// slips past the pre-check is stopped by the unique index; both paths yield
/// the same typed conflict.
pub(crate) async fn insert_registration(
    conn: &mut SqliteConnection,
    user_id: UserId,
    platform_id: i64,
    identity: &RegistrationIdentity,
    login_password_encrypted: Option<&str>,
    notes: &str,
    phone_number: &str,
) -> VaultResult<i64> {
    if find_conflicting_registration(conn, user_id, platform_id, identity, None)
        .await?
        .is_some()
    {
        metrics::record_conflict("platform_registration");
        return Err(identity.conflict());
    }

    let now = Utc::now();
    let inserted: Result<i64, sqlx::Error> = sqlx::query_scalar(
        "INSERT INTO platform_registration
            (user_id, platform_id, email_account_id, login_username, login_password_encrypted,
             notes, phone_number, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         RETURNING id",
    )
    .bind(user_id)
    .bind(platform_id)
    .bind(identity.email_account_id)
    .bind(&identity.login_username)
    .bind(login_password_encrypted)
    .bind(notes)
    .bind(phone_number)
    .bind(now)
    .fetch_one(&mut *conn)
    .await;

    let id = match inserted {
        Ok(id) => id,
        Err(e) => {
            let err = map_unique_violation(
                e,
                ConflictEntity::PlatformRegistration,
                identity.conflict_fields(),
            );
            if err.is_conflict() {
                metrics::record_conflict("platform_registration");
            }
            return Err(err);
        }
    };

    Ok(id)
}

async fn registration_by_id(
    conn: &mut SqliteConnection,
    user_id: UserId,
    id: i64,
) -> VaultResult<PlatformRegistration> {
    sqlx::query_as::<_, PlatformRegistration>(&format!(
        "SELECT {} FROM platform_registration WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        REGISTRATION_COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| VaultError::NotFound("Platform registration not found".to_string()))
}

pub(crate) async fn registration_detail(
    conn: &mut SqliteConnection,
    user_id: UserId,
    id: i64,
) -> VaultResult<RegistrationDetail> {
    sqlx::query_as::<_, RegistrationDetail>(&format!(
        "{} WHERE r.id = ?1 AND r.user_id = ?2 AND r.deleted_at IS NULL",
        DETAIL_SELECT
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| VaultError::NotFound("Platform registration not found".to_string()))
}

fn push_registration_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    user_id: UserId,
    filter: &RegistrationFilter,
) {
    qb.push(" WHERE r.deleted_at IS NULL AND r.user_id = ").push_bind(user_id);
    if let Some(platform_id) = filter.platform_id {
        qb.push(" AND r.platform_id = ").push_bind(platform_id);
    }
    if let Some(email_account_id) = filter.email_account_id {
        qb.push(" AND r.email_account_id = ").push_bind(email_account_id);
    }
    if let Some(username) = validation::optional(filter.username.as_deref()) {
        qb.push(" AND LOWER(r.login_username) = ")
            .push_bind(username.to_lowercase());
    }
}

impl RegistryManager {
    /// Register against an existing platform and, optionally, an existing
    /// email account. Both must belong to the caller.
    pub async fn create_registration(
        &self,
        user_id: UserId,
        input: NewRegistration,
    ) -> VaultResult<RegistrationDetail> {
        let mut tx = db::begin_write(&self.db).await?;

        platform_by_id(&mut tx, user_id, input.platform_id).await?;
        if let Some(email_account_id) = input.email_account_id {
            email_account_by_id(&mut tx, user_id, email_account_id).await?;
        }

        let identity =
            RegistrationIdentity::new(input.login_username.as_deref(), input.email_account_id)?;
        let password = self.seal_optional("login_password", input.login_password.as_deref())?;

        let id = insert_registration(
            &mut tx,
            user_id,
            input.platform_id,
            &identity,
            password.as_deref(),
            input.notes.as_deref().unwrap_or_default(),
            input.phone_number.as_deref().unwrap_or_default(),
        )
        .await?;
        let detail = registration_detail(&mut tx, user_id, id).await?;
        tx.commit().await?;

        metrics::record_registration_created("api");
        tracing::info!(user_id = %user_id, registration_id = id, platform_id = input.platform_id, "Created platform registration");
        Ok(detail)
    }

    /// Register by platform name and email address, creating either when it
    /// does not exist yet. Everything commits together or not at all.
    pub async fn create_registration_by_names(
        &self,
        user_id: UserId,
        input: NewRegistrationByNames,
    ) -> VaultResult<RegistrationDetail> {
        let platform_name = validation::required("platform_name", &input.platform_name)?;
        let email_address = match validation::optional(input.email_address.as_deref()) {
            Some(raw) => Some(validation::email("email_address", &raw)?),
            None => None,
        };
        let login_username = validation::optional(input.login_username.as_deref());
        if login_username.is_none() && email_address.is_none() {
            return Err(VaultError::invalid(
                "login_username",
                "a login username or an email address is required",
            ));
        }
        let password = self.seal_optional("login_password", input.login_password.as_deref())?;

        let mut tx = db::begin_write(&self.db).await?;

        let (platform, _) = find_or_create_platform(
            &mut tx,
            user_id,
            &platform_name,
            input.platform_website_url.as_deref(),
        )
        .await?;
        let email_account_id = match &email_address {
            Some(address) => Some(find_or_create_email_account(&mut tx, user_id, address).await?.id),
            None => None,
        };

        let identity = RegistrationIdentity::new(login_username.as_deref(), email_account_id)?;
        let id = insert_registration(
            &mut tx,
            user_id,
            platform.id,
            &identity,
            password.as_deref(),
            input.notes.as_deref().unwrap_or_default(),
            input.phone_number.as_deref().unwrap_or_default(),
        )
        .await?;
        let detail = registration_detail(&mut tx, user_id, id).await?;
        tx.commit().await?;

        metrics::record_registration_created("api");
        tracing::info!(user_id = %user_id, registration_id = id, platform = %platform.name, "Created platform registration");
        Ok(detail)
    }

    pub async fn get_registration(&self, user_id: UserId, id: i64) -> VaultResult<RegistrationDetail> {
        let mut conn = self.db.acquire().await?;
        registration_detail(&mut conn, user_id, id).await
    }

    pub async fn list_registrations(
        &self,
        user_id: UserId,
        filter: &RegistrationFilter,
        page: Page,
    ) -> VaultResult<Paginated<RegistrationDetail>> {
        let mut count_query = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM platform_registration r",
        );
        push_registration_filters(&mut count_query, user_id, filter);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.db).await?;

        let mut query = QueryBuilder::<Sqlite>::new(DETAIL_SELECT);
        push_registration_filters(&mut query, user_id, filter);
        let column = order_column(filter.sort_by.as_deref(), SORTABLE, "r.created_at");
        query.push(format!(
            " ORDER BY {} {}, r.id {}",
            column,
            filter.order.as_sql(),
            filter.order.as_sql()
        ));
        if let Some((limit, offset)) = page.limit_offset() {
            query.push(" LIMIT ").push_bind(limit);
            query.push(" OFFSET ").push_bind(offset);
        }

        let items = query
            .build_query_as::<RegistrationDetail>()
            .fetch_all(&self.db)
            .await?;

        Ok(Paginated {
            items,
            meta: page.meta(total),
        })
    }

    /// Apply a partial update. The result must still carry a username or an
    /// email account and must not collide with another registration.
    pub async fn update_registration(
        &self,
        user_id: UserId,
        id: i64,
        update: RegistrationUpdate,
    ) -> VaultResult<RegistrationDetail> {
        let mut tx = db::begin_write(&self.db).await?;
        let current = registration_by_id(&mut tx, user_id, id).await?;

        let login_username = match update.login_username {
            Patch::Set(raw) => validation::optional(raw.as_deref()),
            Patch::Unset => current.login_username.clone(),
        };
        let email_account_id = match update.email_address {
            Patch::Set(raw) => match validation::optional(raw.as_deref()) {
                Some(address) => {
                    let address = validation::email("email_address", &address)?;
                    Some(find_or_create_email_account(&mut tx, user_id, &address).await?.id)
                }
                None => None,
            },
            Patch::Unset => current.email_account_id,
        };

        let identity = RegistrationIdentity::new(login_username.as_deref(), email_account_id)?;
        if find_conflicting_registration(&mut tx, user_id, current.platform_id, &identity, Some(id))
            .await?
            .is_some()
        {
            metrics::record_conflict("platform_registration");
            return Err(identity.conflict());
        }

        let password = match update.login_password {
            Patch::Set(raw) => self.seal_optional("login_password", raw.as_deref())?,
            Patch::Unset => current.login_password_encrypted.clone(),
        };
        let notes = update.notes.apply(current.notes.clone());
        let phone_number = update.phone_number.apply(current.phone_number.clone());

        sqlx::query(
            "UPDATE platform_registration
             SET email_account_id = ?1, login_username = ?2, login_password_encrypted = ?3,
                 notes = ?4, phone_number = ?5, updated_at = ?6
             WHERE id = ?7 AND user_id = ?8",
        )
        .bind(identity.email_account_id)
        .bind(&identity.login_username)
        .bind(&password)
        .bind(&notes)
        .bind(&phone_number)
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            map_unique_violation(e, ConflictEntity::PlatformRegistration, identity.conflict_fields())
        })?;

        let detail = registration_detail(&mut tx, user_id, id).await?;
        tx.commit().await?;
        Ok(detail)
    }

    /// Decrypt the stored login password
    pub async fn reveal_registration_password(
        &self,
        user_id: UserId,
        id: i64,
    ) -> VaultResult<RevealedPassword> {
        let mut conn = self.db.acquire().await?;
        let registration = registration_by_id(&mut conn, user_id, id).await?;

        let sealed = registration.login_password_encrypted.ok_or_else(|| {
            VaultError::NotFound("No password stored for this registration".to_string())
        })?;
        let password = self.cipher.decrypt(&sealed)?;

        tracing::info!(user_id = %user_id, registration_id = id, "Revealed registration password");
        Ok(RevealedPassword { password })
    }

    /// Delete a registration and its subscriptions in one transaction
    pub async fn delete_registration(&self, user_id: UserId, id: i64) -> VaultResult<()> {
        let mut tx = db::begin_write(&self.db).await?;
        registration_by_id(&mut tx, user_id, id).await?;

        let subscriptions = sqlx::query(
            "DELETE FROM service_subscription WHERE platform_registration_id = ?1 AND user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM platform_registration WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(user_id = %user_id, registration_id = id, subscriptions, "Deleted platform registration");
        Ok(())
    }
}
