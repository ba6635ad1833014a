/// Platforms: explicit CRUD, find-or-create and the hard cascade delete
use super::{order_column, NewPlatform, PlatformFilter, PlatformSummary, PlatformUpdate, RegistryManager};
use crate::{
    db::{
        self,
        models::{Page, Paginated, Platform, UserId},
    },
    error::{map_unique_violation, ConflictEntity, VaultError, VaultResult},
    metrics,
    validation,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

const PLATFORM_COLUMNS: &str = "id, user_id, name, website_url, notes, created_at, updated_at";

const SUMMARY_SELECT: &str = "SELECT p.id, p.user_id, p.name, p.website_url, p.notes, p.created_at, p.updated_at,
        (SELECT COUNT(*) FROM platform_registration r
          WHERE r.platform_id = p.id AND r.deleted_at IS NULL) AS registration_count
     FROM platform p";

const SORTABLE: &[(&str, &str)] = &[
    ("name", "p.name"),
    ("website_url", "p.website_url"),
    ("created_at", "p.created_at"),
    ("updated_at", "p.updated_at"),
    ("registration_count", "registration_count"),
];

pub(crate) async fn platform_by_name(
    conn: &mut SqliteConnection,
    user_id: UserId,
    name: &str,
) -> VaultResult<Option<Platform>> {
    let platform = sqlx::query_as::<_, Platform>(&format!(
        "SELECT {} FROM platform WHERE user_id = ?1 AND name = ?2",
        PLATFORM_COLUMNS
    ))
    .bind(user_id)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(platform)
}

/// `NotFound` when missing or owned by someone else
pub(crate) async fn platform_by_id(
    conn: &mut SqliteConnection,
    user_id: UserId,
    id: i64,
) -> VaultResult<Platform> {
    sqlx::query_as::<_, Platform>(&format!(
        "SELECT {} FROM platform WHERE id = ?1 AND user_id = ?2",
        PLATFORM_COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| VaultError::NotFound("Platform not found".to_string()))
}

/// Look up a platform by name and create it when absent. The website URL is
/// only written on creation. Returns whether the row is new.
pub(crate) async fn find_or_create_platform(
    conn: &mut SqliteConnection,
    user_id: UserId,
    name: &str,
    website_url: Option<&str>,
) -> VaultResult<(Platform, bool)> {
    if let Some(existing) = platform_by_name(conn, user_id, name).await? {
        return Ok((existing, false));
    }

    let now = Utc::now();
    let inserted = sqlx::query_as::<_, Platform>(&format!(
        "INSERT INTO platform (user_id, name, website_url, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, '', ?4, ?4)
         RETURNING {}",
        PLATFORM_COLUMNS
    ))
    .bind(user_id)
    .bind(name)
    .bind(website_url.map(str::trim).unwrap_or_default())
    .bind(now)
    .fetch_one(&mut *conn)
    .await;

    match inserted {
        Ok(platform) => {
            tracing::debug!(user_id = %user_id, platform_id = platform.id, name, "Created platform");
            Ok((platform, true))
        }
        Err(e) => match map_unique_violation(e, ConflictEntity::Platform, &["name"]) {
            VaultError::Conflict(conflict) => platform_by_name(conn, user_id, name)
                .await?
                .map(|p| (p, false))
                .ok_or(VaultError::Conflict(conflict)),
            other => Err(other),
        },
    }
}

fn push_platform_filters(qb: &mut QueryBuilder<'_, Sqlite>, user_id: UserId, filter: &PlatformFilter) {
    qb.push(" WHERE p.user_id = ").push_bind(user_id);
    if let Some(name) = validation::optional(filter.name.as_deref()) {
        qb.push(" AND LOWER(p.name) LIKE ")
            .push_bind(format!("%{}%", name.to_lowercase()));
    }
}

impl RegistryManager {
    /// Find or create a platform in its own transaction
    pub async fn find_or_create_platform(
        &self,
        user_id: UserId,
        name: &str,
        website_url: Option<&str>,
    ) -> VaultResult<Platform> {
        let name = validation::required("name", name)?;
        let mut tx = db::begin_write(&self.db).await?;
        let (platform, _) = find_or_create_platform(&mut tx, user_id, &name, website_url).await?;
        tx.commit().await?;
        Ok(platform)
    }

    /// Create a platform; an existing name is a conflict
    pub async fn create_platform(&self, user_id: UserId, input: NewPlatform) -> VaultResult<Platform> {
        let name = validation::required("name", &input.name)?;
        validation::length("name", &name, 1, 100)?;

        let mut conn = self.db.acquire().await?;
        if platform_by_name(&mut conn, user_id, &name).await?.is_some() {
            metrics::record_conflict("platform");
            return Err(VaultError::conflict(ConflictEntity::Platform, &["name"]));
        }

        let now = Utc::now();
        let platform = sqlx::query_as::<_, Platform>(&format!(
            "INSERT INTO platform (user_id, name, website_url, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             RETURNING {}",
            PLATFORM_COLUMNS
        ))
        .bind(user_id)
        .bind(&name)
        .bind(input.website_url.as_deref().map(str::trim).unwrap_or_default())
        .bind(input.notes.unwrap_or_default())
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_unique_violation(e, ConflictEntity::Platform, &["name"]))?;

        tracing::info!(user_id = %user_id, platform_id = platform.id, "Created platform");
        Ok(platform)
    }

    pub async fn get_platform(&self, user_id: UserId, id: i64) -> VaultResult<PlatformSummary> {
        sqlx::query_as::<_, PlatformSummary>(&format!(
            "{} WHERE p.id = ?1 AND p.user_id = ?2",
            SUMMARY_SELECT
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| VaultError::NotFound("Platform not found".to_string()))
    }

    pub async fn list_platforms(
        &self,
        user_id: UserId,
        filter: &PlatformFilter,
        page: Page,
    ) -> VaultResult<Paginated<PlatformSummary>> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM platform p");
        push_platform_filters(&mut count_query, user_id, filter);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.db).await?;

        let mut query = QueryBuilder::<Sqlite>::new(SUMMARY_SELECT);
        push_platform_filters(&mut query, user_id, filter);
        let column = order_column(filter.sort_by.as_deref(), SORTABLE, "p.created_at");
        query.push(format!(
            " ORDER BY {} {}, p.id {}",
            column,
            filter.order.as_sql(),
            filter.order.as_sql()
        ));
        if let Some((limit, offset)) = page.limit_offset() {
            query.push(" LIMIT ").push_bind(limit);
            query.push(" OFFSET ").push_bind(offset);
        }

        let items = query
            .build_query_as::<PlatformSummary>()
            .fetch_all(&self.db)
            .await?;

        Ok(Paginated {
            items,
            meta: page.meta(total),
        })
    }

    pub async fn update_platform(
        &self,
        user_id: UserId,
        id: i64,
        update: PlatformUpdate,
    ) -> VaultResult<Platform> {
        let mut tx = db::begin_write(&self.db).await?;
        let current = platform_by_id(&mut tx, user_id, id).await?;

        let name = match update.name.into_option() {
            Some(raw) => {
                let name = validation::required("name", &raw)?;
                validation::length("name", &name, 1, 100)?;
                name
            }
            None => current.name.clone(),
        };
        if name != current.name {
            if let Some(other) = platform_by_name(&mut tx, user_id, &name).await? {
                if other.id != id {
                    metrics::record_conflict("platform");
                    return Err(VaultError::conflict(ConflictEntity::Platform, &["name"]));
                }
            }
        }
        let website_url = update.website_url.apply(current.website_url.clone());
        let notes = update.notes.apply(current.notes.clone());

        let platform = sqlx::query_as::<_, Platform>(&format!(
            "UPDATE platform SET name = ?1, website_url = ?2, notes = ?3, updated_at = ?4
             WHERE id = ?5 AND user_id = ?6
             RETURNING {}",
            PLATFORM_COLUMNS
        ))
        .bind(&name)
        .bind(website_url.trim())
        .bind(&notes)
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, ConflictEntity::Platform, &["name"]))?;

        tx.commit().await?;
        Ok(platform)
    }

    /// Delete a platform together with its registrations and their
    /// subscriptions. All-or-nothing.
    pub async fn delete_platform(&self, user_id: UserId, id: i64) -> VaultResult<()> {
        let mut tx = db::begin_write(&self.db).await?;
        platform_by_id(&mut tx, user_id, id).await?;

        let subscriptions = sqlx::query(
            "DELETE FROM service_subscription
             WHERE user_id = ?1 AND platform_registration_id IN (
                 SELECT id FROM platform_registration WHERE user_id = ?1 AND platform_id = ?2
             )",
        )
        .bind(user_id)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let registrations =
            sqlx::query("DELETE FROM platform_registration WHERE user_id = ?1 AND platform_id = ?2")
                .bind(user_id)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        sqlx::query("DELETE FROM platform WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            platform_id = id,
            registrations,
            subscriptions,
            "Deleted platform"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Patch;
    use crate::registry::{on_disk_manager, test_manager, NewRegistration};
    use std::sync::Arc;

    fn new_platform(name: &str) -> NewPlatform {
        NewPlatform {
            name: name.to_string(),
            ..Default::default()
        }
    }

    async fn count(manager: &RegistryManager, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&manager.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_platform_name_is_unique_per_user() {
        let (manager, user) = test_manager().await;

        let created = manager
            .find_or_create_platform(user, "Netflix", Some("https://netflix.com"))
            .await
            .unwrap();
        let found = manager
            .find_or_create_platform(user, "Netflix", Some("https://other.example"))
            .await
            .unwrap();
        assert_eq!(created.id, found.id);
        // URL is only applied on creation
        assert_eq!(found.website_url, "https://netflix.com");

        let err = manager
            .create_platform(user, new_platform("Netflix"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(count(&manager, "platform").await, 1);
    }

    #[tokio::test]
    async fn test_platforms_are_private_to_each_user() {
        let (manager, alice) = test_manager().await;
        let bob = crate::db::insert_test_user(&manager.db, "bob").await;

        let alices = manager.create_platform(alice, new_platform("GitHub")).await.unwrap();
        let bobs = manager.create_platform(bob, new_platform("GitHub")).await.unwrap();
        assert_ne!(alices.id, bobs.id);

        assert!(matches!(
            manager.get_platform(bob, alices.id).await,
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            manager.delete_platform(bob, alices.id).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_conflict() {
        let (manager, user) = test_manager().await;
        manager.create_platform(user, new_platform("A")).await.unwrap();
        let b = manager.create_platform(user, new_platform("B")).await.unwrap();

        let rename = PlatformUpdate {
            name: Patch::Set("A".to_string()),
            ..Default::default()
        };
        assert!(manager.update_platform(user, b.id, rename).await.unwrap_err().is_conflict());

        let rename = PlatformUpdate {
            name: Patch::Set("C".to_string()),
            ..Default::default()
        };
        assert_eq!(manager.update_platform(user, b.id, rename).await.unwrap().name, "C");
    }

    #[tokio::test]
    async fn test_list_counts_registrations() {
        let (manager, user) = test_manager().await;
        let platform = manager.create_platform(user, new_platform("Steam")).await.unwrap();
        manager.create_platform(user, new_platform("Epic")).await.unwrap();

        for username in ["one", "two"] {
            manager
                .create_registration(
                    user,
                    NewRegistration {
                        platform_id: platform.id,
                        login_username: Some(username.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let filter = PlatformFilter {
            name: Some("ste".to_string()),
            ..Default::default()
        };
        let page = manager.list_platforms(user, &filter, Page::default()).await.unwrap();
        assert_eq!(page.meta.total_items, 1);
        assert_eq!(page.items[0].registration_count, 2);
    }

    #[tokio::test]
    async fn test_delete_platform_cascades() {
        let (manager, user) = test_manager().await;
        let platform = manager.create_platform(user, new_platform("Spotify")).await.unwrap();
        let registration = manager
            .create_registration(
                user,
                NewRegistration {
                    platform_id: platform.id,
                    login_username: Some("alice".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        crate::subscription::insert_test_subscription(&manager.db, user, registration.registration.id, "Premium").await;

        manager.delete_platform(user, platform.id).await.unwrap();

        assert_eq!(count(&manager, "platform").await, 0);
        assert_eq!(count(&manager, "platform_registration").await, 0);
        assert_eq!(count(&manager, "service_subscription").await, 0);
    }

    #[tokio::test]
    async fn test_delete_platform_rolls_back_on_failure() {
        let (manager, user) = test_manager().await;
        let platform = manager.create_platform(user, new_platform("Spotify")).await.unwrap();
        let registration = manager
            .create_registration(
                user,
                NewRegistration {
                    platform_id: platform.id,
                    login_username: Some("alice".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        for service in ["Premium", "Family", "Duo"] {
            crate::subscription::insert_test_subscription(
                &manager.db,
                user,
                registration.registration.id,
                service,
            )
            .await;
        }

        // Fail after the subscriptions are gone but before the registration is
        sqlx::query(
            "CREATE TRIGGER block_registration_delete BEFORE DELETE ON platform_registration
             BEGIN SELECT RAISE(ABORT, 'blocked'); END",
        )
        .execute(&manager.db)
        .await
        .unwrap();

        assert!(manager.delete_platform(user, platform.id).await.is_err());

        assert_eq!(count(&manager, "platform").await, 1);
        assert_eq!(count(&manager, "platform_registration").await, 1);
        assert_eq!(count(&manager, "service_subscription").await, 3);
    }

    #[tokio::test]
    async fn test_stale_snapshot_insert_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, user) = on_disk_manager(dir.path()).await;

        // Deferred transaction whose read snapshot predates the other commit
        let mut stale = manager.db.begin().await.unwrap();
        assert!(platform_by_name(&mut stale, user, "Netflix").await.unwrap().is_none());

        let winner = manager.find_or_create_platform(user, "Netflix", None).await.unwrap();

        let err = find_or_create_platform(&mut stale, user, "Netflix", None)
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "expected conflict, got {:?}", err);
        stale.rollback().await.unwrap();

        let found = manager.find_or_create_platform(user, "Netflix", None).await.unwrap();
        assert_eq!(found.id, winner.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_find_or_create_yields_one_platform() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, user) = on_disk_manager(dir.path()).await;
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.find_or_create_platform(user, "Netflix", None).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(count(&manager, "platform").await, 1);
    }
}
