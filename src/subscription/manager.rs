/// Subscription manager implementation using runtime queries
use super::{
    dashboard::{estimated_spending, DashboardSummary, PlatformSubscriptionCount, UPCOMING_RENEWAL_DAYS},
    NewSubscription, SubscriptionFilter, SubscriptionUpdate,
};
use crate::{
    db::{
        self,
        models::{
            BillingCycle, Page, Paginated, ServiceSubscription, SubscriptionDetail,
            SubscriptionStatus, UserId,
        },
    },
    error::{map_unique_violation, ConflictEntity, VaultError, VaultResult},
    metrics,
    patch::Patch,
    registry::order_column,
    validation,
};
use chrono::{Duration, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, platform_registration_id, service_name, description, status, cost, billing_cycle, next_renewal_date, payment_method_notes, is_read, created_at, updated_at";

const DETAIL_SELECT: &str = "SELECT s.id, s.user_id, s.platform_registration_id, s.service_name,
        s.description, s.status, s.cost, s.billing_cycle, s.next_renewal_date,
        s.payment_method_notes, s.is_read, s.created_at, s.updated_at,
        p.name AS platform_name, e.email_address AS email_address,
        r.login_username AS login_username
     FROM service_subscription s
     JOIN platform_registration r ON r.id = s.platform_registration_id
     JOIN platform p ON p.id = r.platform_id
     LEFT JOIN email_account e ON e.id = r.email_account_id";

const FROM_JOINED: &str = " FROM service_subscription s
     JOIN platform_registration r ON r.id = s.platform_registration_id
     JOIN platform p ON p.id = r.platform_id
     LEFT JOIN email_account e ON e.id = r.email_account_id";

const SORTABLE: &[(&str, &str)] = &[
    ("service_name", "s.service_name"),
    ("status", "s.status"),
    ("cost", "s.cost"),
    ("billing_cycle", "s.billing_cycle"),
    ("next_renewal_date", "s.next_renewal_date"),
    ("created_at", "s.created_at"),
    ("updated_at", "s.updated_at"),
];

/// List filter after parsing
struct ParsedFilter {
    platform_registration_id: Option<i64>,
    status: Option<SubscriptionStatus>,
    billing_cycle: Option<BillingCycle>,
    renewal_start: Option<NaiveDate>,
    renewal_end: Option<NaiveDate>,
    platform_name: Option<String>,
    email: Option<String>,
    username: Option<String>,
}

impl ParsedFilter {
    fn parse(filter: &SubscriptionFilter) -> VaultResult<Self> {
        let status = validation::optional(filter.status.as_deref())
            .map(|s| SubscriptionStatus::from_str(&s))
            .transpose()?;
        let billing_cycle = validation::optional(filter.billing_cycle.as_deref())
            .map(|c| BillingCycle::from_str(&c))
            .transpose()?;

        Ok(Self {
            platform_registration_id: filter.platform_registration_id,
            status,
            billing_cycle,
            renewal_start: validation::renewal_date(filter.renewal_date_start.as_deref())?,
            renewal_end: validation::renewal_date(filter.renewal_date_end.as_deref())?,
            platform_name: validation::optional(filter.platform_name.as_deref()),
            email: validation::optional(filter.email.as_deref()),
            username: validation::optional(filter.username.as_deref()),
        })
    }
}

fn push_subscription_filters(qb: &mut QueryBuilder<'_, Sqlite>, user_id: UserId, filter: &ParsedFilter) {
    qb.push(" WHERE s.deleted_at IS NULL AND r.deleted_at IS NULL AND s.user_id = ")
        .push_bind(user_id);
    if let Some(registration_id) = filter.platform_registration_id {
        qb.push(" AND s.platform_registration_id = ").push_bind(registration_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND s.status = ").push_bind(status);
    }
    if let Some(cycle) = filter.billing_cycle {
        qb.push(" AND s.billing_cycle = ").push_bind(cycle);
    }
    if let Some(start) = filter.renewal_start {
        qb.push(" AND s.next_renewal_date >= ").push_bind(start);
    }
    if let Some(end) = filter.renewal_end {
        qb.push(" AND s.next_renewal_date <= ").push_bind(end);
    }
    if let Some(name) = &filter.platform_name {
        qb.push(" AND LOWER(p.name) LIKE ")
            .push_bind(format!("%{}%", name.to_lowercase()));
    }
    if let Some(email) = &filter.email {
        qb.push(" AND LOWER(e.email_address) LIKE ")
            .push_bind(format!("%{}%", email.to_lowercase()));
    }
    if let Some(username) = &filter.username {
        qb.push(" AND LOWER(r.login_username) = ")
            .push_bind(username.to_lowercase());
    }
}

/// `NotFound` unless the registration is live and owned by the user
async fn ensure_registration(
    conn: &mut SqliteConnection,
    user_id: UserId,
    registration_id: i64,
) -> VaultResult<()> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM platform_registration WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
    )
    .bind(registration_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    found
        .map(|_| ())
        .ok_or_else(|| VaultError::NotFound("Platform registration not found".to_string()))
}

async fn service_name_taken(
    conn: &mut SqliteConnection,
    user_id: UserId,
    registration_id: i64,
    service_name: &str,
    exclude_id: Option<i64>,
) -> VaultResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM service_subscription
         WHERE user_id = ?1 AND platform_registration_id = ?2 AND service_name = ?3
           AND deleted_at IS NULL AND (?4 IS NULL OR id != ?4)",
    )
    .bind(user_id)
    .bind(registration_id)
    .bind(service_name)
    .bind(exclude_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

async fn subscription_by_id(
    conn: &mut SqliteConnection,
    user_id: UserId,
    id: i64,
) -> VaultResult<ServiceSubscription> {
    sqlx::query_as::<_, ServiceSubscription>(&format!(
        "SELECT {} FROM service_subscription WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        SUBSCRIPTION_COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| VaultError::NotFound("Service subscription not found".to_string()))
}

async fn subscription_detail(
    conn: &mut SqliteConnection,
    user_id: UserId,
    id: i64,
) -> VaultResult<SubscriptionDetail> {
    sqlx::query_as::<_, SubscriptionDetail>(&format!(
        "{} WHERE s.id = ?1 AND s.user_id = ?2 AND s.deleted_at IS NULL",
        DETAIL_SELECT
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| VaultError::NotFound("Service subscription not found".to_string()))
}

/// Rows the user owns in `table`, skipping soft-deleted ones where the table has them
async fn count_owned(
    conn: &mut SqliteConnection,
    table: &str,
    soft_deleted: bool,
    user_id: UserId,
) -> VaultResult<i64> {
    let live = if soft_deleted { " AND deleted_at IS NULL" } else { "" };
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE user_id = ?1{}",
        table, live
    ))
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

fn duplicate_service() -> VaultError {
    metrics::record_conflict("service_subscription");
    VaultError::conflict(ConflictEntity::ServiceSubscription, &["service_name"])
}

/// Subscription manager service
pub struct SubscriptionManager {
    db: SqlitePool,
}

impl SubscriptionManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create_subscription(
        &self,
        user_id: UserId,
        input: NewSubscription,
    ) -> VaultResult<SubscriptionDetail> {
        let service_name = validation::required("service_name", &input.service_name)?;
        let status = SubscriptionStatus::from_str(&input.status)?;
        let billing_cycle = BillingCycle::from_str(&input.billing_cycle)?;
        let cost = validation::cost(input.cost)?;
        let next_renewal_date = validation::renewal_date(input.next_renewal_date.as_deref())?;

        let mut tx = db::begin_write(&self.db).await?;
        ensure_registration(&mut tx, user_id, input.platform_registration_id).await?;
        if service_name_taken(&mut tx, user_id, input.platform_registration_id, &service_name, None)
            .await?
        {
            return Err(duplicate_service());
        }

        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO service_subscription
                (user_id, platform_registration_id, service_name, description, status, cost,
                 billing_cycle, next_renewal_date, payment_method_notes, is_read, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?10)
             RETURNING id",
        )
        .bind(user_id)
        .bind(input.platform_registration_id)
        .bind(&service_name)
        .bind(input.description.as_deref().unwrap_or_default())
        .bind(status)
        .bind(cost)
        .bind(billing_cycle)
        .bind(next_renewal_date)
        .bind(input.payment_method_notes.as_deref().unwrap_or_default())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            map_unique_violation(e, ConflictEntity::ServiceSubscription, &["service_name"])
        })?;

        let detail = subscription_detail(&mut tx, user_id, id).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = id,
            registration_id = input.platform_registration_id,
            service = %service_name,
            "Created service subscription"
        );
        Ok(detail)
    }

    pub async fn get_subscription(&self, user_id: UserId, id: i64) -> VaultResult<SubscriptionDetail> {
        let mut conn = self.db.acquire().await?;
        subscription_detail(&mut conn, user_id, id).await
    }

    pub async fn list_subscriptions(
        &self,
        user_id: UserId,
        filter: &SubscriptionFilter,
        page: Page,
    ) -> VaultResult<Paginated<SubscriptionDetail>> {
        let parsed = ParsedFilter::parse(filter)?;

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
        count_query.push(FROM_JOINED);
        push_subscription_filters(&mut count_query, user_id, &parsed);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.db).await?;

        let mut query = QueryBuilder::<Sqlite>::new(DETAIL_SELECT);
        push_subscription_filters(&mut query, user_id, &parsed);
        let column = order_column(filter.sort_by.as_deref(), SORTABLE, "s.created_at");
        query.push(format!(
            " ORDER BY {} {}, s.id {}",
            column,
            filter.order.as_sql(),
            filter.order.as_sql()
        ));
        if let Some((limit, offset)) = page.limit_offset() {
            query.push(" LIMIT ").push_bind(limit);
            query.push(" OFFSET ").push_bind(offset);
        }

        let items = query
            .build_query_as::<SubscriptionDetail>()
            .fetch_all(&self.db)
            .await?;

        Ok(Paginated {
            items,
            meta: page.meta(total),
        })
    }

    pub async fn update_subscription(
        &self,
        user_id: UserId,
        id: i64,
        update: SubscriptionUpdate,
    ) -> VaultResult<SubscriptionDetail> {
        let mut tx = db::begin_write(&self.db).await?;
        let current = subscription_by_id(&mut tx, user_id, id).await?;

        let service_name = match update.service_name {
            Patch::Set(name) => validation::required("service_name", &name)?,
            Patch::Unset => current.service_name.clone(),
        };
        let status = match update.status {
            Patch::Set(s) => SubscriptionStatus::from_str(&s)?,
            Patch::Unset => current.status,
        };
        let billing_cycle = match update.billing_cycle {
            Patch::Set(c) => BillingCycle::from_str(&c)?,
            Patch::Unset => current.billing_cycle,
        };
        let cost = match update.cost {
            Patch::Set(cost) => validation::cost(cost)?,
            Patch::Unset => current.cost,
        };
        let next_renewal_date = match update.next_renewal_date {
            Patch::Set(raw) => validation::renewal_date(raw.as_deref())?,
            Patch::Unset => current.next_renewal_date,
        };
        let description = update.description.apply(current.description.clone());
        let payment_method_notes = update
            .payment_method_notes
            .apply(current.payment_method_notes.clone());

        if service_name != current.service_name
            && service_name_taken(
                &mut tx,
                user_id,
                current.platform_registration_id,
                &service_name,
                Some(id),
            )
            .await?
        {
            return Err(duplicate_service());
        }

        sqlx::query(
            "UPDATE service_subscription
             SET service_name = ?1, description = ?2, status = ?3, cost = ?4, billing_cycle = ?5,
                 next_renewal_date = ?6, payment_method_notes = ?7, updated_at = ?8
             WHERE id = ?9 AND user_id = ?10",
        )
        .bind(&service_name)
        .bind(&description)
        .bind(status)
        .bind(cost)
        .bind(billing_cycle)
        .bind(next_renewal_date)
        .bind(&payment_method_notes)
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            map_unique_violation(e, ConflictEntity::ServiceSubscription, &["service_name"])
        })?;

        let detail = subscription_detail(&mut tx, user_id, id).await?;
        tx.commit().await?;
        Ok(detail)
    }

    pub async fn delete_subscription(&self, user_id: UserId, id: i64) -> VaultResult<()> {
        let result = sqlx::query(
            "DELETE FROM service_subscription WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(VaultError::NotFound("Service subscription not found".to_string()));
        }

        tracing::info!(user_id = %user_id, subscription_id = id, "Deleted service subscription");
        Ok(())
    }

    /// Counts, estimated spend and renewals due within 30 days of `today`
    pub async fn dashboard_summary(
        &self,
        user_id: UserId,
        today: NaiveDate,
    ) -> VaultResult<DashboardSummary> {
        let mut conn = self.db.acquire().await?;

        let active: Vec<(BillingCycle, f64)> = sqlx::query_as(&format!(
            "SELECT s.billing_cycle, s.cost{}
             WHERE s.user_id = ?1 AND s.status = 'active'
               AND s.deleted_at IS NULL AND r.deleted_at IS NULL",
            FROM_JOINED
        ))
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;
        let active_subscriptions_count = active.len() as i64;
        let (estimated_monthly_spending, estimated_yearly_spending) = estimated_spending(active);

        let upcoming_renewals = sqlx::query_as::<_, SubscriptionDetail>(&format!(
            "{} WHERE s.user_id = ?1 AND s.status = 'active'
               AND s.deleted_at IS NULL AND r.deleted_at IS NULL
               AND s.next_renewal_date BETWEEN ?2 AND ?3
             ORDER BY s.next_renewal_date ASC, s.id ASC",
            DETAIL_SELECT
        ))
        .bind(user_id)
        .bind(today)
        .bind(today + Duration::days(UPCOMING_RENEWAL_DAYS))
        .fetch_all(&mut *conn)
        .await?;

        let subscriptions_by_platform = sqlx::query_as::<_, PlatformSubscriptionCount>(&format!(
            "SELECT p.name AS platform_name, COUNT(s.id) AS subscription_count{}
             WHERE s.user_id = ?1 AND s.status = 'active'
               AND s.deleted_at IS NULL AND r.deleted_at IS NULL
             GROUP BY p.name
             ORDER BY p.name",
            FROM_JOINED
        ))
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        let summary = DashboardSummary {
            active_subscriptions_count,
            estimated_monthly_spending,
            estimated_yearly_spending,
            upcoming_renewals,
            subscriptions_by_platform,
            total_email_accounts: count_owned(&mut conn, "email_account", true, user_id).await?,
            total_platforms: count_owned(&mut conn, "platform", false, user_id).await?,
            total_platform_registrations: count_owned(&mut conn, "platform_registration", true, user_id)
                .await?,
            total_service_subscriptions: count_owned(&mut conn, "service_subscription", true, user_id)
                .await?,
        };

        tracing::debug!(
            user_id = %user_id,
            active = summary.active_subscriptions_count,
            upcoming = summary.upcoming_renewals.len(),
            "Built dashboard summary"
        );
        Ok(summary)
    }
}
