/// Administrator endpoints
use crate::{
    auth::Principal,
    context::AppContext,
    db::models::{Page, Paginated, User, UserId, UserStatus},
    error::VaultResult,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct UserSearch {
    pub keyword: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

/// Build admin routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id/status", put(set_status))
}

async fn list_users(
    State(ctx): State<AppContext>,
    principal: Principal,
    Query(search): Query<UserSearch>,
    Query(page): Query<Page>,
) -> VaultResult<Json<Paginated<User>>> {
    let users = ctx
        .accounts
        .list_users(&principal, search.keyword.as_deref(), page)
        .await?;
    Ok(Json(users))
}

async fn set_status(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> VaultResult<Json<User>> {
    principal.require_admin()?;
    let status = UserStatus::from_str(req.status.trim())?;
    let user = ctx.accounts.set_status(&principal, UserId(id), status).await?;
    Ok(Json(user))
}
