/// Email account endpoints
use crate::{
    api::patch_body,
    auth::Principal,
    context::AppContext,
    db::models::{EmailAccount, Page, Paginated},
    error::VaultResult,
    registry::{EmailAccountFilter, EmailAccountUpdate, NewEmailAccount},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

/// Build email account routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/email-accounts",
            get(list_email_accounts).post(create_email_account),
        )
        .route(
            "/email-accounts/:id",
            get(get_email_account)
                .put(update_email_account)
                .delete(delete_email_account),
        )
}

async fn list_email_accounts(
    State(ctx): State<AppContext>,
    principal: Principal,
    Query(filter): Query<EmailAccountFilter>,
    Query(page): Query<Page>,
) -> VaultResult<Json<Paginated<EmailAccount>>> {
    let accounts = ctx
        .registry
        .list_email_accounts(principal.user_id, &filter, page)
        .await?;
    Ok(Json(accounts))
}

async fn create_email_account(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(req): Json<NewEmailAccount>,
) -> VaultResult<(StatusCode, Json<EmailAccount>)> {
    let account = ctx
        .registry
        .create_email_account(principal.user_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_email_account(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<Json<EmailAccount>> {
    let account = ctx.registry.get_email_account(principal.user_id, id).await?;
    Ok(Json(account))
}

async fn update_email_account(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> VaultResult<Json<EmailAccount>> {
    let update: EmailAccountUpdate = patch_body(body)?;
    let account = ctx
        .registry
        .update_email_account(principal.user_id, id, update)
        .await?;
    Ok(Json(account))
}

async fn delete_email_account(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<StatusCode> {
    ctx.registry
        .delete_email_account(principal.user_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
