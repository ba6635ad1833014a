/// Platform endpoints
use crate::{
    api::patch_body,
    auth::Principal,
    context::AppContext,
    db::models::{Page, Paginated, Platform},
    error::VaultResult,
    registry::{NewPlatform, PlatformFilter, PlatformSummary, PlatformUpdate},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

/// Build platform routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/platforms", get(list_platforms).post(create_platform))
        .route(
            "/platforms/:id",
            get(get_platform).put(update_platform).delete(delete_platform),
        )
}

async fn list_platforms(
    State(ctx): State<AppContext>,
    principal: Principal,
    Query(filter): Query<PlatformFilter>,
    Query(page): Query<Page>,
) -> VaultResult<Json<Paginated<PlatformSummary>>> {
    let platforms = ctx
        .registry
        .list_platforms(principal.user_id, &filter, page)
        .await?;
    Ok(Json(platforms))
}

async fn create_platform(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(req): Json<NewPlatform>,
) -> VaultResult<(StatusCode, Json<Platform>)> {
    let platform = ctx.registry.create_platform(principal.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(platform)))
}

async fn get_platform(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<Json<PlatformSummary>> {
    let platform = ctx.registry.get_platform(principal.user_id, id).await?;
    Ok(Json(platform))
}

async fn update_platform(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> VaultResult<Json<Platform>> {
    let update: PlatformUpdate = patch_body(body)?;
    let platform = ctx
        .registry
        .update_platform(principal.user_id, id, update)
        .await?;
    Ok(Json(platform))
}

async fn delete_platform(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<StatusCode> {
    ctx.registry.delete_platform(principal.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
