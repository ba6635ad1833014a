/// Platform registration endpoints
use crate::{
    api::patch_body,
    auth::Principal,
    context::AppContext,
    db::models::{Page, Paginated, RegistrationDetail},
    error::VaultResult,
    registry::{
        NewRegistration, NewRegistrationByNames, RegistrationFilter, RegistrationUpdate,
        RevealedPassword,
    },
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

/// Build registration routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/platform-registrations",
            get(list_registrations).post(create_registration),
        )
        .route(
            "/platform-registrations/by-name",
            post(create_registration_by_names),
        )
        .route(
            "/platform-registrations/:id",
            get(get_registration)
                .put(update_registration)
                .delete(delete_registration),
        )
        .route(
            "/platform-registrations/:id/password",
            get(reveal_password),
        )
}

async fn list_registrations(
    State(ctx): State<AppContext>,
    principal: Principal,
    Query(filter): Query<RegistrationFilter>,
    Query(page): Query<Page>,
) -> VaultResult<Json<Paginated<RegistrationDetail>>> {
    let registrations = ctx
        .registry
        .list_registrations(principal.user_id, &filter, page)
        .await?;
    Ok(Json(registrations))
}

async fn create_registration(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(req): Json<NewRegistration>,
) -> VaultResult<(StatusCode, Json<RegistrationDetail>)> {
    let registration = ctx
        .registry
        .create_registration(principal.user_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

async fn create_registration_by_names(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(req): Json<NewRegistrationByNames>,
) -> VaultResult<(StatusCode, Json<RegistrationDetail>)> {
    let registration = ctx
        .registry
        .create_registration_by_names(principal.user_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

async fn get_registration(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<Json<RegistrationDetail>> {
    let registration = ctx.registry.get_registration(principal.user_id, id).await?;
    Ok(Json(registration))
}

async fn update_registration(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> VaultResult<Json<RegistrationDetail>> {
    let update: RegistrationUpdate = patch_body(body)?;
    let registration = ctx
        .registry
        .update_registration(principal.user_id, id, update)
        .await?;
    Ok(Json(registration))
}

async fn reveal_password(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<Json<RevealedPassword>> {
    let revealed = ctx
        .registry
        .reveal_registration_password(principal.user_id, id)
        .await?;
    Ok(Json(revealed))
}

async fn delete_registration(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<StatusCode> {
    ctx.registry
        .delete_registration(principal.user_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
