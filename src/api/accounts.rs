/// Sign-up, login and profile endpoints
use crate::{
    account::{ChangePasswordRequest, LoginRequest, RegisterRequest, SessionResponse},
    auth::Principal,
    context::AppContext,
    db::models::User,
    error::VaultResult,
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

/// Build account routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/password", post(change_password))
}

async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> VaultResult<(StatusCode, Json<SessionResponse>)> {
    let (user, token) = ctx.accounts.register(req).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse::new(user, token))))
}

async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> VaultResult<Json<SessionResponse>> {
    let (user, token) = ctx.accounts.login(&req.username, &req.password).await?;
    Ok(Json(SessionResponse::new(user, token)))
}

async fn me(State(ctx): State<AppContext>, principal: Principal) -> VaultResult<Json<User>> {
    let user = ctx.accounts.get_user(principal.user_id).await?;
    Ok(Json(user))
}

async fn change_password(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(req): Json<ChangePasswordRequest>,
) -> VaultResult<StatusCode> {
    ctx.accounts
        .change_password(principal.user_id, &req.old_password, &req.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
