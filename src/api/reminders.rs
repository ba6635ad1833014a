/// Renewal reminder endpoints
use crate::{
    auth::Principal, context::AppContext, error::VaultResult, reminders::Reminder,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RemindersResponse {
    pub reminders: Vec<Reminder>,
}

/// Build reminder routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/reminders", get(list_reminders))
        .route("/reminders/:id/read", post(mark_read))
}

async fn list_reminders(
    State(ctx): State<AppContext>,
    principal: Principal,
) -> VaultResult<Json<RemindersResponse>> {
    let reminders = ctx.reminders.get_user_reminders(principal.user_id).await?;
    Ok(Json(RemindersResponse { reminders }))
}

async fn mark_read(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<StatusCode> {
    ctx.reminders.mark_as_read(principal.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
