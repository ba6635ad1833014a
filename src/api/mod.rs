/// API routes and handlers
pub mod accounts;
pub mod admin;
pub mod dashboard;
pub mod email_accounts;
pub mod health;
pub mod import;
pub mod middleware;
pub mod platforms;
pub mod registrations;
pub mod reminders;
pub mod subscriptions;

use crate::{
    context::AppContext,
    error::{VaultError, VaultResult},
};
use axum::Router;
use serde::de::DeserializeOwned;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    let v1 = Router::new()
        .merge(accounts::routes())
        .merge(email_accounts::routes())
        .merge(platforms::routes())
        .merge(registrations::routes())
        .merge(subscriptions::routes())
        .merge(reminders::routes())
        .merge(dashboard::routes())
        .merge(import::routes())
        .merge(admin::routes());

    Router::new()
        .nest("/api/v1", v1)
        .merge(health::routes())
}

/// Decode a patch body, reporting unknown or malformed fields as invalid input
pub(crate) fn patch_body<T: DeserializeOwned>(body: serde_json::Value) -> VaultResult<T> {
    serde_json::from_value(body).map_err(|e| VaultError::invalid("body", e.to_string()))
}
