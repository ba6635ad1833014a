/// Bulk import endpoint
use crate::{
    auth::Principal,
    context::AppContext,
    error::VaultResult,
    importer::{ImportRequest, ImportSummary},
};
use axum::{extract::State, routing::post, Json, Router};

/// Build import routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/import/records", post(import_records))
}

async fn import_records(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(req): Json<ImportRequest>,
) -> VaultResult<Json<ImportSummary>> {
    let summary = ctx
        .importer
        .import_records(principal.user_id, req, &ctx.shutdown)
        .await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_import_reports_per_row_errors() {
        let app = TestApp::new().await;
        let token = app.sign_up("alice").await;

        let (status, summary) = app
            .request(
                Method::POST,
                "/api/v1/import/records",
                Some(&token),
                Some(json!({
                    "import_passwords": true,
                    "records": [
                        {"platform_name": "GitHub", "login_identifier": "alice@example.com", "password": "pw1"},
                        {"platform_name": "", "login_identifier": "alice"},
                        {"platform_name": "GitHub", "login_identifier": "alice@example.com"},
                    ],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["saved_count"], 1);
        assert_eq!(summary["error_count"], 2);
        assert_eq!(summary["cancelled"], false);
        let messages = summary["error_messages"].as_array().unwrap();
        assert!(messages[0].as_str().unwrap().starts_with("Row 3"));
        assert!(messages[1].as_str().unwrap().starts_with("Row 4"));

        let (_, listed) = app
            .request(
                Method::GET,
                "/api/v1/platform-registrations",
                Some(&token),
                None,
            )
            .await;
        assert_eq!(listed["meta"]["total_items"], 1);
        assert_eq!(listed["items"][0]["has_password"], true);
    }

    #[tokio::test]
    async fn test_import_requires_authentication() {
        let app = TestApp::new().await;
        let (status, _) = app
            .request(
                Method::POST,
                "/api/v1/import/records",
                None,
                Some(json!({"records": []})),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
