/// Dashboard summary endpoint
use crate::{
    auth::Principal, context::AppContext, error::VaultResult, subscription::DashboardSummary,
};
use axum::{extract::State, routing::get, Json, Router};

/// Build dashboard routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/dashboard", get(dashboard_summary))
        .route("/dashboard/summary", get(dashboard_summary))
}

async fn dashboard_summary(
    State(ctx): State<AppContext>,
    principal: Principal,
) -> VaultResult<Json<DashboardSummary>> {
    let today = ctx.clock.now().date_naive();
    let summary = ctx
        .subscriptions
        .dashboard_summary(principal.user_id, today)
        .await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_dashboard_summary() {
        // test clock sits at 2026-03-01
        let app = TestApp::new().await;
        let token = app.sign_up("alice").await;

        let (status, body) = app
            .request(Method::GET, "/api/v1/dashboard", None, None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", body);

        let (_, registration) = app
            .request(
                Method::POST,
                "/api/v1/platform-registrations/by-name",
                Some(&token),
                Some(json!({"platform_name": "Spotify", "email_address": "alice@example.com"})),
            )
            .await;
        let registration_id = registration["id"].as_i64().unwrap();

        for (name, cycle, cost, date) in [
            ("Premium", "monthly", 10.0, "2026-03-15"),
            ("Backup", "yearly", 24.0, "2026-09-01"),
        ] {
            let (status, _) = app
                .request(
                    Method::POST,
                    "/api/v1/service-subscriptions",
                    Some(&token),
                    Some(json!({
                        "platform_registration_id": registration_id,
                        "service_name": name,
                        "status": "active",
                        "cost": cost,
                        "billing_cycle": cycle,
                        "next_renewal_date": date,
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = app
            .request(Method::GET, "/api/v1/dashboard", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["active_subscriptions_count"], 2);
        assert_eq!(body["estimated_monthly_spending"], 12.0);
        assert_eq!(body["estimated_yearly_spending"], 144.0);
        assert_eq!(body["upcoming_renewals"].as_array().unwrap().len(), 1);
        assert_eq!(body["upcoming_renewals"][0]["service_name"], "Premium");
        assert_eq!(body["upcoming_renewals"][0]["platform_name"], "Spotify");
        assert_eq!(
            body["subscriptions_by_platform"],
            json!([{"platform_name": "Spotify", "subscription_count": 2}])
        );
        assert_eq!(body["total_email_accounts"], 1);
        assert_eq!(body["total_platforms"], 1);
        assert_eq!(body["total_platform_registrations"], 1);
        assert_eq!(body["total_service_subscriptions"], 2);

        let (_, summary) = app
            .request(Method::GET, "/api/v1/dashboard/summary", Some(&token), None)
            .await;
        assert_eq!(summary, body);

        let other = app.sign_up("bob").await;
        let (_, body) = app
            .request(Method::GET, "/api/v1/dashboard", Some(&other), None)
            .await;
        assert_eq!(body["active_subscriptions_count"], 0);
        assert_eq!(body["total_platforms"], 0);
    }
}
