/// Service subscription endpoints
use crate::{
    api::patch_body,
    auth::Principal,
    context::AppContext,
    db::models::{Page, Paginated, SubscriptionDetail},
    error::VaultResult,
    subscription::{NewSubscription, SubscriptionFilter, SubscriptionUpdate},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

/// Build subscription routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/service-subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route(
            "/service-subscriptions/:id",
            get(get_subscription)
                .put(update_subscription)
                .delete(delete_subscription),
        )
}

async fn list_subscriptions(
    State(ctx): State<AppContext>,
    principal: Principal,
    Query(filter): Query<SubscriptionFilter>,
    Query(page): Query<Page>,
) -> VaultResult<Json<Paginated<SubscriptionDetail>>> {
    let subscriptions = ctx
        .subscriptions
        .list_subscriptions(principal.user_id, &filter, page)
        .await?;
    Ok(Json(subscriptions))
}

async fn create_subscription(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(req): Json<NewSubscription>,
) -> VaultResult<(StatusCode, Json<SubscriptionDetail>)> {
    let subscription = ctx
        .subscriptions
        .create_subscription(principal.user_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn get_subscription(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<Json<SubscriptionDetail>> {
    let subscription = ctx
        .subscriptions
        .get_subscription(principal.user_id, id)
        .await?;
    Ok(Json(subscription))
}

async fn update_subscription(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> VaultResult<Json<SubscriptionDetail>> {
    let update: SubscriptionUpdate = patch_body(body)?;
    let subscription = ctx
        .subscriptions
        .update_subscription(principal.user_id, id, update)
        .await?;
    Ok(Json(subscription))
}

async fn delete_subscription(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<i64>,
) -> VaultResult<StatusCode> {
    ctx.subscriptions
        .delete_subscription(principal.user_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_subscription_flow() {
        let app = TestApp::new().await;
        let token = app.sign_up("alice").await;

        let (_, registration) = app
            .request(
                Method::POST,
                "/api/v1/platform-registrations/by-name",
                Some(&token),
                Some(json!({"platform_name": "Spotify", "login_username": "alice"})),
            )
            .await;
        let registration_id = registration["id"].as_i64().unwrap();

        let (status, created) = app
            .request(
                Method::POST,
                "/api/v1/service-subscriptions",
                Some(&token),
                Some(json!({
                    "platform_registration_id": registration_id,
                    "service_name": "Premium",
                    "status": "active",
                    "cost": 10.99,
                    "billing_cycle": "monthly",
                    "next_renewal_date": "2026-03-15",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["next_renewal_date"], "2026-03-15");
        assert_eq!(created["login_username"], "alice");
        let id = created["id"].as_i64().unwrap();

        // The owning registration cannot be changed
        let (status, body) = app
            .request(
                Method::PUT,
                &format!("/api/v1/service-subscriptions/{}", id),
                Some(&token),
                Some(json!({"platform_registration_id": 99})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InvalidInput");

        let (status, updated) = app
            .request(
                Method::PUT,
                &format!("/api/v1/service-subscriptions/{}", id),
                Some(&token),
                Some(json!({"next_renewal_date": null, "status": "cancelled"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(updated["next_renewal_date"].is_null());
        assert_eq!(updated["status"], "cancelled");

        let (status, listed) = app
            .request(
                Method::GET,
                "/api/v1/service-subscriptions?status=cancelled&platform_name=spot",
                Some(&token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["meta"]["total_items"], 1);

        let (status, _) = app
            .request(
                Method::DELETE,
                &format!("/api/v1/service-subscriptions/{}", id),
                Some(&token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
