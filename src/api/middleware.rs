/// Request metrics middleware
use crate::metrics;
use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Record count and latency per route template, so ids in paths do not
/// explode label cardinality
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();

    metrics::record_http_request(&method, &path, response.status().as_u16(), duration);
    response
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_requests_are_recorded_by_route_template() {
        let app = TestApp::new().await;
        let token = app.sign_up("alice").await;
        let (status, _) = app
            .request(Method::GET, "/api/v1/platforms/12345", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let rendered = crate::metrics::render_metrics();
        assert!(rendered.contains("/api/v1/platforms/:id"));
        assert!(!rendered.contains("/api/v1/platforms/12345"));
    }
}
