/// Metrics and telemetry for Vaultkeep
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Registrations created and uniqueness conflicts
/// - Import row outcomes
/// - Background job execution and reminder sweeps

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("register http_requests_total");

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("register http_request_duration_seconds");

    // ========== Ownership Graph Metrics ==========

    /// Platform registrations created, by source (api, import)
    pub static ref REGISTRATIONS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "vaultkeep_registrations_created_total",
        "Total number of platform registrations created",
        &["source"]
    )
    .expect("register vaultkeep_registrations_created_total");

    /// Writes rejected by a uniqueness rule, by entity
    pub static ref CONFLICTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "vaultkeep_conflicts_total",
        "Total number of uniqueness conflicts",
        &["entity"]
    )
    .expect("register vaultkeep_conflicts_total");

    /// Import rows by outcome (saved, error)
    pub static ref IMPORT_ROWS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "vaultkeep_import_rows_total",
        "Total number of processed import rows",
        &["outcome"]
    )
    .expect("register vaultkeep_import_rows_total");

    // ========== Background Job Metrics ==========

    /// Background job executions by type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .expect("register background_jobs_total");

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("register background_job_duration_seconds");

    /// Subscriptions found due by the most recent reminder sweep
    pub static ref REMINDERS_DUE: IntGauge = register_int_gauge!(
        "vaultkeep_reminders_due",
        "Subscriptions due for renewal at the last sweep"
    )
    .expect("register vaultkeep_reminders_due");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a created registration
pub fn record_registration_created(source: &str) {
    REGISTRATIONS_CREATED_TOTAL.with_label_values(&[source]).inc();
}

/// Record a uniqueness conflict
pub fn record_conflict(entity: &str) {
    CONFLICTS_TOTAL.with_label_values(&[entity]).inc();
}

/// Record the outcome of one import row
pub fn record_import_row(saved: bool) {
    IMPORT_ROWS_TOTAL
        .with_label_values(&[if saved { "saved" } else { "error" }])
        .inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/api/v1/platforms", 200, 0.05);
        let metrics = render_metrics();
        assert!(metrics.contains("http_requests_total"));
        assert!(metrics.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_record_domain_counters() {
        record_registration_created("import");
        record_conflict("platform");
        record_import_row(true);
        record_import_row(false);

        let metrics = render_metrics();
        assert!(metrics.contains("vaultkeep_registrations_created_total"));
        assert!(metrics.contains("vaultkeep_conflicts_total"));
        assert!(metrics.contains("vaultkeep_import_rows_total"));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("reminder_sweep", "success", 0.2);
        REMINDERS_DUE.set(3);
        let metrics = render_metrics();
        assert!(metrics.contains("background_jobs_total"));
        assert!(metrics.contains("vaultkeep_reminders_due"));
    }
}
