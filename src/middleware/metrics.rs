// ============================================================================
// Prometheus Metrics
// ============================================================================
//
// HTTP:
//   - invoice_http_request_duration_seconds{method, path, status}
//   - invoice_http_requests_total{method, path, status}
//
// Reconciliation:
//   - invoice_approval_actions_total{action, outcome}
//   - invoice_remote_propagation_total{outcome}
//   - invoice_sync_items_total{kind}          created | updated | skipped | duplicate
//   - invoice_import_commits_total{outcome}   committed | empty | failed | conflict
//   - invoice_erp_rate_pushes_total{company_db, outcome}
//
// Scraped from GET /metrics.
//
// ============================================================================

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, TextEncoder, HistogramVec, CounterVec,
    register_histogram_vec, register_counter_vec,
};
use std::time::Instant;

lazy_static! {
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "invoice_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path", "status"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "invoice_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    ).unwrap();

    pub static ref APPROVAL_ACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "invoice_approval_actions_total",
        "Approval actions by requested action and outcome",
        &["action", "outcome"]
    ).unwrap();

    pub static ref REMOTE_PROPAGATION_TOTAL: CounterVec = register_counter_vec!(
        "invoice_remote_propagation_total",
        "Status pushes to the SharePoint list by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref SYNC_ITEMS_TOTAL: CounterVec = register_counter_vec!(
        "invoice_sync_items_total",
        "Remote list items processed by a full sync",
        &["kind"]
    ).unwrap();

    pub static ref IMPORT_COMMITS_TOTAL: CounterVec = register_counter_vec!(
        "invoice_import_commits_total",
        "Spreadsheet selection commits by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref ERP_RATE_PUSHES_TOTAL: CounterVec = register_counter_vec!(
        "invoice_erp_rate_pushes_total",
        "Currency rate pushes to SAP company databases",
        &["company_db", "outcome"]
    ).unwrap();
}

/// Replace numeric and UUID path segments so label cardinality stays bounded.
///
/// Example: /api/invoices/1700000000000123 -> /api/invoices/:id
fn normalize_path(path: &str) -> String {
    let normalized: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if (segment.len() == 36 && segment.contains('-')) || segment.parse::<i64>().is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect();

    format!("/{}", normalized.join("/"))
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), &path, &status])
        .observe(duration.as_secs_f64());
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &path, &status])
        .inc();

    tracing::debug!(
        target: "metrics",
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %duration.as_millis(),
        "HTTP request completed"
    );

    response
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                format!("Failed to encode metrics: {}", e).into_bytes()
            )
        }
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

pub fn record_approval_action(action: &str, outcome: &str) {
    APPROVAL_ACTIONS_TOTAL.with_label_values(&[action, outcome]).inc();
}

pub fn record_propagation(outcome: &str) {
    REMOTE_PROPAGATION_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_sync_items(kind: &str, count: usize) {
    if count > 0 {
        SYNC_ITEMS_TOTAL.with_label_values(&[kind]).inc_by(count as f64);
    }
}

pub fn record_import_commit(outcome: &str) {
    IMPORT_COMMITS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_rate_push(company_db: &str, outcome: &str) {
    ERP_RATE_PUSHES_TOTAL.with_label_values(&[company_db, outcome]).inc();
}
