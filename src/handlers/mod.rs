pub mod erp;
pub mod imports;
pub mod invoices;
pub mod reconciliation;
pub mod sharepoint;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;

use crate::middleware::{metrics_handler, metrics_middleware, request_id_middleware};
use crate::repositories::InvoiceStore;
use crate::services::{
    erp::CurrencySyncService, sharepoint::InvoiceList, ApprovalService, ReconciliationEngine,
};

/// Shared handler state. Cloned per request, so everything heavy sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub approvals: Arc<ApprovalService>,
    pub invoices: Arc<dyn InvoiceStore>,
    pub invoice_list: Arc<InvoiceList>,
    /// `None` when SAP is not configured; the ERP routes answer 400 then.
    pub currency: Option<Arc<CurrencySyncService>>,
    pub max_upload_bytes: usize,
}

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Every API route plus `/health` and `/metrics`. CORS and tracing are added by the binary.
pub fn create_router(state: AppState) -> Router {
    // Multipart framing needs some headroom over the file itself.
    let body_limit = state.max_upload_bytes + 64 * 1024;

    let api = Router::new()
        .route("/invoices", get(invoices::list_invoices))
        .route("/invoices/:id", get(invoices::get_invoice))
        .route("/public/action", post(invoices::apply_action))
        .route("/sharepoint/list", get(sharepoint::list_page))
        .route("/sharepoint/sync", post(sharepoint::sync))
        .route("/imports", post(imports::upload))
        .route("/imports/:id", delete(imports::discard))
        .route("/imports/:id/rows", get(imports::rows))
        .route("/imports/:id/filters", put(imports::set_filters))
        .route("/imports/:id/select", post(imports::select))
        .route("/imports/:id/selection", delete(imports::clear_selection))
        .route("/imports/:id/commit", post(imports::commit))
        .route("/reconciliation/report", get(reconciliation::report))
        .route("/reconciliation/push", post(reconciliation::push))
        .route("/erp/currency-rates", post(erp::push_rates))
        .route("/erp/currency-rates/:company_db", get(erp::get_rate));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(metrics_middleware))
                .layer(middleware::from_fn(request_id_middleware)),
        )
}
