use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::Next,
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invoice_reconciler::config::AppConfig;
use invoice_reconciler::handlers::{create_router, AppState};
use invoice_reconciler::middleware::REQUEST_ID_HEADER;
use invoice_reconciler::repositories::{InvoiceRepository, PendingInvoiceRepository};
use invoice_reconciler::services::{
    erp::{CurrencySyncService, SapClient},
    sharepoint::{InvoiceList, SharePointClient},
    ApprovalService, ReconciliationEngine,
};

fn init_tracing() {
    // Default to INFO; override with RUST_LOG when debugging.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "invoice_reconciler=info,tower_http=info,sqlx=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    for origin in origins {
        if origin.starts_with("http://") && !origin.contains("localhost") {
            tracing::warn!("⚠️  Insecure HTTP origin in CORS: {} (use HTTPS in production!)", origin);
        }
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("❌ Invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    tracing::info!("✅ CORS configured with {} allowed origins", allowed.len());

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .expose_headers([header::HeaderName::from_static(REQUEST_ID_HEADER)])
}

fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let invoices = Arc::new(InvoiceRepository::new(config.database_pool.clone()));
    let pending = Arc::new(PendingInvoiceRepository::new(config.database_pool.clone()));

    let graph = SharePointClient::new(config.sharepoint.clone())?;
    let invoice_list = Arc::new(InvoiceList::new(
        Arc::new(graph),
        config.sharepoint.hostname.clone(),
        config.sharepoint.site_path.clone(),
        config.sharepoint.list_name.clone(),
    ));
    tracing::info!(
        "📋 SharePoint list '{}' on {}",
        invoice_list.list_name(),
        config.sharepoint.hostname
    );

    let engine = Arc::new(ReconciliationEngine::new(
        invoices.clone(),
        pending,
        invoice_list.clone(),
    ));
    let approvals = Arc::new(ApprovalService::new(invoices.clone(), invoice_list.clone()));

    let currency = match &config.sap {
        Some(sap) => {
            let client = SapClient::new(sap.clone())?;
            let service = CurrencySyncService::new(client);
            tracing::info!(
                "🏦 SAP Service Layer configured for {} company databases",
                service.company_dbs().len()
            );
            Some(Arc::new(service))
        }
        None => {
            tracing::warn!("⚠️  SAP_API_URL not set, currency rate endpoints are disabled");
            None
        }
    };

    Ok(AppState {
        engine,
        approvals,
        invoices,
        invoice_list,
        currency,
        max_upload_bytes: config.max_upload_bytes,
    })
}

fn create_app(config: &AppConfig, state: AppState) -> Router {
    create_router(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(|req: Request, next: Next| async move {
            tracing::debug!("{} {}", req.method(), req.uri());
            let response = next.run(req).await;
            tracing::debug!("Response status: {}", response.status());
            response
        }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().await?;

    tracing::info!("🗄️  Running database migrations...");
    sqlx::migrate!("./migrations").run(&config.database_pool).await?;
    tracing::info!("✅ Database migrations applied");

    let state = build_state(&config)?;
    let app = create_app(&config, state);

    let addr = config.server_address();
    tracing::info!("🚀 Starting invoice reconciler on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
