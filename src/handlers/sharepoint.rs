use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use super::AppState;
use crate::{
    middleware::error_handling::{AppError, Result},
    models::reconciliation::SyncReport,
    services::sharepoint::{RemoteInvoicePage, MAX_ITEM_WINDOW},
};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// GET /api/sharepoint/list?page=&pageSize=
/// One bounded page straight from the list, for the UI.
pub async fn list_page(
    State(state): State<AppState>,
    Query(params): Query<ListPageQuery>,
) -> Result<Json<RemoteInvoicePage>> {
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

    if page == 0 {
        return Err(AppError::BadRequest("page starts at 1".to_string()));
    }
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(AppError::BadRequest(format!(
            "pageSize must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    if page.checked_mul(page_size).map_or(true, |end| end > MAX_ITEM_WINDOW) {
        return Err(AppError::BadRequest(format!(
            "page * pageSize must not exceed {}",
            MAX_ITEM_WINDOW
        )));
    }

    let page = state.invoice_list.fetch_page(page, page_size).await?;
    Ok(Json(page))
}

/// POST /api/sharepoint/sync
pub async fn sync(State(state): State<AppState>) -> Result<Json<SyncReport>> {
    tracing::info!("🔄 Full sync from SharePoint requested");
    let report = state.engine.sync_from_remote().await?;
    Ok(Json(report))
}
