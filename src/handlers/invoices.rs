use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use validator::Validate;

use super::AppState;
use crate::{
    middleware::error_handling::{AppError, Result},
    models::invoice::{ApprovalActionRequest, InvoiceResponse, ListInvoicesQuery},
    services::ApprovalOutcome,
};

const DEFAULT_LIST_LIMIT: i64 = 100;

/// GET /api/invoices
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<InvoiceResponse>>> {
    let invoices = state
        .invoices
        .list_recent(
            params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            params.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(invoices.into_iter().map(InvoiceResponse::from).collect()))
}

/// GET /api/invoices/:id
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<InvoiceResponse>> {
    let invoice = state
        .invoices
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice not found".to_string()))?;

    Ok(Json(invoice.into()))
}

/// POST /api/public/action
/// Approve or reject an invoice from the emailed approval link.
pub async fn apply_action(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ApprovalActionRequest>, JsonRejection>,
) -> Result<Json<ApprovalOutcome>> {
    let Json(request) = payload?;
    request.validate()?;

    let outcome = state
        .approvals
        .apply_action(request.id, request.action.as_deref())
        .await?;

    Ok(Json(outcome))
}
