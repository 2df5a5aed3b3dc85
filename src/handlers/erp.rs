use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use super::AppState;
use crate::{
    middleware::error_handling::{AppError, Result},
    models::currency::{CurrencyRateResponse, PushRatesRequest, PushRatesResponse, RateQuery},
    services::erp::{currency_sync_service::is_valid_currency, CurrencySyncService},
};

fn currency_service(state: &AppState) -> Result<Arc<CurrencySyncService>> {
    state
        .currency
        .clone()
        .ok_or_else(|| AppError::BadRequest("SAP integration is not configured".to_string()))
}

/// POST /api/erp/currency-rates
/// Push exchange rates to every configured company database.
pub async fn push_rates(
    State(state): State<AppState>,
    Json(request): Json<PushRatesRequest>,
) -> Result<Json<PushRatesResponse>> {
    request.validate()?;
    let service = currency_service(&state)?;

    if let Some(bad) = request.rates.iter().find(|r| !is_valid_currency(&r.currency)) {
        return Err(AppError::BadRequest(format!("Invalid currency code '{}'", bad.currency)));
    }
    if request.rates.iter().any(|r| r.rate <= rust_decimal::Decimal::ZERO) {
        return Err(AppError::BadRequest("Rates must be positive".to_string()));
    }

    let date = request.date.unwrap_or_else(|| Utc::now().date_naive());
    let results = service.push_rates(&request.rates, date).await;

    let failed = results.iter().filter(|r| !r.success).count();
    let message = if failed == 0 {
        format!("Rates updated in {} company databases", results.len())
    } else {
        format!("{} of {} company databases failed", failed, results.len())
    };

    Ok(Json(PushRatesResponse {
        success: failed == 0,
        message,
        date,
        results,
    }))
}

/// GET /api/erp/currency-rates/:company_db?currency=&date=
pub async fn get_rate(
    State(state): State<AppState>,
    Path(company_db): Path<String>,
    Query(params): Query<RateQuery>,
) -> Result<Json<CurrencyRateResponse>> {
    let service = currency_service(&state)?;
    if !is_valid_currency(&params.currency) {
        return Err(AppError::BadRequest(format!("Invalid currency code '{}'", params.currency)));
    }

    let date = params.date.unwrap_or_else(|| Utc::now().date_naive());
    let rate = service.get_rate(&company_db, &params.currency, date).await?;

    Ok(Json(CurrencyRateResponse {
        success: true,
        company_db,
        currency: params.currency,
        date,
        rate,
    }))
}
