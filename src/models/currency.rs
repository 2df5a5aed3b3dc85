use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CurrencyRateInput {
    /// ISO code as configured in SAP (e.g. "USD", "EUR").
    pub currency: String,
    pub rate: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PushRatesRequest {
    /// Defaults to today.
    pub date: Option<NaiveDate>,
    #[validate(length(min = 1, message = "At least one rate is required"))]
    pub rates: Vec<CurrencyRateInput>,
}

/// Outcome for one company database; a failing database does not stop the others.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompanyRateResult {
    pub company_db: String,
    pub success: bool,
    pub pushed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PushRatesResponse {
    pub success: bool,
    pub message: String,
    pub date: NaiveDate,
    pub results: Vec<CompanyRateResult>,
}

#[derive(Debug, Deserialize)]
pub struct RateQuery {
    pub currency: String,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct CurrencyRateResponse {
    pub success: bool,
    pub company_db: String,
    pub currency: String,
    pub date: NaiveDate,
    pub rate: Decimal,
}
