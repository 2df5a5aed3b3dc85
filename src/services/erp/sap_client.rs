// SAP Business One Service Layer client
// Session-cookie login per company database and the SBOBobService currency
// rate endpoints used for the daily TRM update.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

use crate::services::session::{Session, SessionAuthority};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum SapError {
    #[error("SAP API error ({0}): {1}")]
    ApiError(StatusCode, String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, SapError>;

// ============================================================================
// Configuration
// ============================================================================

/// Service Layer sessions last 30 minutes unless the server says otherwise.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 30;

#[derive(Debug, Clone)]
pub struct SapConfig {
    /// Service root, e.g. `https://sap.example.com:50000/b1s/v1`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// The only company databases this service may touch.
    pub company_dbs: Vec<String>,
    /// Service Layer installs commonly run with self-signed certificates.
    pub accept_invalid_certs: bool,
}

impl SapConfig {
    /// Accepts the service root or a full `/Login` URL.
    pub fn normalize_base_url(raw: &str) -> String {
        let trimmed = raw.trim().trim_end_matches('/');
        trimmed.strip_suffix("/Login").unwrap_or(trimmed).to_string()
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(SapError::ConfigError("Base URL is required".to_string()));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(SapError::ConfigError("Username and password are required".to_string()));
        }
        if self.company_dbs.is_empty() {
            return Err(SapError::ConfigError("At least one company database is required".to_string()));
        }
        Ok(())
    }

    pub fn allows(&self, company_db: &str) -> bool {
        self.company_dbs.iter().any(|db| db == company_db)
    }
}

// ============================================================================
// Service Layer Models
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct LoginRequest<'a> {
    #[serde(rename = "CompanyDB")]
    company_db: &'a str,
    password: &'a str,
    user_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoginResponse {
    session_id: String,
    /// Minutes.
    session_timeout: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SetCurrencyRateRequest<'a> {
    currency: &'a str,
    rate: String,
    rate_date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetCurrencyRateRequest<'a> {
    currency: &'a str,
    date: String,
}

/// SBOBobService dates are `YYYYMMDD`.
pub fn format_rate_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

// ============================================================================
// SAP Client
// ============================================================================

pub struct SapClient {
    config: SapConfig,
    http_client: Client,
}

impl SapClient {
    pub fn new(config: SapConfig) -> Result<Self> {
        config.validate()?;

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(SapError::NetworkError)?;

        Ok(Self { config, http_client })
    }

    pub fn config(&self) -> &SapConfig {
        &self.config
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.config.base_url, name)
    }

    fn ensure_allowed(&self, company_db: &str) -> Result<()> {
        if self.config.allows(company_db) {
            Ok(())
        } else {
            Err(SapError::ConfigError(format!(
                "Company database '{}' is not configured",
                company_db
            )))
        }
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    pub async fn login(&self, company_db: &str) -> Result<Session> {
        self.ensure_allowed(company_db)?;

        let response = self
            .http_client
            .post(self.endpoint("Login"))
            .json(&LoginRequest {
                company_db,
                password: &self.config.password,
                user_name: &self.config.username,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("SAP login for {} failed ({}): {}", company_db, status, error_text);
            return Err(SapError::AuthError(format!("Login failed for {}", company_db)));
        }

        let login: LoginResponse = response.json().await?;
        let minutes = login.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT_MINUTES);
        tracing::info!("SAP session opened for {} ({} min)", company_db, minutes);

        Ok(Session::issued_now(login.session_id, Duration::minutes(minutes)))
    }

    pub fn authority<'a>(&'a self, company_db: &'a str) -> CompanyLogin<'a> {
        CompanyLogin { client: self, company_db }
    }

    // ========================================================================
    // Currency Rates
    // ========================================================================

    pub async fn set_currency_rate(
        &self,
        session: &Session,
        currency: &str,
        rate: Decimal,
        date: NaiveDate,
    ) -> Result<()> {
        let response = self
            .http_client
            .post(self.endpoint("SBOBobService_SetCurrencyRate"))
            .header("Cookie", format!("B1SESSION={}", session.token))
            .json(&SetCurrencyRateRequest {
                currency,
                rate: rate.normalize().to_string(),
                rate_date: format_rate_date(date),
            })
            .send()
            .await?;

        // 204 No Content on success; some versions answer 200.
        if response.status().is_success() {
            tracing::debug!("Set {} rate {} for {}", currency, rate, date);
            Ok(())
        } else {
            self.handle_error_response(response).await
        }
    }

    pub async fn get_currency_rate(&self, session: &Session, currency: &str, date: NaiveDate) -> Result<Decimal> {
        let response = self
            .http_client
            .post(self.endpoint("SBOBobService_GetCurrencyRate"))
            .header("Cookie", format!("B1SESSION={}", session.token))
            .json(&GetCurrencyRateRequest {
                currency,
                date: format_rate_date(date),
            })
            .send()
            .await?;

        let body: Value = self.parse_response(response).await?;
        rate_from_body(&body)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            return self.handle_error_response(response).await;
        }

        response.json().await.map_err(SapError::NetworkError)
    }

    async fn handle_error_response<T>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

        Err(match status {
            StatusCode::NOT_FOUND => SapError::NotFound(error_text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SapError::AuthError(error_text),
            StatusCode::TOO_MANY_REQUESTS => SapError::RateLimitExceeded,
            _ => SapError::ApiError(status, error_text),
        })
    }
}

/// GetCurrencyRate answers with a bare number or `{"value": n}`.
fn rate_from_body(body: &Value) -> Result<Decimal> {
    let raw = match body {
        Value::Object(map) => map.get("value").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    let text = match raw {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s,
        other => return Err(SapError::InvalidResponse(format!("No rate in response: {}", other))),
    };
    Decimal::from_str(text.trim())
        .or_else(|_| Decimal::from_scientific(text.trim()))
        .map_err(|_| SapError::InvalidResponse(format!("Rate is not a number: {}", text)))
}

/// Logs into one company database on demand.
pub struct CompanyLogin<'a> {
    client: &'a SapClient,
    company_db: &'a str,
}

#[async_trait]
impl SessionAuthority for CompanyLogin<'_> {
    type Error = SapError;

    async fn acquire(&self) -> Result<Session> {
        self.client.login(self.company_db).await
    }
}

// ============================================================================
// Tests
// ============================================================================
