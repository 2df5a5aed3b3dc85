use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::sap_client::{Result, SapClient, SapError};
use crate::middleware::metrics;
use crate::models::currency::{CompanyRateResult, CurrencyRateInput};
use crate::services::session::SessionSlot;

/// Pushes exchange rates to every configured SAP company database, keeping
/// one Service Layer session per database.
pub struct CurrencySyncService {
    client: SapClient,
    sessions: HashMap<String, SessionSlot>,
}

/// Three-letter ISO code.
pub fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

impl CurrencySyncService {
    pub fn new(client: SapClient) -> Self {
        let sessions = client
            .config()
            .company_dbs
            .iter()
            .map(|db| (db.clone(), SessionSlot::new()))
            .collect();
        Self { client, sessions }
    }

    pub fn company_dbs(&self) -> &[String] {
        &self.client.config().company_dbs
    }

    fn slot(&self, company_db: &str) -> Result<&SessionSlot> {
        self.sessions.get(company_db).ok_or_else(|| {
            SapError::ConfigError(format!("Company database '{}' is not configured", company_db))
        })
    }

    async fn push_to_company(&self, company_db: &str, rates: &[CurrencyRateInput], date: NaiveDate) -> Result<usize> {
        let slot = self.slot(company_db)?;
        let authority = self.client.authority(company_db);
        let mut session = slot.valid(&authority).await?;

        let mut pushed = 0;
        for rate in rates {
            let result = self.client.set_currency_rate(&session, &rate.currency, rate.rate, date).await;
            match result {
                Ok(()) => pushed += 1,
                // Session dropped server-side: log in again once.
                Err(SapError::AuthError(_)) => {
                    slot.invalidate().await;
                    session = slot.valid(&authority).await?;
                    self.client
                        .set_currency_rate(&session, &rate.currency, rate.rate, date)
                        .await?;
                    pushed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(pushed)
    }

    /// One result per company database, in configuration order.
    pub async fn push_rates(&self, rates: &[CurrencyRateInput], date: NaiveDate) -> Vec<CompanyRateResult> {
        let mut results = Vec::with_capacity(self.sessions.len());

        for company_db in self.company_dbs() {
            match self.push_to_company(company_db, rates, date).await {
                Ok(pushed) => {
                    metrics::record_rate_push(company_db, "success");
                    tracing::info!("Pushed {} rates for {} to {}", pushed, date, company_db);
                    results.push(CompanyRateResult {
                        company_db: company_db.clone(),
                        success: true,
                        pushed,
                        error: None,
                    });
                }
                Err(e) => {
                    metrics::record_rate_push(company_db, "failed");
                    tracing::error!("Rate update for {} failed: {}", company_db, e);
                    results.push(CompanyRateResult {
                        company_db: company_db.clone(),
                        success: false,
                        pushed: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        results
    }

    pub async fn get_rate(&self, company_db: &str, currency: &str, date: NaiveDate) -> Result<Decimal> {
        let slot = self.slot(company_db)?;
        let session = slot.valid(&self.client.authority(company_db)).await?;
        self.client.get_currency_rate(&session, currency, date).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::erp::SapConfig;

    fn service() -> CurrencySyncService {
        let client = SapClient::new(SapConfig {
            base_url: "http://127.0.0.1:9/b1s/v1".to_string(),
            username: "manager".to_string(),
            password: "secret".to_string(),
            company_dbs: vec!["SBO_MAIN".to_string()],
            accept_invalid_certs: false,
        })
        .unwrap();
        CurrencySyncService::new(client)
    }

    #[test]
    fn test_currency_codes() {
        assert!(is_valid_currency("USD"));
        assert!(!is_valid_currency("usd"));
        assert!(!is_valid_currency("EURO"));
    }

    #[tokio::test]
    async fn test_unknown_company_db_is_rejected() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let err = service().get_rate("SBO_OTHER", "USD", date).await.unwrap_err();
        assert!(matches!(err, SapError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_reported_per_database() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let rates = vec![CurrencyRateInput { currency: "USD".into(), rate: Decimal::new(412055, 2) }];
        let results = service().push_rates(&rates, date).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].error.is_some());
    }
}
