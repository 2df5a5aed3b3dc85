// SAP Business One integration
// Service Layer client and the daily currency rate push.

pub mod sap_client;
pub mod currency_sync_service;

pub use sap_client::{SapClient, SapConfig, SapError};
pub use currency_sync_service::CurrencySyncService;
