use std::env;
use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::services::erp::SapConfig;
use crate::services::sharepoint::SharePointConfig;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("DATABASE_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .context("DATABASE_PORT must be a port number")?,
            username: env::var("DATABASE_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: env::var("DATABASE_PASSWORD").context("DATABASE_PASSWORD must be set")?,
            database: env::var("DATABASE_NAME").unwrap_or_else(|_| "facturas".to_string()),
            ssl_mode: env::var("DATABASE_SSL_MODE").unwrap_or_else(|_| "prefer".to_string()),
        })
    }

    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.username, self.password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{} must be set", name))
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

pub fn sharepoint_from_env() -> Result<SharePointConfig> {
    Ok(SharePointConfig {
        tenant_id: required("AZURE_TENANT_ID")?,
        client_id: required("AZURE_CLIENT_ID")?,
        client_secret: required("AZURE_CLIENT_SECRET")?,
        graph_base_url: env::var("GRAPH_BASE_URL").unwrap_or_else(|_| DEFAULT_GRAPH_BASE_URL.to_string()),
        authority_url: env::var("AZURE_AUTHORITY_URL").unwrap_or_else(|_| DEFAULT_AUTHORITY_URL.to_string()),
        hostname: required("SHAREPOINT_HOSTNAME")?,
        site_path: env::var("SHAREPOINT_SITE_PATH").unwrap_or_default(),
        list_name: required("SHAREPOINT_LIST_NAME")?,
    })
}

/// `None` when `SAP_API_URL` is unset; the currency routes then answer 400.
pub fn sap_from_env() -> Result<Option<SapConfig>> {
    let Ok(raw_url) = env::var("SAP_API_URL") else {
        return Ok(None);
    };

    let company_dbs = env::var("SAP_COMPANY_DBS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Ok(Some(SapConfig {
        base_url: SapConfig::normalize_base_url(&raw_url),
        username: required("SAP_USERNAME")?,
        password: required("SAP_PASSWORD")?,
        company_dbs,
        accept_invalid_certs: flag("SAP_ACCEPT_INVALID_CERTS"),
    }))
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server_host: String,
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub database_pool: PgPool,
    pub sharepoint: SharePointConfig,
    pub sap: Option<SapConfig>,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub async fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let database_config = DatabaseConfig::from_env()?;
        let database_pool = sqlx::PgPool::connect(&database_config.connection_string())
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            database: database_config,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            cors_origins,
            database_pool,
            sharepoint: sharepoint_from_env()?,
            sap: sap_from_env()?,
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
