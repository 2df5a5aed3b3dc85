use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum SharePointError {
    #[error("Graph API error ({0}): {1}")]
    ApiError(StatusCode, String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, SharePointError>;

/// Largest `$top` Graph accepts on list items; bounded pages must end inside it.
pub const MAX_ITEM_WINDOW: usize = 5000;

// ============================================================================
// List Models
// ============================================================================

/// Resolved site and list identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListRef {
    pub site_id: String,
    pub list_id: String,
}

/// One list item with its column values keyed by internal column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ListItem {
    /// Column value as text; numbers and booleans are stringified, blanks are `None`.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// First non-blank value among `fields`.
    pub fn first_text(&self, fields: &[&str]) -> Option<String> {
        fields.iter().find_map(|f| self.text(f))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage {
    pub items: Vec<ListItem>,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

// ============================================================================
// Remote List Client
// ============================================================================

/// Read/write access to a document-management list (a SharePoint list via Graph).
#[async_trait]
pub trait RemoteListClient: Send + Sync {
    async fn resolve_site(&self, hostname: &str, site_path: &str) -> Result<String>;

    /// Matches `list_name` against the internal name or the display name.
    async fn resolve_list(&self, site_id: &str, list_name: &str) -> Result<ListRef>;

    /// Exact-match filter on one column.
    async fn query_items_by_field(&self, list: &ListRef, field: &str, value: &str) -> Result<Vec<ListItem>>;

    async fn patch_item_fields(&self, list: &ListRef, item_id: &str, fields: &Map<String, Value>) -> Result<()>;

    /// Follows continuation links until none remain.
    async fn list_all_items(&self, list: &ListRef, page_size: usize) -> Result<Vec<ListItem>>;

    /// One bounded request; never follows continuation links. `page` is 1-based.
    async fn list_page(&self, list: &ListRef, page: usize, page_size: usize) -> Result<ListPage>;
}
