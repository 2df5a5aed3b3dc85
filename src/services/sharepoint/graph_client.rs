// Microsoft Graph client for SharePoint lists
// App-only (client credentials) token, cached as an explicit Session and
// refreshed before it expires.

use async_trait::async_trait;
use chrono::Duration;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use super::client::{
    ListItem, ListPage, ListRef, RemoteListClient, Result, SharePointError, MAX_ITEM_WINDOW,
};
use crate::services::session::{Session, SessionAuthority, SessionSlot};

/// Characters escaped inside one path segment of a Graph URL.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SharePointConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// e.g. `https://graph.microsoft.com/v1.0`
    pub graph_base_url: String,
    /// e.g. `https://login.microsoftonline.com`
    pub authority_url: String,
    pub hostname: String,
    pub site_path: String,
    pub list_name: String,
}

impl SharePointConfig {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("graph_base_url", &self.graph_base_url),
            ("authority_url", &self.authority_url),
            ("hostname", &self.hostname),
            ("list_name", &self.list_name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(SharePointError::ConfigError(format!("{} is required", name)));
            }
        }
        Ok(())
    }

    fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

// ============================================================================
// Response Models
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: i64, // Seconds
}

fn default_token_lifetime() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct SiteResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSummary {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

// ============================================================================
// SharePoint Client
// ============================================================================

pub struct SharePointClient {
    config: SharePointConfig,
    http_client: Client,
    session: SessionSlot,
}

impl SharePointClient {
    pub fn new(config: SharePointConfig) -> Result<Self> {
        config.validate()?;

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(SharePointError::NetworkError)?;

        Ok(Self {
            config,
            http_client,
            session: SessionSlot::new(),
        })
    }

    pub fn config(&self) -> &SharePointConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.config.graph_base_url.trim_end_matches('/')
    }

    fn items_url(&self, list: &ListRef) -> String {
        format!(
            "{}/sites/{}/lists/{}/items",
            self.base_url(),
            list.site_id,
            list.list_id
        )
    }

    async fn authorized(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let session = self.session.valid(self).await?;
        Ok(self
            .http_client
            .request(method, url)
            .bearer_auth(session.token)
            .header(header::ACCEPT, "application/json"))
    }

    /// Continuation links are absolute; only follow them on the configured Graph host.
    fn checked_next_link(&self, link: &str) -> Result<String> {
        let next = Url::parse(link)
            .map_err(|e| SharePointError::InvalidResponse(format!("Bad continuation link: {}", e)))?;
        let base = Url::parse(self.base_url())
            .map_err(|e| SharePointError::ConfigError(format!("graph_base_url: {}", e)))?;

        if next.host_str() != base.host_str() || next.port_or_known_default() != base.port_or_known_default() {
            return Err(SharePointError::InvalidResponse(
                "Continuation link points outside the Graph host".to_string(),
            ));
        }
        Ok(next.to_string())
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    async fn parse_response<T: serde::de::DeserializeOwned>(&self, response: Response) -> Result<T> {
        if !response.status().is_success() {
            return self.handle_error_response(response).await;
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(SharePointError::JsonError)
    }

    async fn handle_error_response<T>(&self, response: Response) -> Result<T> {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

        if status == StatusCode::UNAUTHORIZED {
            self.session.invalidate().await;
        }

        Err(match status {
            StatusCode::NOT_FOUND => SharePointError::NotFound(error_text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SharePointError::AuthError(error_text),
            StatusCode::TOO_MANY_REQUESTS => SharePointError::RateLimitExceeded,
            _ => SharePointError::ApiError(status, error_text),
        })
    }
}

#[async_trait]
impl SessionAuthority for SharePointClient {
    type Error = SharePointError;

    async fn acquire(&self) -> Result<Session> {
        tracing::debug!("Requesting Graph access token");

        let response = self
            .http_client
            .post(self.config.token_endpoint())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SharePointError::AuthError(error_text));
        }

        let token: TokenResponse = response.json().await?;
        Ok(Session::issued_now(token.access_token, Duration::seconds(token.expires_in)))
    }
}

#[async_trait]
impl RemoteListClient for SharePointClient {
    async fn resolve_site(&self, hostname: &str, site_path: &str) -> Result<String> {
        let encoded_path = site_path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");

        let url = if encoded_path.is_empty() {
            format!("{}/sites/{}", self.base_url(), hostname)
        } else {
            format!("{}/sites/{}:/{}", self.base_url(), hostname, encoded_path)
        };

        let response = self.authorized(Method::GET, &url).await?.send().await?;
        let site: SiteResponse = self.parse_response(response).await.map_err(|e| match e {
            SharePointError::NotFound(_) => SharePointError::NotFound(format!("Site '{}{}'", hostname, site_path)),
            other => other,
        })?;

        Ok(site.id)
    }

    async fn resolve_list(&self, site_id: &str, list_name: &str) -> Result<ListRef> {
        let url = format!("{}/sites/{}/lists", self.base_url(), site_id);
        let response = self
            .authorized(Method::GET, &url)
            .await?
            .query(&[("$select", "id,name,displayName")])
            .send()
            .await?;

        let lists: Collection<ListSummary> = self.parse_response(response).await?;
        lists
            .value
            .into_iter()
            .find(|l| {
                l.name.as_deref() == Some(list_name) || l.display_name.as_deref() == Some(list_name)
            })
            .map(|l| ListRef {
                site_id: site_id.to_string(),
                list_id: l.id,
            })
            .ok_or_else(|| SharePointError::NotFound(format!("List '{}'", list_name)))
    }

    async fn query_items_by_field(&self, list: &ListRef, field: &str, value: &str) -> Result<Vec<ListItem>> {
        let filter = format!("fields/{} eq '{}'", field, value.replace('\'', "''"));

        let response = self
            .authorized(Method::GET, &self.items_url(list))
            .await?
            .header("Prefer", "HonorNonIndexedQueriesWarningMayFailRandomly")
            .query(&[("expand", "fields"), ("$filter", filter.as_str())])
            .send()
            .await?;

        let items: Collection<ListItem> = self.parse_response(response).await?;
        Ok(items.value)
    }

    async fn patch_item_fields(&self, list: &ListRef, item_id: &str, fields: &Map<String, Value>) -> Result<()> {
        let url = format!("{}/{}/fields", self.items_url(list), item_id);

        let response = self
            .authorized(Method::PATCH, &url)
            .await?
            .json(fields)
            .send()
            .await?;

        if !response.status().is_success() {
            return self.handle_error_response(response).await;
        }
        Ok(())
    }

    async fn list_all_items(&self, list: &ListRef, page_size: usize) -> Result<Vec<ListItem>> {
        let page_size = page_size.clamp(1, MAX_ITEM_WINDOW).to_string();
        let first = self
            .authorized(Method::GET, &self.items_url(list))
            .await?
            .query(&[("expand", "fields"), ("$top", page_size.as_str())])
            .send()
            .await?;

        let mut page: Collection<ListItem> = self.parse_response(first).await?;
        let mut items = Vec::new();
        let mut pages = 1;

        loop {
            items.append(&mut page.value);

            let Some(link) = page.next_link.take() else { break };
            let next_url = self.checked_next_link(&link)?;
            let response = self.authorized(Method::GET, &next_url).await?.send().await?;
            page = self.parse_response(response).await?;
            pages += 1;
        }

        tracing::info!("Fetched {} list items across {} pages", items.len(), pages);
        Ok(items)
    }

    async fn list_page(&self, list: &ListRef, page: usize, page_size: usize) -> Result<ListPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let top = page
            .checked_mul(page_size)
            .filter(|top| *top <= MAX_ITEM_WINDOW)
            .ok_or_else(|| {
                SharePointError::InvalidRequest(format!(
                    "page {} of size {} reaches past the first {} items",
                    page, page_size, MAX_ITEM_WINDOW
                ))
            })?;
        let top_param = top.to_string();

        let response = self
            .authorized(Method::GET, &self.items_url(list))
            .await?
            .query(&[("expand", "fields"), ("$top", top_param.as_str())])
            .send()
            .await?;

        let fetched: Collection<ListItem> = self.parse_response(response).await?;
        let has_more = fetched.next_link.is_some() || fetched.value.len() >= top;

        let items = fetched
            .value
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        Ok(ListPage {
            items,
            page,
            page_size,
            has_more,
        })
    }
}
