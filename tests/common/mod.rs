// Shared fixtures for the integration tests: a mock Microsoft Graph + SAP
// Service Layer server on a real port, and in-memory invoice stores.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, post},
    Form, Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use invoice_reconciler::middleware::error_handling::Result;
use invoice_reconciler::models::{ApprovalAction, InvoiceRecord, InvoiceUpsert, PendingInvoiceRecord};
use invoice_reconciler::repositories::{InvoiceStore, PendingInvoiceStore};
use invoice_reconciler::services::erp::SapConfig;
use invoice_reconciler::services::sharepoint::SharePointConfig;

pub const TENANT: &str = "tenant-1";
pub const CLIENT_SECRET: &str = "graph-secret";
pub const GRAPH_TOKEN: &str = "graph-token";
pub const SITE_ID: &str = "site-1";
pub const LIST_ID: &str = "list-1";
pub const LIST_DISPLAY_NAME: &str = "Registro de Facturas";
pub const SAP_PASSWORD: &str = "sap-secret";
/// Company database whose login is always refused.
pub const BROKEN_DB: &str = "SBO_BROKEN";

/// Items per response the mock Graph serves, whatever `$top` asks for.
const GRAPH_SERVER_PAGE: usize = 2;

// ============================================================================
// Mock State
// ============================================================================

#[derive(Debug, Default)]
pub struct MockState {
    pub base_url: String,
    pub items: Vec<Value>,
    pub token_requests: usize,
    pub graph_requests: usize,
    pub patches: Vec<(String, Map<String, Value>)>,
    pub sap_logins: Vec<String>,
    pub sap_sessions: HashMap<String, String>,
    pub rates_set: Vec<(String, Value)>,
    /// Drop every SAP session before the next SetCurrencyRate call.
    pub expire_sap_sessions: bool,
}

pub type SharedState = Arc<RwLock<MockState>>;

pub struct MockServer {
    pub base_url: String,
    pub state: SharedState,
}

impl MockServer {
    pub async fn start(items: Vec<Value>) -> Self {
        let state: SharedState = Arc::new(RwLock::new(MockState {
            items,
            ..Default::default()
        }));

        let app = Router::new()
            .route(&format!("/{}/oauth2/v2.0/token", TENANT), post(token))
            .route("/v1.0/*rest", any(graph))
            .route("/b1s/v1/Login", post(sap_login))
            .route("/b1s/v1/SBOBobService_SetCurrencyRate", post(sap_set_rate))
            .route("/b1s/v1/SBOBobService_GetCurrencyRate", post(sap_get_rate))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        state.write().await.base_url = base_url.clone();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, state }
    }

    pub fn sharepoint_config(&self) -> SharePointConfig {
        SharePointConfig {
            tenant_id: TENANT.to_string(),
            client_id: "reconciler".to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            graph_base_url: format!("{}/v1.0", self.base_url),
            authority_url: self.base_url.clone(),
            hostname: "contoso.sharepoint.com".to_string(),
            site_path: "/sites/finanzas".to_string(),
            list_name: LIST_DISPLAY_NAME.to_string(),
        }
    }

    pub fn sap_config(&self, company_dbs: &[&str]) -> SapConfig {
        SapConfig {
            base_url: format!("{}/b1s/v1", self.base_url),
            username: "manager".to_string(),
            password: SAP_PASSWORD.to_string(),
            company_dbs: company_dbs.iter().map(|db| db.to_string()).collect(),
            accept_invalid_certs: false,
        }
    }

    pub async fn item_fields(&self, item_id: &str) -> Map<String, Value> {
        let state = self.state.read().await;
        state
            .items
            .iter()
            .find(|i| i["id"] == item_id)
            .and_then(|i| i["fields"].as_object().cloned())
            .unwrap_or_default()
    }
}

pub fn list_item(id: &str, number: &str, approval: &str, accounting: Option<&str>) -> Value {
    let mut fields = json!({
        "Nro_Factura": number,
        "Nit": "900123456",
        "Proveedor": "ACME S.A.S",
        "Valor_total": "1.190.000",
        "Aprobacion_Doliente": approval,
        "Created": "2025-03-01T10:00:00Z",
        "Modified": "2025-03-02T10:00:00Z"
    });
    if let Some(accounting) = accounting {
        fields["Gestion_Contabilidad"] = json!(accounting);
    }
    json!({ "id": id, "fields": fields })
}

// ============================================================================
// Microsoft Graph Endpoints
// ============================================================================

async fn token(State(state): State<SharedState>, Form(form): Form<HashMap<String, String>>) -> Response {
    let mut state = state.write().await;
    state.token_requests += 1;

    if form.get("grant_type").map(String::as_str) != Some("client_credentials")
        || form.get("client_secret").map(String::as_str) != Some(CLIENT_SECRET)
    {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_client" }))).into_response();
    }

    Json(json!({
        "token_type": "Bearer",
        "expires_in": 3599,
        "access_token": GRAPH_TOKEN
    }))
    .into_response()
}

fn graph_error(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "error": { "code": code, "message": code } }))).into_response()
}

async fn graph(
    State(state): State<SharedState>,
    method: Method,
    Path(rest): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Bearer {}", GRAPH_TOKEN));
    if !authorized {
        return graph_error(StatusCode::UNAUTHORIZED, "InvalidAuthenticationToken");
    }

    let mut state = state.write().await;
    state.graph_requests += 1;

    let path = rest.trim_start_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').collect();
    let items_prefix = format!("sites/{}/lists/{}/items", SITE_ID, LIST_ID);

    match (method, segments.as_slice()) {
        (Method::GET, ["sites", "contoso.sharepoint.com:", "sites", "finanzas"]) => {
            Json(json!({ "id": SITE_ID, "name": "finanzas" })).into_response()
        }
        (Method::GET, ["sites", site, "lists"]) if *site == SITE_ID => Json(json!({
            "value": [
                { "id": "list-0", "name": "Documentos", "displayName": "Documentos" },
                { "id": LIST_ID, "name": "Registro_de_Facturas", "displayName": LIST_DISPLAY_NAME }
            ]
        }))
        .into_response(),
        (Method::GET, _) if path == items_prefix => list_items(&state, &query),
        (Method::PATCH, ["sites", _, "lists", _, "items", item_id, "fields"]) => {
            let Ok(patch) = serde_json::from_slice::<Map<String, Value>>(&body) else {
                return graph_error(StatusCode::BAD_REQUEST, "invalidRequest");
            };
            let item_id = item_id.to_string();
            let Some(item) = state.items.iter_mut().find(|i| i["id"] == item_id.as_str()) else {
                return graph_error(StatusCode::NOT_FOUND, "itemNotFound");
            };
            if let Some(fields) = item["fields"].as_object_mut() {
                for (k, v) in &patch {
                    fields.insert(k.clone(), v.clone());
                }
            }
            let updated = item["fields"].clone();
            state.patches.push((item_id, patch));
            Json(updated).into_response()
        }
        _ => graph_error(StatusCode::NOT_FOUND, "itemNotFound"),
    }
}

fn list_items(state: &MockState, query: &HashMap<String, String>) -> Response {
    if let Some(filter) = query.get("$filter") {
        let wanted = filter
            .strip_prefix("fields/Nro_Factura eq '")
            .and_then(|f| f.strip_suffix('\''))
            .map(|v| v.replace("''", "'"))
            .unwrap_or_default();
        let value: Vec<Value> = state
            .items
            .iter()
            .filter(|i| i["fields"]["Nro_Factura"] == wanted.as_str())
            .cloned()
            .collect();
        return Json(json!({ "value": value })).into_response();
    }

    let skip: usize = query.get("skip").and_then(|s| s.parse().ok()).unwrap_or(0);
    let top: usize = query
        .get("$top")
        .or_else(|| query.get("top"))
        .and_then(|s| s.parse().ok())
        .unwrap_or(100);
    let take = top.min(GRAPH_SERVER_PAGE);

    let value: Vec<Value> = state.items.iter().skip(skip).take(take).cloned().collect();
    let mut body = json!({ "value": value });
    if skip + take < state.items.len() {
        body["@odata.nextLink"] = json!(format!(
            "{}/v1.0/sites/{}/lists/{}/items?skip={}&top={}",
            state.base_url,
            SITE_ID,
            LIST_ID,
            skip + take,
            top
        ));
    }
    Json(body).into_response()
}

// ============================================================================
// SAP Service Layer Endpoints
// ============================================================================

fn sap_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": -1, "message": { "lang": "en-us", "value": message } } })),
    )
        .into_response()
}

fn session_db(state: &MockState, headers: &HeaderMap) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
    let session_id = cookie.strip_prefix("B1SESSION=")?;
    state.sap_sessions.get(session_id).cloned()
}

async fn sap_login(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let mut state = state.write().await;
    let company_db = body["CompanyDB"].as_str().unwrap_or_default().to_string();
    state.sap_logins.push(company_db.clone());

    if body["Password"] != SAP_PASSWORD || body["UserName"] != "manager" || company_db == BROKEN_DB {
        return sap_error(StatusCode::UNAUTHORIZED, "Invalid login credentials");
    }

    let session_id = format!("session-{}-{}", company_db, state.sap_logins.len());
    state.sap_sessions.insert(session_id.clone(), company_db);

    Json(json!({
        "odata.metadata": "$metadata#B1Sessions/@Element",
        "SessionId": session_id,
        "Version": "1000190",
        "SessionTimeout": 30
    }))
    .into_response()
}

async fn sap_set_rate(State(state): State<SharedState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let mut state = state.write().await;

    if state.expire_sap_sessions {
        state.expire_sap_sessions = false;
        state.sap_sessions.clear();
    }

    let Some(company_db) = session_db(&state, &headers) else {
        return sap_error(StatusCode::UNAUTHORIZED, "Invalid session");
    };

    state.rates_set.push((company_db, body));
    StatusCode::NO_CONTENT.into_response()
}

async fn sap_get_rate(State(state): State<SharedState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let state = state.read().await;
    if session_db(&state, &headers).is_none() {
        return sap_error(StatusCode::UNAUTHORIZED, "Invalid session");
    }

    match body["Currency"].as_str() {
        Some("USD") => Json(json!(4012.5)).into_response(),
        Some("EUR") => Json(json!({ "value": "4391.25" })).into_response(),
        _ => sap_error(StatusCode::NOT_FOUND, "No rate for currency"),
    }
}

// ============================================================================
// In-memory Stores
// ============================================================================

pub fn invoice(id: i64, number: &str, approval: Option<&str>) -> InvoiceRecord {
    InvoiceRecord {
        id,
        tax_id: Some("900123456".to_string()),
        provider_name: Some("ACME S.A.S".to_string()),
        invoice_number: number.to_string(),
        total_value: Some("1.190.000".to_string()),
        created_at: None,
        approval_status: approval.map(str::to_string),
        accounting_status: None,
        approved_at: None,
        processed_at: None,
        processed: false,
        responsible_party: None,
        cufe: None,
        observations: None,
        cost_center: None,
        modified_at: None,
    }
}

#[derive(Default)]
pub struct MemoryInvoiceStore {
    pub rows: Mutex<Vec<InvoiceRecord>>,
}

impl MemoryInvoiceStore {
    pub fn with(rows: Vec<InvoiceRecord>) -> Arc<Self> {
        Arc::new(Self { rows: Mutex::new(rows) })
    }

    pub fn by_number(&self, number: &str) -> Option<InvoiceRecord> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.invoice_number == number)
            .cloned()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<InvoiceRecord>> {
        Ok(self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<InvoiceRecord>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).cloned().collect())
    }

    async fn list_all(&self) -> Result<Vec<InvoiceRecord>> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn invoice_numbers(&self) -> Result<Vec<String>> {
        Ok(self.rows.lock().unwrap().iter().map(|r| r.invoice_number.clone()).collect())
    }

    async fn record_decision(&self, id: i64, action: ApprovalAction, at: DateTime<Utc>) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|r| r.id == id && !r.approval_state().is_terminal()) else {
            return Ok(false);
        };
        row.approval_status = Some(action.as_str().to_string());
        row.accounting_status = Some(action.as_str().to_string());
        row.processed_at = Some(at);
        row.processed = true;
        Ok(true)
    }

    async fn upsert_batch(&self, batch: &[InvoiceUpsert]) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        for upsert in batch {
            let mut record = invoice(upsert.id, &upsert.invoice_number, upsert.approval_status.as_deref());
            record.accounting_status = upsert.accounting_status.clone();
            record.provider_name = upsert.provider_name.clone();
            match rows.iter_mut().find(|r| r.invoice_number == upsert.invoice_number) {
                Some(existing) => {
                    record.id = existing.id;
                    *existing = record;
                }
                None => rows.push(record),
            }
        }
        Ok(batch.len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryPendingStore {
    pub rows: Mutex<Vec<PendingInvoiceRecord>>,
}

#[async_trait]
impl PendingInvoiceStore for MemoryPendingStore {
    async fn insert_batch(&self, records: &[PendingInvoiceRecord]) -> Result<u64> {
        self.rows.lock().unwrap().extend_from_slice(records);
        Ok(records.len() as u64)
    }
}
