// In-memory stores and list client shared by the service unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::middleware::error_handling::{AppError, Result};
use crate::models::invoice::{ApprovalAction, InvoiceRecord, InvoiceUpsert, PendingInvoiceRecord};
use crate::repositories::{InvoiceStore, PendingInvoiceStore};
use crate::services::sharepoint::client::Result as SpResult;
use crate::services::sharepoint::{
    InvoiceList, ListItem, ListPage, ListRef, RemoteListClient, SharePointError,
};

pub fn invoice(id: i64, number: &str, approval: Option<&str>) -> InvoiceRecord {
    InvoiceRecord {
        id,
        tax_id: Some("900123456".into()),
        provider_name: Some("ACME S.A.S".into()),
        invoice_number: number.into(),
        total_value: Some("1.500.000".into()),
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

pub fn list_item(id: &str, fields: Value) -> ListItem {
    let fields = match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ListItem { id: id.into(), fields }
}

pub fn remote_invoice_item(id: &str, number: &str, approval: &str, accounting: &str) -> ListItem {
    list_item(
        id,
        json!({
            "Nro_Factura": number,
            "Aprobacion_Doliente": approval,
            "Gestion_Contabilidad": accounting,
        }),
    )
}

// ============================================================================
// Stores
// ============================================================================

#[derive(Default)]
pub struct MemoryInvoiceStore {
    pub rows: Mutex<Vec<InvoiceRecord>>,
    pub decisions: AtomicUsize,
    pub upsert_calls: Mutex<Vec<usize>>,
}

impl MemoryInvoiceStore {
    pub fn with(rows: Vec<InvoiceRecord>) -> Arc<Self> {
        Arc::new(Self { rows: Mutex::new(rows), ..Default::default() })
    }

    pub fn get(&self, id: i64) -> Option<InvoiceRecord> {
        self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<InvoiceRecord>> {
        Ok(self.get(id))
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
        match rows.iter_mut().find(|r| r.id == id && !r.approval_state().is_terminal()) {
            Some(row) => {
                row.approval_status = Some(action.as_str().to_string());
                row.accounting_status = Some(action.as_str().to_string());
                row.processed_at = Some(at);
                row.processed = true;
                self.decisions.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_batch(&self, batch: &[InvoiceUpsert]) -> Result<u64> {
        self.upsert_calls.lock().unwrap().push(batch.len());
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
    pub insert_calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl PendingInvoiceStore for MemoryPendingStore {
    async fn insert_batch(&self, records: &[PendingInvoiceRecord]) -> Result<u64> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        self.rows.lock().unwrap().extend_from_slice(records);
        Ok(records.len() as u64)
    }
}

// ============================================================================
// Remote list
// ============================================================================

#[derive(Default)]
pub struct MemoryListClient {
    pub items: Mutex<Vec<ListItem>>,
    pub patches: Mutex<Vec<(String, Map<String, Value>)>>,
    pub fail_patches: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl MemoryListClient {
    pub fn with(items: Vec<ListItem>) -> Arc<Self> {
        Arc::new(Self { items: Mutex::new(items), ..Default::default() })
    }

    pub fn invoice_list(self: &Arc<Self>) -> Arc<InvoiceList> {
        let client: Arc<dyn RemoteListClient> = self.clone();
        Arc::new(InvoiceList::new(client, "contoso.sharepoint.com", "sites/finanzas", "Registro"))
    }

    fn read_guard(&self) -> SpResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(SharePointError::ApiError(StatusCode::SERVICE_UNAVAILABLE, "down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteListClient for MemoryListClient {
    async fn resolve_site(&self, _hostname: &str, _site_path: &str) -> SpResult<String> {
        self.read_guard()?;
        Ok("site-1".into())
    }

    async fn resolve_list(&self, site_id: &str, _list_name: &str) -> SpResult<ListRef> {
        Ok(ListRef { site_id: site_id.into(), list_id: "list-1".into() })
    }

    async fn query_items_by_field(
        &self,
        _list: &ListRef,
        field: &str,
        value: &str,
    ) -> SpResult<Vec<ListItem>> {
        self.read_guard()?;
        let items = self.items.lock().unwrap();
        Ok(items.iter().filter(|i| i.text(field).as_deref() == Some(value)).cloned().collect())
    }

    async fn patch_item_fields(
        &self,
        _list: &ListRef,
        item_id: &str,
        fields: &Map<String, Value>,
    ) -> SpResult<()> {
        if self.fail_patches.load(Ordering::SeqCst) {
            return Err(SharePointError::ApiError(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()));
        }
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.iter_mut().find(|i| i.id == item_id) {
            for (k, v) in fields {
                item.fields.insert(k.clone(), v.clone());
            }
        }
        self.patches.lock().unwrap().push((item_id.to_string(), fields.clone()));
        Ok(())
    }

    async fn list_all_items(&self, _list: &ListRef, _page_size: usize) -> SpResult<Vec<ListItem>> {
        self.read_guard()?;
        Ok(self.items.lock().unwrap().clone())
    }

    async fn list_page(
        &self,
        _list: &ListRef,
        page: usize,
        page_size: usize,
    ) -> SpResult<ListPage> {
        self.read_guard()?;
        let items = self.items.lock().unwrap();
        let start = (page.max(1) - 1) * page_size;
        let slice: Vec<ListItem> = items.iter().skip(start).take(page_size).cloned().collect();
        Ok(ListPage {
            has_more: items.len() > start + page_size,
            items: slice,
            page,
            page_size,
        })
    }
}
