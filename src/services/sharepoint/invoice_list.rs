use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::client::{ListItem, ListRef, RemoteListClient, Result, SharePointError};
use crate::models::invoice::{ApprovalAction, InvoiceUpsert};

/// Internal column names of the invoice register list.
pub mod columns {
    pub const INVOICE_NUMBER: &str = "Nro_Factura";
    pub const TAX_ID: &str = "Nit";
    pub const PROVIDER: &str = "Proveedor";
    pub const APPROVAL_STATUS: &str = "Aprobacion_Doliente";
    pub const ACCOUNTING_STATUS: &str = "Gestion_Contabilidad";
    pub const OBSERVATIONS: &str = "Observaciones";
    pub const RESPONSIBLE_PARTY: &str = "Responsable_de_Autorizar";
    pub const APPROVED_AT: &str = "FechaAprobacion";
    pub const COST_CENTER: &str = "centro_costos";
    pub const TOTAL_VALUE: &[&str] = &["Valor total", "Valor_total", "Valor_x0020_total"];
    pub const CREATED: &[&str] = &["Created", "Creado"];
    pub const MODIFIED: &[&str] = &["Modified", "Modificado"];
    pub const CUFE: &str = "CUFE";
    pub const PROCESSED_AT: &str = "FechaProcesado";
    pub const PROCESSED: &str = "Procesado";
}

/// Page size used when walking the whole list.
pub const FULL_SYNC_PAGE_SIZE: usize = 500;

/// Invoice as read from the remote list, before it gets a local id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteInvoice {
    pub item_id: String,
    pub invoice_number: Option<String>,
    pub tax_id: Option<String>,
    pub provider_name: Option<String>,
    pub total_value: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub approval_status: Option<String>,
    pub accounting_status: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed: bool,
    pub responsible_party: Option<String>,
    pub cufe: Option<String>,
    pub observations: Option<String>,
    pub cost_center: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteInvoice {
    pub fn from_item(item: &ListItem) -> Self {
        Self {
            item_id: item.id.clone(),
            invoice_number: item.text(columns::INVOICE_NUMBER),
            tax_id: item.text(columns::TAX_ID),
            provider_name: item.text(columns::PROVIDER),
            total_value: item.first_text(columns::TOTAL_VALUE),
            created_at: item.first_text(columns::CREATED).as_deref().and_then(parse_timestamp),
            approval_status: item.text(columns::APPROVAL_STATUS),
            accounting_status: item.text(columns::ACCOUNTING_STATUS),
            approved_at: item.text(columns::APPROVED_AT).as_deref().and_then(parse_timestamp),
            processed_at: item.text(columns::PROCESSED_AT).as_deref().and_then(parse_timestamp),
            processed: item
                .text(columns::PROCESSED)
                .map_or(false, |v| v.eq_ignore_ascii_case("true")),
            responsible_party: item.text(columns::RESPONSIBLE_PARTY),
            cufe: item.text(columns::CUFE),
            observations: item.text(columns::OBSERVATIONS),
            cost_center: item.text(columns::COST_CENTER),
            modified_at: item.first_text(columns::MODIFIED).as_deref().and_then(parse_timestamp),
        }
    }

    /// `None` when the item has no invoice number and cannot be matched.
    pub fn into_upsert(self, id: i64) -> Option<InvoiceUpsert> {
        let invoice_number = self.invoice_number?;
        Some(InvoiceUpsert {
            id,
            tax_id: self.tax_id,
            provider_name: self.provider_name,
            invoice_number,
            total_value: self.total_value,
            created_at: self.created_at,
            approval_status: self.approval_status,
            accounting_status: self.accounting_status,
            approved_at: self.approved_at,
            processed_at: self.processed_at,
            processed: self.processed,
            responsible_party: self.responsible_party,
            cufe: self.cufe,
            observations: self.observations,
            cost_center: self.cost_center,
            modified_at: self.modified_at,
        })
    }
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt))
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteInvoicePage {
    pub invoices: Vec<RemoteInvoice>,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

/// The configured invoice register list. Site and list ids are resolved on
/// first use and kept for the life of the process.
pub struct InvoiceList {
    client: Arc<dyn RemoteListClient>,
    hostname: String,
    site_path: String,
    list_name: String,
    list_ref: OnceCell<ListRef>,
}

impl InvoiceList {
    pub fn new(
        client: Arc<dyn RemoteListClient>,
        hostname: impl Into<String>,
        site_path: impl Into<String>,
        list_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            hostname: hostname.into(),
            site_path: site_path.into(),
            list_name: list_name.into(),
            list_ref: OnceCell::new(),
        }
    }

    pub fn list_name(&self) -> &str {
        &self.list_name
    }

    pub async fn list_ref(&self) -> Result<&ListRef> {
        self.list_ref
            .get_or_try_init(|| async {
                let site_id = self.client.resolve_site(&self.hostname, &self.site_path).await?;
                let list = self.client.resolve_list(&site_id, &self.list_name).await?;
                tracing::info!("Resolved SharePoint list '{}' ({})", self.list_name, list.list_id);
                Ok::<_, SharePointError>(list)
            })
            .await
    }

    pub async fn find_by_invoice_number(&self, invoice_number: &str) -> Result<Option<ListItem>> {
        let list = self.list_ref().await?;
        let mut items = self
            .client
            .query_items_by_field(list, columns::INVOICE_NUMBER, invoice_number)
            .await?;
        if items.len() > 1 {
            tracing::warn!(
                "{} list items share invoice number {}; updating the first",
                items.len(),
                crate::utils::sanitize_for_log(invoice_number)
            );
        }
        Ok(if items.is_empty() { None } else { Some(items.swap_remove(0)) })
    }

    /// Writes both status columns on the item for `invoice_number`.
    /// Returns `false` when the list has no such invoice.
    pub async fn push_status(
        &self,
        invoice_number: &str,
        approval_status: &str,
        accounting_status: &str,
    ) -> Result<bool> {
        let Some(item) = self.find_by_invoice_number(invoice_number).await? else {
            return Ok(false);
        };

        let mut fields = Map::new();
        fields.insert(columns::APPROVAL_STATUS.to_string(), Value::String(approval_status.to_string()));
        fields.insert(columns::ACCOUNTING_STATUS.to_string(), Value::String(accounting_status.to_string()));

        let list = self.list_ref().await?;
        self.client.patch_item_fields(list, &item.id, &fields).await?;
        Ok(true)
    }

    /// Mirrors an approval decision onto the list.
    pub async fn push_decision(&self, invoice_number: &str, action: ApprovalAction) -> Result<bool> {
        self.push_status(invoice_number, action.as_str(), action.remote_accounting_label())
            .await
    }

    pub async fn fetch_all(&self) -> Result<Vec<RemoteInvoice>> {
        let list = self.list_ref().await?;
        let items = self.client.list_all_items(list, FULL_SYNC_PAGE_SIZE).await?;
        Ok(items.iter().map(RemoteInvoice::from_item).collect())
    }

    pub async fn fetch_page(&self, page: usize, page_size: usize) -> Result<RemoteInvoicePage> {
        let list = self.list_ref().await?;
        let page = self.client.list_page(list, page, page_size).await?;
        Ok(RemoteInvoicePage {
            invoices: page.items.iter().map(RemoteInvoice::from_item).collect(),
            page: page.page,
            page_size: page.page_size,
            has_more: page.has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_invoice_mapping_with_fallback_columns() {
        let item: ListItem = serde_json::from_value(json!({
            "id": "17",
            "fields": {
                "Nro_Factura": "FAC-100",
                "Nit": 900123456,
                "Valor_total": "1.500.000",
                "Creado": "2025-03-01T10:00:00Z",
                "Aprobacion_Doliente": "Por Aprobar",
                "Procesado": "false",
                "FechaProcesado": "2025-03-02"
            }
        }))
        .unwrap();

        let invoice = RemoteInvoice::from_item(&item);
        assert_eq!(invoice.invoice_number.as_deref(), Some("FAC-100"));
        assert_eq!(invoice.tax_id.as_deref(), Some("900123456"));
        assert_eq!(invoice.total_value.as_deref(), Some("1.500.000"));
        assert!(invoice.created_at.is_some());
        assert!(invoice.processed_at.is_some());
        assert!(!invoice.processed);

        let upsert = invoice.into_upsert(42).unwrap();
        assert_eq!(upsert.id, 42);
        assert_eq!(upsert.invoice_number, "FAC-100");
    }

    #[test]
    fn test_item_without_number_has_no_upsert() {
        let item = ListItem { id: "1".into(), fields: Map::new() };
        assert!(RemoteInvoice::from_item(&item).into_upsert(1).is_none());
    }
}
