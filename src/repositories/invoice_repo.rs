use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, query, PgPool, Postgres, QueryBuilder, Row};

use crate::middleware::error_handling::Result;
use crate::models::invoice::{ApprovalAction, InvoiceRecord, InvoiceUpsert};

/// Bulk upsert ceiling per statement.
pub const UPSERT_CHUNK_SIZE: usize = 500;

const INVOICE_COLUMNS: &str = "id, tax_id, provider_name, invoice_number, total_value, created_at, \
     approval_status, accounting_status, approved_at, processed_at, processed, responsible_party, \
     cufe, observations, cost_center, modified_at";

/// Local store of invoice approval records.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<InvoiceRecord>>;

    async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<InvoiceRecord>>;

    async fn list_all(&self) -> Result<Vec<InvoiceRecord>>;

    /// Every invoice number as stored (not normalized).
    async fn invoice_numbers(&self) -> Result<Vec<String>>;

    /// Sets both status columns to the action, stamps `processed_at`, marks processed.
    /// Only touches a row that is still pending; returns false when nothing changed.
    async fn record_decision(&self, id: i64, action: ApprovalAction, at: DateTime<Utc>) -> Result<bool>;

    /// Inserts or updates by invoice number; existing rows keep their id.
    /// Callers chunk to `UPSERT_CHUNK_SIZE`.
    async fn upsert_batch(&self, batch: &[InvoiceUpsert]) -> Result<u64>;
}

pub struct InvoiceRepository {
    pool: PgPool,
}

impl InvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<InvoiceRecord> {
        Ok(InvoiceRecord {
            id: row.try_get("id")?,
            tax_id: row.try_get("tax_id")?,
            provider_name: row.try_get("provider_name")?,
            invoice_number: row.try_get("invoice_number")?,
            total_value: row.try_get("total_value")?,
            created_at: row.try_get("created_at")?,
            approval_status: row.try_get("approval_status")?,
            accounting_status: row.try_get("accounting_status")?,
            approved_at: row.try_get("approved_at")?,
            processed_at: row.try_get("processed_at")?,
            processed: row.try_get("processed")?,
            responsible_party: row.try_get("responsible_party")?,
            cufe: row.try_get("cufe")?,
            observations: row.try_get("observations")?,
            cost_center: row.try_get("cost_center")?,
            modified_at: row.try_get("modified_at")?,
        })
    }
}

#[async_trait]
impl InvoiceStore for InvoiceRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<InvoiceRecord>> {
        let row = query(&format!("SELECT {} FROM registro_facturas WHERE id = $1", INVOICE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<InvoiceRecord>> {
        let limit = limit.clamp(1, 500);
        let offset = offset.max(0);

        let rows = query(&format!(
            "SELECT {} FROM registro_facturas ORDER BY created_at DESC NULLS LAST, id DESC LIMIT $1 OFFSET $2",
            INVOICE_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<InvoiceRecord>> {
        let rows = query(&format!("SELECT {} FROM registro_facturas ORDER BY id", INVOICE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn invoice_numbers(&self) -> Result<Vec<String>> {
        let rows = query("SELECT invoice_number FROM registro_facturas")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("invoice_number").map_err(Into::into))
            .collect()
    }

    async fn record_decision(&self, id: i64, action: ApprovalAction, at: DateTime<Utc>) -> Result<bool> {
        let result = query(
            r#"
            UPDATE registro_facturas
            SET approval_status = $2,
                accounting_status = $2,
                processed_at = $3,
                processed = true
            WHERE id = $1
              AND (approval_status IS NULL
                   OR lower(trim(approval_status)) NOT IN ('aprobado', 'rechazado'))
            "#
        )
        .bind(id)
        .bind(action.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_batch(&self, batch: &[InvoiceUpsert]) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO registro_facturas ({}) ", INVOICE_COLUMNS));

        builder.push_values(batch, |mut b, invoice| {
            b.push_bind(invoice.id)
                .push_bind(&invoice.tax_id)
                .push_bind(&invoice.provider_name)
                .push_bind(&invoice.invoice_number)
                .push_bind(&invoice.total_value)
                .push_bind(invoice.created_at)
                .push_bind(&invoice.approval_status)
                .push_bind(&invoice.accounting_status)
                .push_bind(invoice.approved_at)
                .push_bind(invoice.processed_at)
                .push_bind(invoice.processed)
                .push_bind(&invoice.responsible_party)
                .push_bind(&invoice.cufe)
                .push_bind(&invoice.observations)
                .push_bind(&invoice.cost_center)
                .push_bind(invoice.modified_at);
        });

        builder.push(
            r#"
            ON CONFLICT (invoice_number) DO UPDATE SET
                tax_id = EXCLUDED.tax_id,
                provider_name = EXCLUDED.provider_name,
                total_value = EXCLUDED.total_value,
                created_at = COALESCE(EXCLUDED.created_at, registro_facturas.created_at),
                approval_status = EXCLUDED.approval_status,
                accounting_status = EXCLUDED.accounting_status,
                approved_at = EXCLUDED.approved_at,
                processed_at = EXCLUDED.processed_at,
                processed = EXCLUDED.processed,
                responsible_party = EXCLUDED.responsible_party,
                cufe = EXCLUDED.cufe,
                observations = EXCLUDED.observations,
                cost_center = EXCLUDED.cost_center,
                modified_at = EXCLUDED.modified_at
            "#,
        );

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
