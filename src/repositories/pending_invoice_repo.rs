use async_trait::async_trait;
use sqlx::{query, PgPool};

use crate::middleware::error_handling::Result;
use crate::models::invoice::PendingInvoiceRecord;

/// Store for spreadsheet invoices that still have to be registered.
#[async_trait]
pub trait PendingInvoiceStore: Send + Sync {
    /// All-or-nothing insert, preserving the order of `records`.
    async fn insert_batch(&self, records: &[PendingInvoiceRecord]) -> Result<u64>;
}

pub struct PendingInvoiceRepository {
    pool: PgPool,
}

impl PendingInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingInvoiceStore for PendingInvoiceRepository {
    async fn insert_batch(&self, records: &[PendingInvoiceRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for record in records {
            let result = query(
                r#"
                INSERT INTO facturas_pendientes
                    (id, document_type, cufe_or_cude, folio, prefix, issue_date, reception_date,
                     issuer_tax_id, issuer_name, vat_amount, other_tax_amount, total)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#
            )
            .bind(record.id)
            .bind(&record.document_type)
            .bind(&record.cufe_or_cude)
            .bind(&record.folio)
            .bind(&record.prefix)
            .bind(&record.issue_date)
            .bind(&record.reception_date)
            .bind(&record.issuer_tax_id)
            .bind(&record.issuer_name)
            .bind(&record.vat_amount)
            .bind(&record.other_tax_amount)
            .bind(&record.total)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(done) => inserted += done.rows_affected(),
                Err(e) => {
                    tracing::error!("Pending invoice {} insert failed, rolling back batch: {}", record.id, e);
                    tx.rollback().await?;
                    return Err(e.into());
                }
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }
}
