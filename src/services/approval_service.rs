use chrono::Utc;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::middleware::error_handling::{AppError, Result};
use crate::middleware::metrics;
use crate::models::invoice::{ApprovalAction, ApprovalStatus, InvoiceRecord};
use crate::repositories::InvoiceStore;
use crate::services::sharepoint::InvoiceList;
use crate::utils::sanitize_for_log;

/// What happened on the SharePoint side after a local decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationOutcome {
    Updated,
    NotFound,
    Failed,
    /// The decision was a repeat; nothing was sent.
    Skipped,
}

impl PropagationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropagationOutcome::Updated => "updated",
            PropagationOutcome::NotFound => "not_found",
            PropagationOutcome::Failed => "failed",
            PropagationOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub success: bool,
    pub message: String,
    pub invoice_id: i64,
    pub invoice_number: String,
    pub status: ApprovalStatus,
    pub remote_status: PropagationOutcome,
}

/// Applies approval decisions: local write first, then a best-effort mirror
/// onto the SharePoint list.
pub struct ApprovalService {
    invoices: Arc<dyn InvoiceStore>,
    remote: Arc<InvoiceList>,
}

impl ApprovalService {
    pub fn new(invoices: Arc<dyn InvoiceStore>, remote: Arc<InvoiceList>) -> Self {
        Self { invoices, remote }
    }

    pub async fn apply_action(&self, id: Option<i64>, action: Option<&str>) -> Result<ApprovalOutcome> {
        let id = match id {
            Some(id) if id > 0 => id,
            Some(_) => return Err(AppError::BadRequest("Invalid invoice id".to_string())),
            None => return Err(AppError::BadRequest("Missing invoice id".to_string())),
        };
        let action = match action {
            Some(raw) if !raw.is_empty() => ApprovalAction::from_str(raw).map_err(AppError::BadRequest)?,
            _ => return Err(AppError::BadRequest("Missing action".to_string())),
        };

        let invoice = self.find(id, action).await?;

        if invoice.approval_state().is_terminal() {
            return self.settled(invoice, action);
        }

        if !self.invoices.record_decision(id, action, Utc::now()).await? {
            // Another request decided (or deleted) the invoice after our read.
            let latest = self.find(id, action).await?;
            if !latest.approval_state().is_terminal() {
                return Err(AppError::Conflict("Invoice changed while applying the decision".to_string()));
            }
            return self.settled(latest, action);
        }

        metrics::record_approval_action(action.as_str(), "applied");
        tracing::info!("Invoice {} marked as {}", id, action);

        let remote_status = self.propagate(&invoice.invoice_number, action).await;
        metrics::record_propagation(remote_status.as_str());

        Ok(ApprovalOutcome {
            success: true,
            message: format!("Invoice marked as {}", action),
            invoice_id: id,
            invoice_number: invoice.invoice_number,
            status: action.target_status(),
            remote_status,
        })
    }

    async fn find(&self, id: i64, action: ApprovalAction) -> Result<InvoiceRecord> {
        self.invoices.find_by_id(id).await?.ok_or_else(|| {
            metrics::record_approval_action(action.as_str(), "not_found");
            AppError::NotFound("Invoice not found".to_string())
        })
    }

    /// Outcome for an invoice that already carries a decision: a repeat is a
    /// no-op success, the opposite decision is refused.
    fn settled(&self, invoice: InvoiceRecord, action: ApprovalAction) -> Result<ApprovalOutcome> {
        let current = invoice.approval_state();
        if current == action.target_status() {
            metrics::record_approval_action(action.as_str(), "repeated");
            tracing::info!("Invoice {} already {}; nothing to do", invoice.id, current);
            return Ok(ApprovalOutcome {
                success: true,
                message: format!("Invoice already {}", current),
                invoice_id: invoice.id,
                invoice_number: invoice.invoice_number,
                status: current,
                remote_status: PropagationOutcome::Skipped,
            });
        }

        metrics::record_approval_action(action.as_str(), "rejected");
        tracing::warn!("Refusing to mark invoice {} as {}: already {}", invoice.id, action, current);
        Err(AppError::AlreadyProcessed(format!(
            "Invoice was already processed as {}",
            current
        )))
    }

    /// Never fails: the local decision is already committed.
    async fn propagate(&self, invoice_number: &str, action: ApprovalAction) -> PropagationOutcome {
        match self.remote.push_decision(invoice_number, action).await {
            Ok(true) => PropagationOutcome::Updated,
            Ok(false) => {
                tracing::warn!(
                    "Invoice {} not found in list '{}'; local decision kept",
                    sanitize_for_log(invoice_number),
                    self.remote.list_name()
                );
                PropagationOutcome::NotFound
            }
            Err(e) => {
                tracing::error!(
                    "Failed to mirror decision for invoice {} to SharePoint: {}",
                    sanitize_for_log(invoice_number),
                    e
                );
                PropagationOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::invoice::InvoiceUpsert;
    use crate::services::test_support::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::Ordering;

    /// Yields after every read so concurrent callers interleave between the
    /// read and the write.
    struct InterleavingStore {
        inner: Arc<MemoryInvoiceStore>,
    }

    #[async_trait]
    impl InvoiceStore for InterleavingStore {
        async fn find_by_id(&self, id: i64) -> Result<Option<InvoiceRecord>> {
            let found = self.inner.find_by_id(id).await;
            tokio::task::yield_now().await;
            found
        }

        async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<InvoiceRecord>> {
            self.inner.list_recent(limit, offset).await
        }

        async fn list_all(&self) -> Result<Vec<InvoiceRecord>> {
            self.inner.list_all().await
        }

        async fn invoice_numbers(&self) -> Result<Vec<String>> {
            self.inner.invoice_numbers().await
        }

        async fn record_decision(&self, id: i64, action: ApprovalAction, at: DateTime<Utc>) -> Result<bool> {
            self.inner.record_decision(id, action, at).await
        }

        async fn upsert_batch(&self, batch: &[InvoiceUpsert]) -> Result<u64> {
            self.inner.upsert_batch(batch).await
        }
    }

    fn service(list: &Arc<MemoryListClient>, store: &Arc<MemoryInvoiceStore>) -> ApprovalService {
        ApprovalService::new(store.clone(), list.invoice_list())
    }

    #[tokio::test]
    async fn test_approve_updates_local_and_remote() {
        let store = MemoryInvoiceStore::with(vec![invoice(42, "FAC-42", Some("Por Aprobar"))]);
        let list = MemoryListClient::with(vec![remote_invoice_item("9", "FAC-42", "Por Aprobar", "")]);

        let outcome = service(&list, &store).apply_action(Some(42), Some("Aprobado")).await.unwrap();
        assert_eq!(outcome.status, ApprovalStatus::Aprobado);
        assert_eq!(outcome.remote_status, PropagationOutcome::Updated);

        let row = store.get(42).unwrap();
        assert_eq!(row.approval_status.as_deref(), Some("Aprobado"));
        assert_eq!(row.accounting_status.as_deref(), Some("Aprobado"));
        assert!(row.processed);
        assert!(row.processed_at.is_some());

        let patches = list.patches.lock().unwrap();
        assert_eq!(patches[0].1["Aprobacion_Doliente"], "Aprobado");
        assert_eq!(patches[0].1["Gestion_Contabilidad"], "Procesado");
    }

    #[tokio::test]
    async fn test_reject_writes_rechazado_on_both_columns() {
        let store = MemoryInvoiceStore::with(vec![invoice(5, "FAC-5", None)]);
        let list = MemoryListClient::with(vec![remote_invoice_item("1", "FAC-5", "Por Aprobar", "")]);

        service(&list, &store).apply_action(Some(5), Some("Rechazado")).await.unwrap();
        let patches = list.patches.lock().unwrap();
        assert_eq!(patches[0].1["Aprobacion_Doliente"], "Rechazado");
        assert_eq!(patches[0].1["Gestion_Contabilidad"], "Rechazado");
    }

    #[tokio::test]
    async fn test_missing_invoice_writes_nothing() {
        let store = MemoryInvoiceStore::with(vec![]);
        let list = MemoryListClient::with(vec![]);

        let err = service(&list, &store).apply_action(Some(7), Some("Aprobado")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(store.decisions.load(Ordering::SeqCst), 0);
        assert!(list.patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_is_bad_request() {
        let store = MemoryInvoiceStore::with(vec![invoice(1, "FAC-1", None)]);
        let list = MemoryListClient::with(vec![]);
        let svc = service(&list, &store);

        assert!(matches!(svc.apply_action(None, Some("Aprobado")).await, Err(AppError::BadRequest(_))));
        assert!(matches!(svc.apply_action(Some(0), Some("Aprobado")).await, Err(AppError::BadRequest(_))));
        assert!(matches!(svc.apply_action(Some(1), None).await, Err(AppError::BadRequest(_))));
        assert!(matches!(svc.apply_action(Some(1), Some("Procesado")).await, Err(AppError::BadRequest(_))));
        assert_eq!(store.decisions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_terminal_state_guard() {
        let store = MemoryInvoiceStore::with(vec![invoice(3, "FAC-3", None)]);
        let list = MemoryListClient::with(vec![remote_invoice_item("1", "FAC-3", "Por Aprobar", "")]);
        let svc = service(&list, &store);

        svc.apply_action(Some(3), Some("Aprobado")).await.unwrap();

        let err = svc.apply_action(Some(3), Some("Rechazado")).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyProcessed(_)));
        assert_eq!(store.get(3).unwrap().approval_status.as_deref(), Some("Aprobado"));

        let repeat = svc.apply_action(Some(3), Some("Aprobado")).await.unwrap();
        assert!(repeat.success);
        assert_eq!(repeat.remote_status, PropagationOutcome::Skipped);
        assert_eq!(store.decisions.load(Ordering::SeqCst), 1);
        assert_eq!(list.patches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_local_decision() {
        let store = MemoryInvoiceStore::with(vec![invoice(8, "FAC-8", None)]);
        let list = MemoryListClient::with(vec![remote_invoice_item("1", "FAC-8", "Por Aprobar", "")]);
        list.fail_patches.store(true, Ordering::SeqCst);

        let outcome = service(&list, &store).apply_action(Some(8), Some("Aprobado")).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.remote_status, PropagationOutcome::Failed);
        assert_eq!(store.get(8).unwrap().approval_status.as_deref(), Some("Aprobado"));
    }

    #[tokio::test]
    async fn test_missing_remote_item_is_reported() {
        let store = MemoryInvoiceStore::with(vec![invoice(9, "FAC-9", None)]);
        let list = MemoryListClient::with(vec![]);

        let outcome = service(&list, &store).apply_action(Some(9), Some("Rechazado")).await.unwrap();
        assert_eq!(outcome.remote_status, PropagationOutcome::NotFound);
        assert!(store.get(9).unwrap().processed);
    }

    #[tokio::test]
    async fn test_concurrent_opposite_decisions_only_one_wins() {
        let store = MemoryInvoiceStore::with(vec![invoice(3, "FAC-3", None)]);
        let list = MemoryListClient::with(vec![remote_invoice_item("1", "FAC-3", "Por Aprobar", "")]);
        let interleaving = Arc::new(InterleavingStore { inner: store.clone() });
        let svc = ApprovalService::new(interleaving, list.invoice_list());

        let (approve, reject) = tokio::join!(
            svc.apply_action(Some(3), Some("Aprobado")),
            svc.apply_action(Some(3), Some("Rechazado")),
        );

        let winner = match (&approve, &reject) {
            (Ok(_), Err(AppError::AlreadyProcessed(_))) => "Aprobado",
            (Err(AppError::AlreadyProcessed(_)), Ok(_)) => "Rechazado",
            other => panic!("expected exactly one decision to apply, got {:?}", other),
        };
        assert_eq!(store.get(3).unwrap().approval_status.as_deref(), Some(winner));
        assert_eq!(store.decisions.load(Ordering::SeqCst), 1);

        let patches = list.patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].1["Aprobacion_Doliente"], winner);
    }

    #[tokio::test]
    async fn test_concurrent_repeat_is_skipped_not_written_twice() {
        let store = MemoryInvoiceStore::with(vec![invoice(4, "FAC-4", None)]);
        let list = MemoryListClient::with(vec![remote_invoice_item("1", "FAC-4", "Por Aprobar", "")]);
        let interleaving = Arc::new(InterleavingStore { inner: store.clone() });
        let svc = ApprovalService::new(interleaving, list.invoice_list());

        let (first, second) = tokio::join!(
            svc.apply_action(Some(4), Some("Rechazado")),
            svc.apply_action(Some(4), Some("Rechazado")),
        );

        let mut statuses = vec![first.unwrap().remote_status, second.unwrap().remote_status];
        statuses.sort_by_key(|s| s.as_str());
        assert_eq!(statuses, vec![PropagationOutcome::Skipped, PropagationOutcome::Updated]);
        assert_eq!(store.decisions.load(Ordering::SeqCst), 1);
        assert_eq!(list.patches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invoice_deleted_before_write_is_not_found() {
        let store = MemoryInvoiceStore::with(vec![invoice(6, "FAC-6", None)]);
        let list = MemoryListClient::with(vec![remote_invoice_item("1", "FAC-6", "Por Aprobar", "")]);
        let interleaving = Arc::new(InterleavingStore { inner: store.clone() });
        let svc = ApprovalService::new(interleaving, list.invoice_list());

        // Runs while the decision is parked between its read and write.
        let remove = async {
            store.rows.lock().unwrap().clear();
        };
        let (outcome, _) = tokio::join!(svc.apply_action(Some(6), Some("Aprobado")), remove);

        assert!(matches!(outcome, Err(AppError::NotFound(_))));
        assert!(list.patches.lock().unwrap().is_empty());
    }
}
