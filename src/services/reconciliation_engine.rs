// ============================================================================
// Reconciliation Engine
// ============================================================================
//
// Keeps three invoice sources consistent:
//   - registro_facturas (local system of record)
//   - the SharePoint invoice register
//   - DIAN spreadsheet exports, staged through import sessions
//
// Import sessions live in memory only; committing a selection writes the
// rows to facturas_pendientes in one transaction.
//
// ============================================================================

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::middleware::error_handling::{AppError, Result};
use crate::middleware::metrics;
use crate::models::import::{CandidatePage, CommitResponse, ImportSessionResponse, SelectRequest};
use crate::models::invoice::{ApprovalStatus, InvoiceRecord, InvoiceUpsert};
use crate::models::reconciliation::{PushReport, ReconciliationReport, StatusMismatch, SyncReport};
use crate::repositories::{InvoiceStore, PendingInvoiceStore, UPSERT_CHUNK_SIZE};
use crate::services::field_mapping::{find_column, PendingColumns, INVOICE_NUMBER_ALIASES};
use crate::services::file_parser_service::FileParserService;
use crate::services::id_generator::IdGenerator;
use crate::services::import_session::ImportSession;
use crate::services::matching::{normalize, KnownInvoiceNumbers, MatchKey};
use crate::services::sharepoint::{InvoiceList, RemoteInvoice};
use crate::services::spreadsheet_importer::SpreadsheetImporter;
use crate::utils::sanitize_for_log;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

// ============================================================================
// Session registry entries
// ============================================================================

pub struct ImportSessionHandle {
    session: Mutex<ImportSession>,
    committing: AtomicBool,
}

/// Clears the in-flight flag when the commit finishes, whatever the outcome.
struct CommitGuard<'a>(&'a AtomicBool);

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ImportSessionHandle {
    fn new(session: ImportSession) -> Self {
        Self {
            session: Mutex::new(session),
            committing: AtomicBool::new(false),
        }
    }

    fn begin_commit(&self) -> Option<CommitGuard<'_>> {
        self.committing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CommitGuard(&self.committing))
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct ReconciliationEngine {
    invoices: Arc<dyn InvoiceStore>,
    pending: Arc<dyn PendingInvoiceStore>,
    remote: Arc<InvoiceList>,
    sessions: DashMap<Uuid, Arc<ImportSessionHandle>>,
    ids: IdGenerator,
}

impl ReconciliationEngine {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        pending: Arc<dyn PendingInvoiceStore>,
        remote: Arc<InvoiceList>,
    ) -> Self {
        Self {
            invoices,
            pending,
            remote,
            sessions: DashMap::new(),
            ids: IdGenerator::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn handle(&self, session_id: Uuid) -> Result<Arc<ImportSessionHandle>> {
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::NotFound("Import session not found".to_string()))
    }

    // ========================================================================
    // Import sessions
    // ========================================================================

    /// Parses and classifies an upload. A session is only registered when at
    /// least one row is missing from the system.
    pub async fn start_import(&self, data: &[u8], filename: &str) -> Result<ImportSessionResponse> {
        let parsed = FileParserService::parse(data, filename)?;
        let file_hash = parsed.file_hash.clone();

        let known = KnownInvoiceNumbers::from_numbers(self.invoices.invoice_numbers().await?);
        tracing::debug!("Snapshot of {} known invoice numbers", known.len());

        let outcome = SpreadsheetImporter::classify(parsed, &known);

        let mut response = ImportSessionResponse {
            success: true,
            message: outcome.message(),
            session_id: None,
            filename: filename.to_string(),
            file_hash: file_hash.clone(),
            headers: outcome.headers.clone(),
            rows_parsed: outcome.rows_parsed,
            rows_discarded: outcome.rows_discarded,
            rows_found: outcome.rows_found,
            rows_unknown: outcome.rows_unknown,
            candidates: outcome.candidates.len(),
        };

        if outcome.is_up_to_date() {
            tracing::info!("Import of {} is up to date", sanitize_for_log(filename));
            return Ok(response);
        }

        let session = ImportSession::new(filename.to_string(), file_hash, outcome);
        let session_id = session.id;
        self.sessions.insert(session_id, Arc::new(ImportSessionHandle::new(session)));
        response.session_id = Some(session_id);

        tracing::info!(
            "Import session {} opened for {} with {} candidates",
            session_id,
            sanitize_for_log(filename),
            response.candidates
        );

        Ok(response)
    }

    pub async fn view(&self, session_id: Uuid, offset: Option<usize>, limit: Option<usize>) -> Result<CandidatePage> {
        let handle = self.handle(session_id)?;
        let session = handle.session.lock().await;
        Ok(page_of(&session, offset, limit))
    }

    pub async fn set_filter(&self, session_id: Uuid, column: &str, query: &str) -> Result<CandidatePage> {
        let handle = self.handle(session_id)?;
        let mut session = handle.session.lock().await;
        session.set_filter(column, query)?;
        Ok(page_of(&session, None, None))
    }

    /// Replaces every filter at once. Unknown columns reject the whole request.
    pub async fn replace_filters(&self, session_id: Uuid, filters: &HashMap<String, String>) -> Result<CandidatePage> {
        let handle = self.handle(session_id)?;
        let mut session = handle.session.lock().await;

        if let Some(unknown) = filters.keys().find(|column| !session.headers().contains(*column)) {
            return Err(AppError::BadRequest(format!("Unknown column '{}'", unknown)));
        }

        session.clear_filters();
        for (column, query) in filters {
            session.set_filter(column, query)?;
        }
        Ok(page_of(&session, None, None))
    }

    pub async fn clear_filters(&self, session_id: Uuid) -> Result<CandidatePage> {
        let handle = self.handle(session_id)?;
        let mut session = handle.session.lock().await;
        session.clear_filters();
        Ok(page_of(&session, None, None))
    }

    pub async fn select(&self, session_id: Uuid, request: SelectRequest) -> Result<CandidatePage> {
        let handle = self.handle(session_id)?;
        let mut session = handle.session.lock().await;
        match request {
            SelectRequest::One { index } => session.select(index)?,
            SelectRequest::All => session.select_all(),
        }
        Ok(page_of(&session, None, None))
    }

    pub async fn clear_selection(&self, session_id: Uuid) -> Result<CandidatePage> {
        let handle = self.handle(session_id)?;
        let mut session = handle.session.lock().await;
        session.clear_selection();
        Ok(page_of(&session, None, None))
    }

    /// Writes the selected rows to the pending table as one batch.
    ///
    /// On failure nothing about the session changes, so the same selection
    /// can be committed again.
    pub async fn commit(&self, session_id: Uuid) -> Result<CommitResponse> {
        let handle = self.handle(session_id)?;
        let _in_flight = handle.begin_commit().ok_or_else(|| {
            metrics::record_import_commit("conflict");
            AppError::Conflict("A commit is already running for this import".to_string())
        })?;

        let mut session = handle.session.lock().await;
        let rows = session.selected_rows();

        if rows.is_empty() {
            metrics::record_import_commit("empty");
            return Ok(CommitResponse {
                success: true,
                message: "No rows selected; nothing to commit".to_string(),
                committed: 0,
                remaining_candidates: session.candidates().len(),
                pending_ids: Vec::new(),
            });
        }

        let columns = PendingColumns::resolve(session.headers());
        let ids = self.ids.next_batch(rows.len());
        let records: Vec<_> = rows
            .iter()
            .zip(ids.iter())
            .map(|(row, id)| columns.map_row(row, *id))
            .collect();

        if let Err(e) = self.pending.insert_batch(&records).await {
            tracing::error!("Commit of import session {} failed: {}", session_id, e);
            metrics::record_import_commit("failed");
            return Err(AppError::PartialBatchFailure(format!(
                "Could not save {} selected invoices; nothing was saved",
                records.len()
            )));
        }

        session.remove_committed(&rows);
        metrics::record_import_commit("committed");
        tracing::info!(
            "Committed {} pending invoices from import session {} ({} candidates left)",
            records.len(),
            session_id,
            session.candidates().len()
        );

        Ok(CommitResponse {
            success: true,
            message: format!("{} invoices saved as pending", records.len()),
            committed: records.len(),
            remaining_candidates: session.candidates().len(),
            pending_ids: ids,
        })
    }

    pub fn discard(&self, session_id: Uuid) -> Result<()> {
        self.sessions
            .remove(&session_id)
            .map(|_| tracing::info!("Import session {} discarded", session_id))
            .ok_or_else(|| AppError::NotFound("Import session not found".to_string()))
    }

    // ========================================================================
    // Cross-system sync
    // ========================================================================

    /// Pulls the whole remote list into the local store.
    pub async fn sync_from_remote(&self) -> Result<SyncReport> {
        let remote = self.remote.fetch_all().await?;
        if remote.is_empty() {
            return Err(AppError::NotFound(format!(
                "No items found in list '{}'",
                self.remote.list_name()
            )));
        }
        let fetched = remote.len();

        let existing: HashSet<String> = self.invoices.invoice_numbers().await?.into_iter().collect();

        let mut skipped = 0;
        let mut duplicates = 0;
        let mut position: HashMap<String, usize> = HashMap::new();
        let mut latest: Vec<RemoteInvoice> = Vec::new();
        for invoice in remote {
            let Some(number) = invoice.invoice_number.clone() else {
                skipped += 1;
                continue;
            };
            match position.get(&number) {
                Some(&idx) => {
                    duplicates += 1;
                    latest[idx] = invoice;
                }
                None => {
                    position.insert(number, latest.len());
                    latest.push(invoice);
                }
            }
        }

        let ids = self.ids.next_batch(latest.len());
        let upserts: Vec<InvoiceUpsert> = latest
            .into_iter()
            .zip(ids)
            .filter_map(|(invoice, id)| invoice.into_upsert(id))
            .collect();

        let created = upserts.iter().filter(|u| !existing.contains(&u.invoice_number)).count();
        let updated = upserts.len() - created;

        for chunk in upserts.chunks(UPSERT_CHUNK_SIZE) {
            self.invoices.upsert_batch(chunk).await?;
        }

        metrics::record_sync_items("created", created);
        metrics::record_sync_items("updated", updated);
        metrics::record_sync_items("skipped", skipped);
        metrics::record_sync_items("duplicate", duplicates);

        tracing::info!(
            "Synced list '{}': {} fetched, {} created, {} updated, {} skipped, {} duplicates",
            self.remote.list_name(),
            fetched,
            created,
            updated,
            skipped,
            duplicates
        );

        Ok(SyncReport {
            success: true,
            message: format!(
                "Synced {} invoices ({} new, {} updated)",
                created + updated,
                created,
                updated
            ),
            fetched,
            skipped,
            duplicates,
            created,
            updated,
        })
    }

    pub async fn reconciliation_report(&self, session_id: Option<Uuid>) -> Result<ReconciliationReport> {
        let spreadsheet = match session_id {
            Some(id) => {
                let handle = self.handle(id)?;
                let session = handle.session.lock().await;
                candidate_numbers(&session)
            }
            None => Vec::new(),
        };

        let (local, remote) = futures::try_join!(
            self.invoices.list_all(),
            async { self.remote.fetch_all().await.map_err(AppError::from) }
        )?;

        Ok(reconcile(&local, &remote, &spreadsheet))
    }

    /// Pushes terminal local decisions the list does not reflect yet.
    /// Failures are counted per invoice; the pass always completes.
    pub async fn push_to_remote(&self) -> Result<PushReport> {
        let report = self.reconciliation_report(None).await?;

        let mut result = PushReport::default();
        for mismatch in report.status_mismatches.iter().filter(|m| m.pushable) {
            let Some(action) = ApprovalStatus::from_label(Some(&mismatch.local_approval)).decision() else {
                continue;
            };
            result.attempted += 1;

            match self
                .remote
                .push_status(&mismatch.invoice_number, action.as_str(), action.remote_accounting_label())
                .await
            {
                Ok(true) => {
                    result.pushed += 1;
                    metrics::record_propagation("updated");
                }
                Ok(false) => {
                    result.not_found += 1;
                    metrics::record_propagation("not_found");
                    tracing::warn!(
                        "Invoice {} vanished from the list before it could be updated",
                        sanitize_for_log(&mismatch.invoice_number)
                    );
                }
                Err(e) => {
                    result.failed += 1;
                    metrics::record_propagation("failed");
                    tracing::error!(
                        "Failed to push status of invoice {}: {}",
                        sanitize_for_log(&mismatch.invoice_number),
                        e
                    );
                }
            }
        }

        result.success = result.failed == 0;
        result.message = format!(
            "{} of {} statuses pushed ({} not found, {} failed)",
            result.pushed, result.attempted, result.not_found, result.failed
        );
        Ok(result)
    }
}

fn page_of(session: &ImportSession, offset: Option<usize>, limit: Option<usize>) -> CandidatePage {
    let offset = offset.unwrap_or(0);
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    CandidatePage {
        session_id: session.id,
        headers: session.headers().to_vec(),
        filters: session.filters_by_header(),
        total_candidates: session.candidates().len(),
        filtered_count: session.filtered_indices().len(),
        selected_count: session.selection().len(),
        rows: session.view(offset, limit),
    }
}

/// Invoice numbers of the session's candidate rows, in row order.
fn candidate_numbers(session: &ImportSession) -> Vec<String> {
    let Some(idx) = find_column(session.headers(), INVOICE_NUMBER_ALIASES) else {
        return Vec::new();
    };
    session
        .candidates()
        .iter()
        .filter_map(|row| row.get(idx).and_then(|c| c.clone()))
        .collect()
}

// ============================================================================
// Three-way comparison
// ============================================================================

/// Accounting label the list should show for a local record.
fn expected_remote_accounting(local: &InvoiceRecord) -> Option<String> {
    match local.approval_state().decision() {
        Some(action) => Some(action.remote_accounting_label().to_string()),
        None => local.accounting_status.clone(),
    }
}

fn same_label(a: Option<&str>, b: Option<&str>) -> bool {
    a.map(normalize).filter(|s| !s.is_empty()) == b.map(normalize).filter(|s| !s.is_empty())
}

/// Compares the three sources by `MatchKey`. Output lists are sorted by key.
pub fn reconcile(
    local: &[InvoiceRecord],
    remote: &[RemoteInvoice],
    spreadsheet_numbers: &[String],
) -> ReconciliationReport {
    let mut local_by_key: BTreeMap<MatchKey, &InvoiceRecord> = BTreeMap::new();
    for record in local {
        if let Some(key) = MatchKey::new(&record.invoice_number) {
            local_by_key.entry(key).or_insert(record);
        }
    }

    // Later items win, as in a full sync.
    let mut remote_by_key: BTreeMap<MatchKey, &RemoteInvoice> = BTreeMap::new();
    for invoice in remote {
        if let Some(key) = invoice.invoice_number.as_deref().and_then(MatchKey::new) {
            remote_by_key.insert(key, invoice);
        }
    }

    let missing_locally = remote_by_key
        .iter()
        .filter(|(key, _)| !local_by_key.contains_key(*key))
        .filter_map(|(_, invoice)| invoice.invoice_number.clone())
        .collect();

    let missing_remotely = local_by_key
        .iter()
        .filter(|(key, _)| !remote_by_key.contains_key(*key))
        .map(|(_, record)| record.invoice_number.clone())
        .collect();

    let mut status_mismatches = Vec::new();
    for (key, record) in &local_by_key {
        let Some(remote_invoice) = remote_by_key.get(key) else {
            continue;
        };
        let local_state = record.approval_state();
        let remote_state = ApprovalStatus::from_label(remote_invoice.approval_status.as_deref());
        let expected_accounting = expected_remote_accounting(record);

        if local_state == remote_state
            && same_label(expected_accounting.as_deref(), remote_invoice.accounting_status.as_deref())
        {
            continue;
        }

        status_mismatches.push(StatusMismatch {
            invoice_number: record.invoice_number.clone(),
            local_id: record.id,
            local_approval: local_state.as_str().to_string(),
            remote_approval: remote_invoice.approval_status.clone(),
            local_accounting: record.accounting_status.clone(),
            remote_accounting: remote_invoice.accounting_status.clone(),
            pushable: local_state.is_terminal(),
        });
    }

    let mut seen = HashSet::new();
    let spreadsheet_only = spreadsheet_numbers
        .iter()
        .filter_map(|number| MatchKey::new(number).map(|key| (key, number)))
        .filter(|(key, _)| !local_by_key.contains_key(key) && !remote_by_key.contains_key(key))
        .filter(|(key, _)| seen.insert(key.clone()))
        .map(|(_, number)| number.trim().to_string())
        .collect();

    ReconciliationReport {
        local_count: local.len(),
        remote_count: remote.len(),
        missing_locally,
        missing_remotely,
        status_mismatches,
        spreadsheet_only,
    }
}
