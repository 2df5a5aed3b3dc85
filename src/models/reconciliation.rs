use serde::Serialize;

/// Result of a local←remote full sync.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
    pub fetched: usize,
    /// Remote items without an invoice number.
    pub skipped: usize,
    /// Items collapsed because a later item carried the same invoice number.
    pub duplicates: usize,
    pub created: usize,
    pub updated: usize,
}

/// An invoice present on both sides whose statuses disagree.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusMismatch {
    pub invoice_number: String,
    pub local_id: i64,
    pub local_approval: String,
    pub remote_approval: Option<String>,
    pub local_accounting: Option<String>,
    pub remote_accounting: Option<String>,
    /// Only terminal local decisions are pushed to the list.
    pub pushable: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub local_count: usize,
    pub remote_count: usize,
    pub missing_locally: Vec<String>,
    pub missing_remotely: Vec<String>,
    pub status_mismatches: Vec<StatusMismatch>,
    /// Spreadsheet candidates registered on neither side.
    pub spreadsheet_only: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_locally.is_empty()
            && self.missing_remotely.is_empty()
            && self.status_mismatches.is_empty()
            && self.spreadsheet_only.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReportResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub report: ReconciliationReport,
}

/// Result of a local→remote status push.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PushReport {
    pub success: bool,
    pub message: String,
    pub attempted: usize,
    pub pushed: usize,
    pub not_found: usize,
    pub failed: usize,
}
