use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Summary returned after a spreadsheet has been uploaded and classified.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSessionResponse {
    pub success: bool,
    pub message: String,
    pub session_id: Option<Uuid>,
    pub filename: String,
    pub file_hash: String,
    pub headers: Vec<String>,
    pub rows_parsed: usize,
    pub rows_discarded: usize,
    pub rows_found: usize,
    pub rows_unknown: usize,
    pub candidates: usize,
}

#[derive(Debug, Deserialize)]
pub struct RowsQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CandidateRowView {
    /// Position within the filtered view; this is what selection refers to.
    pub index: usize,
    pub selected: bool,
    pub cells: Vec<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidatePage {
    pub session_id: Uuid,
    pub headers: Vec<String>,
    pub filters: HashMap<String, String>,
    pub total_candidates: usize,
    pub filtered_count: usize,
    pub selected_count: usize,
    pub rows: Vec<CandidateRowView>,
}

/// Replaces every active filter. Keys are header names.
#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SelectRequest {
    One { index: usize },
    All,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitResponse {
    pub success: bool,
    pub message: String,
    pub committed: usize,
    pub remaining_candidates: usize,
    pub pending_ids: Vec<i64>,
}
