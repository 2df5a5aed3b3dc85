use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::middleware::error_handling::{AppError, Result};
use crate::models::import::CandidateRowView;
use crate::services::matching::normalize;
use crate::services::spreadsheet_importer::ImportOutcome;

/// Candidate rows of one upload, plus the user's filters and selection.
///
/// Selection holds positions in the *filtered* view, so any filter change
/// clears it.
#[derive(Debug, Clone)]
pub struct ImportSession {
    pub id: Uuid,
    pub filename: String,
    pub file_hash: String,
    pub created_at: DateTime<Utc>,
    headers: Vec<String>,
    candidates: Vec<Vec<Option<String>>>,
    filters: BTreeMap<usize, String>,
    selection: Vec<usize>,
}

impl ImportSession {
    pub fn new(filename: String, file_hash: String, outcome: ImportOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename,
            file_hash,
            created_at: Utc::now(),
            headers: outcome.headers,
            candidates: outcome.candidates,
            filters: BTreeMap::new(),
            selection: Vec::new(),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn candidates(&self) -> &[Vec<Option<String>>] {
        &self.candidates
    }

    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    pub fn filters_by_header(&self) -> HashMap<String, String> {
        self.filters
            .iter()
            .filter_map(|(idx, q)| self.headers.get(*idx).map(|h| (h.clone(), q.clone())))
            .collect()
    }

    // ========================================================================
    // Filtering
    // ========================================================================

    pub fn set_filter(&mut self, column: &str, query: &str) -> Result<()> {
        let idx = self
            .headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown column '{}'", column)))?;

        if query.trim().is_empty() {
            self.filters.remove(&idx);
        } else {
            self.filters.insert(idx, query.to_string());
        }
        self.selection.clear();
        Ok(())
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
        self.selection.clear();
    }

    /// Indices into `candidates` that pass every filter, in original order.
    pub fn filtered_indices(&self) -> Vec<usize> {
        self.candidates
            .iter()
            .enumerate()
            .filter(|(_, row)| self.row_matches(row))
            .map(|(idx, _)| idx)
            .collect()
    }

    fn row_matches(&self, row: &[Option<String>]) -> bool {
        self.filters.iter().all(|(col, query)| {
            let needle = normalize(query);
            match row.get(*col).and_then(|c| c.as_deref()) {
                // Blank cells never hide a row.
                None => true,
                Some(cell) => needle.is_empty() || normalize(cell).contains(&needle),
            }
        })
    }

    // ========================================================================
    // Selection
    // ========================================================================

    pub fn select(&mut self, view_index: usize) -> Result<()> {
        let visible = self.filtered_indices().len();
        if view_index >= visible {
            return Err(AppError::BadRequest(format!(
                "Row {} is outside the current view ({} rows)",
                view_index, visible
            )));
        }
        if !self.selection.contains(&view_index) {
            self.selection.push(view_index);
        }
        Ok(())
    }

    pub fn select_all(&mut self) {
        let visible = self.filtered_indices().len();
        for idx in 0..visible {
            if !self.selection.contains(&idx) {
                self.selection.push(idx);
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Selected rows in selection order.
    pub fn selected_rows(&self) -> Vec<Vec<Option<String>>> {
        let view = self.filtered_indices();
        self.selection
            .iter()
            .filter_map(|view_idx| view.get(*view_idx))
            .map(|idx| self.candidates[*idx].clone())
            .collect()
    }

    /// Drops every candidate equal to one of `committed` and clears the selection.
    pub fn remove_committed(&mut self, committed: &[Vec<Option<String>>]) {
        self.candidates.retain(|row| !committed.contains(row));
        self.selection.clear();
    }

    pub fn view(&self, offset: usize, limit: usize) -> Vec<CandidateRowView> {
        self.filtered_indices()
            .into_iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(view_idx, idx)| CandidateRowView {
                index: view_idx,
                selected: self.selection.contains(&view_idx),
                cells: self.candidates[idx].clone(),
            })
            .collect()
    }
}
