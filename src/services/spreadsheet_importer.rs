// Classifies spreadsheet rows against the invoices already registered.
//
// Steps, in order:
//   1. resolve header aliases (trimmed, lowercased, exact)
//   2. synthesize a leading "Factura" column from prefijo + folio
//   3. drop "application response" rows
//   4. tag every row with "Estado en Sistema"
//   5. keep only "No encontrado"

use crate::services::field_mapping::{
    find_column, ACKNOWLEDGEMENT_DOCUMENT_TYPE, DOCUMENT_TYPE_ALIASES, FOLIO_ALIASES,
    INVOICE_NUMBER_ALIASES, PREFIX_ALIASES,
};
use crate::services::file_parser_service::ParsedFile;
use crate::services::matching::{normalize, KnownInvoiceNumbers};

pub const SYNTHESIZED_INVOICE_HEADER: &str = "Factura";
pub const STATUS_HEADER: &str = "Estado en Sistema";
pub const STATUS_FOUND: &str = "Encontrado";
pub const STATUS_NOT_FOUND: &str = "No encontrado";
pub const STATUS_UNKNOWN: &str = "Desconocido";
pub const UP_TO_DATE_MESSAGE: &str = "all invoices already exist";

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    /// Headers of the candidate rows, including the synthesized and status columns.
    pub headers: Vec<String>,
    pub candidates: Vec<Vec<Option<String>>>,
    pub rows_parsed: usize,
    pub rows_discarded: usize,
    pub rows_found: usize,
    pub rows_unknown: usize,
}

impl ImportOutcome {
    /// Parsed fine, nothing new: a valid terminal state, not a failure.
    pub fn is_up_to_date(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn message(&self) -> String {
        if self.is_up_to_date() {
            UP_TO_DATE_MESSAGE.to_string()
        } else {
            format!("{} invoices not found in the system", self.candidates.len())
        }
    }
}

pub struct SpreadsheetImporter;

impl SpreadsheetImporter {
    pub fn classify(parsed: ParsedFile, known: &KnownInvoiceNumbers) -> ImportOutcome {
        let ParsedFile { mut headers, mut rows, .. } = parsed;
        let rows_parsed = rows.len();

        let prefix_idx = find_column(&headers, PREFIX_ALIASES);
        let folio_idx = find_column(&headers, FOLIO_ALIASES);
        if let (Some(prefix_idx), Some(folio_idx)) = (prefix_idx, folio_idx) {
            headers.insert(0, SYNTHESIZED_INVOICE_HEADER.to_string());
            for row in rows.iter_mut() {
                let composite = format!(
                    "{}{}",
                    cell_text(row, prefix_idx),
                    cell_text(row, folio_idx)
                );
                row.insert(0, Some(composite));
            }
        }

        let mut rows_discarded = 0;
        if let Some(doc_type_idx) = find_column(&headers, DOCUMENT_TYPE_ALIASES) {
            rows.retain(|row| {
                let keep = normalize(cell_text(row, doc_type_idx)) != ACKNOWLEDGEMENT_DOCUMENT_TYPE;
                if !keep {
                    rows_discarded += 1;
                }
                keep
            });
        }

        let invoice_idx = find_column(&headers, INVOICE_NUMBER_ALIASES);
        headers.push(STATUS_HEADER.to_string());

        let mut rows_found = 0;
        let mut rows_unknown = 0;
        let mut candidates = Vec::new();
        for mut row in rows {
            let status = match invoice_idx {
                None => STATUS_UNKNOWN,
                Some(idx) if known.contains(cell_text(&row, idx)) => STATUS_FOUND,
                Some(_) => STATUS_NOT_FOUND,
            };
            match status {
                STATUS_FOUND => rows_found += 1,
                STATUS_UNKNOWN => rows_unknown += 1,
                _ => {}
            }
            if status == STATUS_NOT_FOUND {
                // Padding keeps the status cell aligned with its header.
                row.resize(headers.len() - 1, None);
                row.push(Some(status.to_string()));
                candidates.push(row);
            }
        }

        if invoice_idx.is_none() {
            tracing::warn!("Spreadsheet has no invoice number column; no row can be classified");
        }

        tracing::info!(
            "Classified {} rows: {} discarded, {} found, {} unknown, {} candidates",
            rows_parsed,
            rows_discarded,
            rows_found,
            rows_unknown,
            candidates.len()
        );

        ImportOutcome {
            headers,
            candidates,
            rows_parsed,
            rows_discarded,
            rows_found,
            rows_unknown,
        }
    }
}

fn cell_text(row: &[Option<String>], idx: usize) -> &str {
    row.get(idx).and_then(|c| c.as_deref()).unwrap_or("")
}
