pub mod session;
pub mod id_generator;
pub mod matching;
pub mod field_mapping;
pub mod file_parser_service;
pub mod spreadsheet_importer;
pub mod import_session;
pub mod reconciliation_engine;
pub mod approval_service;
pub mod sharepoint;
pub mod erp;

#[cfg(test)]
pub(crate) mod test_support;

pub use approval_service::{ApprovalOutcome, ApprovalService, PropagationOutcome};
pub use reconciliation_engine::ReconciliationEngine;
