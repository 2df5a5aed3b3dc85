// Header alias tables for spreadsheet columns.
// Matching is exact after trimming and lowercasing both sides; the first alias
// (in table order) that is present in the header row wins.

use crate::models::invoice::PendingInvoiceRecord;
use crate::services::matching::normalize;

pub const PREFIX_ALIASES: &[&str] = &["prefijo"];
pub const FOLIO_ALIASES: &[&str] = &["folio"];
pub const DOCUMENT_TYPE_ALIASES: &[&str] = &["tipo de documento", "tipo_de_documento"];
pub const INVOICE_NUMBER_ALIASES: &[&str] = &["factura", "nro. factura", "nro_factura"];

/// Document type of DIAN acknowledgement receipts; never an invoice.
pub const ACKNOWLEDGEMENT_DOCUMENT_TYPE: &str = "application response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingField {
    DocumentType,
    CufeOrCude,
    Folio,
    Prefix,
    IssueDate,
    ReceptionDate,
    IssuerTaxId,
    IssuerName,
    VatAmount,
    OtherTaxAmount,
    Total,
}

pub const PENDING_FIELD_ALIASES: &[(PendingField, &[&str])] = &[
    (PendingField::DocumentType, DOCUMENT_TYPE_ALIASES),
    (PendingField::CufeOrCude, &["cufe/cude", "cufe", "cude"]),
    (PendingField::Folio, FOLIO_ALIASES),
    (PendingField::Prefix, PREFIX_ALIASES),
    (PendingField::IssueDate, &["fecha emisión", "fecha emision", "fecha_emision"]),
    (PendingField::ReceptionDate, &["fecha recepción", "fecha recepcion", "fecha_recepcion"]),
    (PendingField::IssuerTaxId, &["nit emisor", "nit_emisor", "nit"]),
    (PendingField::IssuerName, &["nombre emisor", "nombre_emisor", "emisor"]),
    (PendingField::VatAmount, &["iva"]),
    (PendingField::OtherTaxAmount, &["inc", "otros impuestos"]),
    (PendingField::Total, &["total"]),
];

/// Index of the first alias present in `headers`.
pub fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize(h)).collect();
    aliases
        .iter()
        .find_map(|alias| normalized.iter().position(|h| h == alias))
}

/// Resolved column index per pending field.
#[derive(Debug, Clone)]
pub struct PendingColumns {
    columns: Vec<(PendingField, Option<usize>)>,
}

impl PendingColumns {
    pub fn resolve(headers: &[String]) -> Self {
        Self {
            columns: PENDING_FIELD_ALIASES
                .iter()
                .map(|(field, aliases)| (*field, find_column(headers, aliases)))
                .collect(),
        }
    }

    pub fn index_of(&self, field: PendingField) -> Option<usize> {
        self.columns
            .iter()
            .find(|(f, _)| *f == field)
            .and_then(|(_, idx)| *idx)
    }

    /// Builds the pending record for one row; missing columns or blank cells map to `None`.
    pub fn map_row(&self, row: &[Option<String>], id: i64) -> PendingInvoiceRecord {
        let value = |field: PendingField| -> Option<String> {
            self.index_of(field)
                .and_then(|idx| row.get(idx))
                .and_then(|cell| cell.as_deref())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        PendingInvoiceRecord {
            id,
            document_type: value(PendingField::DocumentType),
            cufe_or_cude: value(PendingField::CufeOrCude),
            folio: value(PendingField::Folio),
            prefix: value(PendingField::Prefix),
            issue_date: value(PendingField::IssueDate),
            reception_date: value(PendingField::ReceptionDate),
            issuer_tax_id: value(PendingField::IssuerTaxId),
            issuer_name: value(PendingField::IssuerName),
            vat_amount: value(PendingField::VatAmount),
            other_tax_amount: value(PendingField::OtherTaxAmount),
            total: value(PendingField::Total),
        }
    }
}
