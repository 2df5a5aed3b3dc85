use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

// ============================================================================
// Approval lifecycle
// ============================================================================

/// Approval state of an invoice as seen by the responsible party (doliente).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    #[serde(rename = "Por Aprobar")]
    PorAprobar,
    Aprobado,
    Rechazado,
}

impl ApprovalStatus {
    pub const PENDING_LABEL: &'static str = "Por Aprobar";

    /// Anything that is not a terminal label counts as pending.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(|l| l.trim().to_lowercase()).as_deref() {
            Some("aprobado") => ApprovalStatus::Aprobado,
            Some("rechazado") => ApprovalStatus::Rechazado,
            _ => ApprovalStatus::PorAprobar,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::PorAprobar)
    }

    /// The decision that produced this state, if any.
    pub fn decision(&self) -> Option<ApprovalAction> {
        match self {
            ApprovalStatus::PorAprobar => None,
            ApprovalStatus::Aprobado => Some(ApprovalAction::Aprobado),
            ApprovalStatus::Rechazado => Some(ApprovalAction::Rechazado),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::PorAprobar => Self::PENDING_LABEL,
            ApprovalStatus::Aprobado => "Aprobado",
            ApprovalStatus::Rechazado => "Rechazado",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision taken on a pending invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalAction {
    Aprobado,
    Rechazado,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Aprobado => "Aprobado",
            ApprovalAction::Rechazado => "Rechazado",
        }
    }

    /// Value written to the remote list's accounting column.
    pub fn remote_accounting_label(&self) -> &'static str {
        match self {
            ApprovalAction::Aprobado => "Procesado",
            ApprovalAction::Rechazado => "Rechazado",
        }
    }

    pub fn target_status(&self) -> ApprovalStatus {
        match self {
            ApprovalAction::Aprobado => ApprovalStatus::Aprobado,
            ApprovalAction::Rechazado => ApprovalStatus::Rechazado,
        }
    }
}

impl FromStr for ApprovalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Aprobado" => Ok(ApprovalAction::Aprobado),
            "Rechazado" => Ok(ApprovalAction::Rechazado),
            other => Err(format!("Invalid action '{}'", other)),
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Row of `registro_facturas`, the local system of record for UI reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: i64,
    pub tax_id: Option<String>,
    pub provider_name: Option<String>,
    pub invoice_number: String,
    pub total_value: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub approval_status: Option<String>,
    pub accounting_status: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed: bool,
    pub responsible_party: Option<String>,
    pub cufe: Option<String>,
    pub observations: Option<String>,
    pub cost_center: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl InvoiceRecord {
    pub fn approval_state(&self) -> ApprovalStatus {
        ApprovalStatus::from_label(self.approval_status.as_deref())
    }

    pub fn total_amount(&self) -> Option<Decimal> {
        self.total_value.as_deref().and_then(parse_lenient_amount)
    }
}

/// Values pushed into `registro_facturas` by a sync. `id` is only used when
/// the invoice number does not exist yet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvoiceUpsert {
    pub id: i64,
    pub tax_id: Option<String>,
    pub provider_name: Option<String>,
    pub invoice_number: String,
    pub total_value: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub approval_status: Option<String>,
    pub accounting_status: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed: bool,
    pub responsible_party: Option<String>,
    pub cufe: Option<String>,
    pub observations: Option<String>,
    pub cost_center: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Row of `facturas_pendientes`: an invoice seen in a spreadsheet but not yet
/// registered anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PendingInvoiceRecord {
    pub id: i64,
    pub document_type: Option<String>,
    pub cufe_or_cude: Option<String>,
    pub folio: Option<String>,
    pub prefix: Option<String>,
    pub issue_date: Option<String>,
    pub reception_date: Option<String>,
    pub issuer_tax_id: Option<String>,
    pub issuer_name: Option<String>,
    pub vat_amount: Option<String>,
    pub other_tax_amount: Option<String>,
    pub total: Option<String>,
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct ApprovalActionRequest {
    #[serde(default, deserialize_with = "deserialize_flexible_id")]
    #[validate(required(message = "Missing invoice id"), range(min = 1, message = "Invalid invoice id"))]
    pub id: Option<i64>,
    #[validate(required(message = "Missing action"), length(min = 1, message = "Missing action"))]
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub invoice: InvoiceRecord,
    pub status: ApprovalStatus,
    pub total_amount: Option<Decimal>,
}

impl From<InvoiceRecord> for InvoiceResponse {
    fn from(invoice: InvoiceRecord) -> Self {
        Self {
            status: invoice.approval_state(),
            total_amount: invoice.total_amount(),
            invoice,
        }
    }
}

/// Accepts the id either as a JSON number or as a numeric string.
fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Number(n)) => Ok(Some(n)),
        Some(RawId::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(RawId::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom("id must be numeric")),
    }
}

/// Parses free-text totals such as `1.234.567,89`, `1,234,567.89` or `$ 950000`.
/// The last separator followed by one or two digits is taken as the decimal mark.
pub fn parse_lenient_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_sep = cleaned.rfind(|c| c == '.' || c == ',');
    let normalized = match last_sep {
        Some(pos) if cleaned.len() - pos - 1 <= 2 && cleaned.len() - pos - 1 > 0 => {
            let (int_part, frac_part) = cleaned.split_at(pos);
            let int_digits: String = int_part.chars().filter(|c| *c != '.' && *c != ',').collect();
            format!("{}.{}", int_digits, &frac_part[1..])
        }
        _ => cleaned.chars().filter(|c| *c != '.' && *c != ',').collect(),
    };

    Decimal::from_str(&normalized).ok()
}
