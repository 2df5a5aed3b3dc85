use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::{
    middleware::error_handling::Result,
    models::reconciliation::{PushReport, ReconciliationReportResponse},
};

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    /// Import session whose candidates join the comparison.
    pub session: Option<Uuid>,
}

/// GET /api/reconciliation/report?session=
pub async fn report(
    State(state): State<AppState>,
    Query(params): Query<ReportQuery>,
) -> Result<Json<ReconciliationReportResponse>> {
    let report = state.engine.reconciliation_report(params.session).await?;

    let message = if report.is_consistent() {
        "All sources agree".to_string()
    } else {
        format!(
            "{} missing locally, {} missing in SharePoint, {} status mismatches, {} only in the spreadsheet",
            report.missing_locally.len(),
            report.missing_remotely.len(),
            report.status_mismatches.len(),
            report.spreadsheet_only.len()
        )
    };

    Ok(Json(ReconciliationReportResponse {
        success: true,
        message,
        report,
    }))
}

/// POST /api/reconciliation/push
pub async fn push(State(state): State<AppState>) -> Result<Json<PushReport>> {
    let report = state.engine.push_to_remote().await?;
    Ok(Json(report))
}
