/// REST API handlers for DIAN spreadsheet imports

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::AppState;
use crate::{
    middleware::error_handling::{AppError, Result},
    models::import::{
        CandidatePage, CommitResponse, FilterRequest, ImportSessionResponse, RowsQuery, SelectRequest,
    },
    utils::sanitize_for_log,
};

/// POST /api/imports
/// Upload a CSV/Excel export and classify it against registered invoices.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ImportSessionResponse>> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Invalid multipart data: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(|s| s.to_string());
            file_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Failed to read file: {}", e)))?
                    .to_vec(),
            );
        }
    }

    let file_data = file_data.ok_or_else(|| AppError::InvalidInput("No file provided".to_string()))?;
    let filename = filename.ok_or_else(|| AppError::InvalidInput("No filename provided".to_string()))?;

    if file_data.len() > state.max_upload_bytes {
        return Err(AppError::InvalidInput(format!(
            "File too large. Maximum size is {}MB",
            state.max_upload_bytes / 1024 / 1024
        )));
    }

    tracing::info!(
        "📄 Import upload: {} ({} bytes)",
        sanitize_for_log(&filename),
        file_data.len()
    );

    let response = state.engine.start_import(&file_data, &filename).await?;
    Ok(Json(response))
}

/// GET /api/imports/:id/rows?offset=&limit=
pub async fn rows(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(params): Query<RowsQuery>,
) -> Result<Json<CandidatePage>> {
    let page = state.engine.view(session_id, params.offset, params.limit).await?;
    Ok(Json(page))
}

/// PUT /api/imports/:id/filters
/// Replaces all filters; an empty map clears them.
pub async fn set_filters(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<CandidatePage>> {
    let page = if request.filters.is_empty() {
        state.engine.clear_filters(session_id).await?
    } else {
        state.engine.replace_filters(session_id, &request.filters).await?
    };
    Ok(Json(page))
}

/// POST /api/imports/:id/select
pub async fn select(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SelectRequest>,
) -> Result<Json<CandidatePage>> {
    let page = state.engine.select(session_id, request).await?;
    Ok(Json(page))
}

/// DELETE /api/imports/:id/selection
pub async fn clear_selection(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<CandidatePage>> {
    let page = state.engine.clear_selection(session_id).await?;
    Ok(Json(page))
}

/// POST /api/imports/:id/commit
pub async fn commit(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<CommitResponse>> {
    let response = state.engine.commit(session_id).await?;
    Ok(Json(response))
}

/// DELETE /api/imports/:id
pub async fn discard(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.engine.discard(session_id)?;
    Ok(Json(json!({
        "success": true,
        "message": "Import session discarded"
    })))
}
