// ============================================================================
// Error Handling - Application-wide error type and JSON error responses
// ============================================================================
//
// Every handler returns `Result<T>`; failures are rendered as
//
//   { "success": false, "error": "<message>", "status": <code> }
//
// Database and JSON failures are logged in full with tracing::error! and
// replaced by a generic message. Remote failures keep a short description of
// which system failed, never the raw upstream body.
//
// ============================================================================

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

use crate::services::erp::SapError;
use crate::services::sharepoint::SharePointError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] JsonRejection),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The invoice exists but already carries a terminal decision.
    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Remote system unavailable: {0}")]
    RemoteUnavailable(String),

    /// A batch write failed as a whole; nothing from the batch was kept.
    #[error("Batch failed: {0}")]
    PartialBatchFailure(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SharePointError> for AppError {
    fn from(err: SharePointError) -> Self {
        match err {
            SharePointError::NotFound(what) => AppError::NotFound(what),
            SharePointError::InvalidRequest(msg) => AppError::BadRequest(msg),
            SharePointError::ConfigError(msg) => {
                tracing::error!("SharePoint configuration error: {}", msg);
                AppError::Internal(anyhow::anyhow!("SharePoint is not configured"))
            }
            other => {
                tracing::error!("SharePoint error: {:?}", other);
                AppError::RemoteUnavailable("SharePoint request failed".to_string())
            }
        }
    }
}

impl From<SapError> for AppError {
    fn from(err: SapError) -> Self {
        match err {
            SapError::ConfigError(msg) => AppError::BadRequest(msg),
            SapError::NotFound(what) => AppError::NotFound(what),
            other => {
                tracing::error!("SAP Service Layer error: {:?}", other);
                AppError::RemoteUnavailable("SAP Service Layer request failed".to_string())
            }
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) | AppError::PartialBatchFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Validation(_)
            | AppError::Json(_)
            | AppError::BadRequest(_)
            | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyProcessed(_) | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match self {
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                "Internal server error".to_string()
            }
            AppError::Validation(errors) => {
                // Messages come from the #[validate] attributes, not from user input.
                let first = errors
                    .field_errors()
                    .values()
                    .flat_map(|errs| errs.iter())
                    .find_map(|e| e.message.as_ref().map(|m| m.to_string()));
                first.unwrap_or_else(|| "Validation failed".to_string())
            }
            AppError::Json(_) => "Invalid JSON".to_string(),
            AppError::NotFound(msg) => msg,
            AppError::BadRequest(msg) => msg,
            AppError::InvalidInput(msg) => msg,
            AppError::AlreadyProcessed(msg) => msg,
            AppError::Conflict(msg) => msg,
            AppError::RemoteUnavailable(msg) => msg,
            AppError::PartialBatchFailure(msg) => msg,
            AppError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                "Internal server error".to_string()
            }
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::AlreadyProcessed("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::RemoteUnavailable("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::PartialBatchFailure("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_sharepoint_not_found_stays_not_found() {
        let err: AppError = SharePointError::NotFound("List 'Registro_de_Facturas'".into()).into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = SharePointError::RateLimitExceeded.into();
        assert!(matches!(err, AppError::RemoteUnavailable(_)));

        let err: AppError = SharePointError::InvalidRequest("page too deep".into()).into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = AppError::NotFound("Invoice not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Invoice not found");
        assert_eq!(body["status"], 404);
    }
}
