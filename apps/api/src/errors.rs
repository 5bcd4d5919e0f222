use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::interview::engine::PipelineError;
use crate::interview::store::StoreError;
use crate::pdf::ExtractionError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// Every error body has the shape `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Extraction(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            // Pipeline failures keep the success status; clients inspect the payload.
            AppError::Pipeline(e) => {
                match e {
                    PipelineError::Stage(stage_err) => {
                        tracing::warn!(stage = %stage_err.stage(), "Pipeline error: {e}")
                    }
                    _ => tracing::warn!("Pipeline error: {e}"),
                }
                (StatusCode::OK, e.to_string())
            }
            AppError::Store(e) => {
                tracing::error!("Session store error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A session storage error occurred".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_extraction_error_is_bad_request() {
        let response =
            AppError::from(ExtractionError::NotPdf("cv.docx".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("cv.docx"));
    }

    #[tokio::test]
    async fn test_pipeline_error_keeps_success_status() {
        let response = AppError::from(PipelineError::NoQuestionsAvailable).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"error": "No questions available"}));
    }
}
