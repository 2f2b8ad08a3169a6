//! API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use locdedup_pipeline::PipelineError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("{0}")]
    BadRequest(String),
}

/// Structured error body: `{"error": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Pipeline(e) => {
                let status = match e {
                    PipelineError::GroupNotFound(_) => StatusCode::NOT_FOUND,
                    PipelineError::InvalidStatus { .. } => StatusCode::CONFLICT,
                    PipelineError::CanonicalNotMember { .. }
                    | PipelineError::NoSuggestion(_) => StatusCode::BAD_REQUEST,
                    PipelineError::Database(_) | PipelineError::UnknownFkEdge { .. } => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };

        if status.is_server_error() {
            error!("request failed: {}", message);
        }

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err = ApiError::Pipeline(PipelineError::GroupNotFound(Uuid::nil()));
        assert_eq!(status_of(err), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_status_maps_to_409() {
        let err = ApiError::Pipeline(PipelineError::InvalidStatus {
            id: Uuid::nil(),
            status: locdedup::GroupStatus::Executed,
            operation: "unificação",
        });
        assert_eq!(status_of(err), StatusCode::CONFLICT);
    }

    #[test]
    fn test_precondition_maps_to_400() {
        let err = ApiError::Pipeline(PipelineError::CanonicalNotMember {
            id: Uuid::nil(),
            member: "x".to_string(),
        });
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
        let err = ApiError::Pipeline(PipelineError::NoSuggestion(Uuid::nil()));
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_database_maps_to_500() {
        let err = ApiError::Pipeline(PipelineError::Database(sqlx_row_not_found()));
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    fn sqlx_row_not_found() -> sqlx::Error {
        sqlx::Error::RowNotFound
    }

    #[test]
    fn test_bad_request_maps_to_400() {
        let err = ApiError::BadRequest("tipo inválido".to_string());
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    }
}
