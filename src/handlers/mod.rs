pub mod listing;
pub mod update;
pub mod value;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::error::StoreError;
use crate::model::WireError;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    NotImplemented(String),
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Any body the JSON extractor refuses answers 400.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<WireError> for AppError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::UnknownKind(kind) => Self::NotImplemented(kind),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotImplemented(kind) => (
                StatusCode::NOT_IMPLEMENTED,
                format!("metric type '{kind}' is not supported"),
            ),
            Self::Store(e) => {
                let status = match &e {
                    StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    StoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                    StoreError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    StoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    StoreError::CorruptState(_) | StoreError::Io(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                warn!(error = %e, status = status.as_u16(), "store call failed");
                (status, e.to_string())
            }
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
