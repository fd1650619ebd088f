use crate::services::storage_service::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::AlreadyExists(_) => StatusCode::CONFLICT,
            StorageError::AccessDenied(_) => StatusCode::FORBIDDEN,
            StorageError::WriteTooLarge { .. }
            | StorageError::ShortWrite { .. }
            | StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            StorageError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            StorageError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
            StorageError::Metadata(_)
            | StorageError::Aborted
            | StorageError::Transport(_)
            | StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_statuses() {
        let cases = [
            (StorageError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (StorageError::AlreadyExists("b".into()), StatusCode::CONFLICT),
            (StorageError::InvalidKey("".into()), StatusCode::BAD_REQUEST),
            (
                StorageError::ShortWrite {
                    declared: 4,
                    written: 1,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                StorageError::Unsupported {
                    backend: "fs",
                    operation: "versions",
                },
                StatusCode::NOT_IMPLEMENTED,
            ),
            (
                StorageError::InvalidRange("start 9 is beyond object size 3".into()),
                StatusCode::RANGE_NOT_SATISFIABLE,
            ),
            (StorageError::Aborted, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
