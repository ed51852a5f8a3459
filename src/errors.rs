use crate::services::{blob_store::BlobError, share_service::ShareError};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Message returned for every not-found outcome, expired links included.
pub const FILE_NOT_FOUND: &str = "File not found";

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

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Map a core error onto HTTP. Server-side failures are logged here and
    /// reported to the client only as `internal_msg`.
    pub fn from_share(err: ShareError, internal_msg: &str) -> Self {
        match err {
            ShareError::Validation(msg) => Self::bad_request(msg),
            ShareError::Conflict(msg) => Self::new(StatusCode::CONFLICT, msg),
            ShareError::NotFound => Self::not_found(FILE_NOT_FOUND),
            ShareError::UpstreamStorage(_) | ShareError::Persistence(_) => {
                tracing::error!(error = %err, "{}", internal_msg);
                Self::internal(internal_msg)
            }
        }
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

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        AppError::from_share(err, "Internal server error")
    }
}

impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::UrlExpired | BlobError::InvalidSignature => {
                Self::new(StatusCode::FORBIDDEN, err.to_string())
            }
            BlobError::InvalidPath(_) => Self::bad_request(err.to_string()),
            BlobError::NotFound(_) => Self::not_found(err.to_string()),
            BlobError::AlreadyExists(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            BlobError::Io(_) | BlobError::SigningKey(_) => {
                tracing::error!(error = %err, "blob store I/O failure");
                Self::internal("Internal server error")
            }
        }
    }
}

/// Malformed or incomplete JSON bodies are validation errors.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::record_store::RecordError;

    #[test]
    fn share_errors_map_to_status_codes() {
        let v = AppError::from_share(ShareError::Validation("bad".into()), "ctx");
        assert_eq!(v.status, StatusCode::BAD_REQUEST);

        let nf = AppError::from(ShareError::NotFound);
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, FILE_NOT_FOUND);

        let db = AppError::from_share(
            ShareError::Persistence(RecordError::Sqlx(sqlx::Error::PoolClosed)),
            "Failed to save file",
        );
        assert_eq!(db.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(db.message, "Failed to save file");
    }

    #[test]
    fn signature_failures_are_forbidden() {
        assert_eq!(AppError::from(BlobError::UrlExpired).status, StatusCode::FORBIDDEN);
        assert_eq!(AppError::from(BlobError::InvalidSignature).status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn repeated_uploads_conflict() {
        let blob = AppError::from(BlobError::AlreadyExists("/objects/uploads/x".into()));
        assert_eq!(blob.status, StatusCode::CONFLICT);

        let share = AppError::from_share(ShareError::Conflict("taken".into()), "ctx");
        assert_eq!(share.status, StatusCode::CONFLICT);
        assert_eq!(share.message, "taken");

        let key = AppError::from(BlobError::SigningKey("bad".into()));
        assert_eq!(key.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
