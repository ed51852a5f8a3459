//! HTTP handlers for the share lifecycle.
//!
//! - `POST /api/upload-url`  — phase 1, returns a signed write URL
//! - `POST /api/files`       — phase 2, registers the upload, returns a share URL
//! - `GET  /files/{shareId}` — streams a live file as an attachment
//! - `POST /api/cleanup`     — runs one reclamation pass

use crate::{
    errors::AppError,
    models::file_record::Expiration,
    services::share_service::{ConfirmUpload, UploadRequest},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlReq {
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub expiration: Expiration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResp {
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileReq {
    pub object_path: String,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub expiration: Expiration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileResp {
    pub id: Uuid,
    pub share_id: String,
    pub share_url: String,
    pub filename: String,
    pub size: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResp {
    pub cleaned: usize,
}

/// `POST /api/upload-url`
pub async fn request_upload_url(
    State(state): State<AppState>,
    payload: Result<Json<UploadUrlReq>, JsonRejection>,
) -> Result<Json<UploadUrlResp>, AppError> {
    let Json(req) = payload?;
    let upload_url = state
        .shares
        .request_upload(&UploadRequest {
            filename: req.filename,
            mime_type: req.mime_type,
            size: req.size,
            expiration: req.expiration,
        })
        .await
        .map_err(|err| AppError::from_share(err, "Failed to get upload URL"))?;

    Ok(Json(UploadUrlResp { upload_url }))
}

/// `POST /api/files`
pub async fn create_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateFileReq>, JsonRejection>,
) -> Result<Json<CreateFileResp>, AppError> {
    let Json(req) = payload?;
    let record = state
        .shares
        .confirm_upload(ConfirmUpload {
            object_path: req.object_path,
            filename: req.filename,
            original_name: req.original_name,
            mime_type: req.mime_type,
            size: req.size,
            expiration: req.expiration,
        })
        .await
        .map_err(|err| AppError::from_share(err, "Failed to save file"))?;

    let share_url = format!(
        "{}/files/{}",
        request_base_url(&headers, &state.public_url),
        record.share_id
    );

    Ok(Json(CreateFileResp {
        id: record.id,
        share_id: record.share_id,
        share_url,
        filename: record.original_name,
        size: record.size,
        expires_at: record.expires_at,
    }))
}

/// `GET /files/{shareId}`
pub async fn download_file(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> Result<Response, AppError> {
    let file = state.shares.resolve(&share_id).await?;

    let mut response = Response::new(Body::from_stream(file.blob.stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.record.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&file.record.original_name),
    );
    if let Some(len) = file.blob.len {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    Ok(response)
}

/// `POST /api/cleanup`
pub async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupResp>, AppError> {
    let report = state
        .shares
        .sweep_expired()
        .await
        .map_err(|err| AppError::from_share(err, "Cleanup failed"))?;

    if report.failed > 0 {
        tracing::warn!(
            cleaned = report.cleaned,
            failed = report.failed,
            "cleanup finished with failures"
        );
    }
    Ok(Json(CleanupResp {
        cleaned: report.cleaned,
    }))
}

/// `scheme://host` of the current request, honouring `X-Forwarded-Proto`.
fn request_base_url(headers: &HeaderMap, fallback: &str) -> String {
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return fallback.to_string();
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

/// `attachment; filename="<name>"` with quotes escaped and control bytes dropped.
fn content_disposition(name: &str) -> HeaderValue {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars().filter(|c| !c.is_control()) {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    HeaderValue::from_bytes(format!("attachment; filename=\"{}\"", escaped).as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
