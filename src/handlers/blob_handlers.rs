//! Signed upload endpoint: the target of the URLs issued in phase 1.
//!
//! `PUT /blobs/uploads/{id}?expires=<unix>&signature=<hex>` streams the request
//! body straight to the blob store without buffering it in memory.

use crate::{errors::AppError, services::blob_store::BlobError, state::AppState};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SignedUploadQuery {
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct SignedUploadResp {
    pub size: u64,
}

/// `PUT /blobs/uploads/{id}`
pub async fn put_blob(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<SignedUploadQuery>,
    body: Body,
) -> Result<Json<SignedUploadResp>, AppError> {
    let id = Uuid::parse_str(&id).map_err(|_| BlobError::InvalidPath(id.clone()))?;
    state
        .uploads
        .verify_upload(&id, q.expires, &q.signature, Utc::now())?;

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));
    let size = state.uploads.write_stream(&id, stream).await?;

    tracing::debug!(blob = %id, size, "accepted signed upload");
    Ok(Json(SignedUploadResp { size }))
}
