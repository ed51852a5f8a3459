//! src/services/share_service.rs
//!
//! ShareService, the file lifecycle core. Coordinates the two-phase upload
//! (issue a write URL, then confirm and materialize a record) and resolves
//! public share ids back to live blobs. Reclamation lives in `sweeper.rs`.
//!
//! Every time-dependent operation has an `*_at` variant that takes `now`
//! explicitly; the plain variants use `Utc::now()`.

use crate::{
    models::file_record::{Expiration, FileRecord, NewFileRecord},
    services::{
        blob_store::{BlobError, BlobReader, BlobStore, new_object_path},
        record_store::{FileRecordStore, RecordError},
    },
};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Attempts at creating a record before giving up on share-id collisions.
const SHARE_ID_ATTEMPTS: usize = 3;

/// Random bytes per share id (hex-encoded to twice as many characters).
const SHARE_ID_BYTES: usize = 16;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("validation failed: {0}")]
    Validation(String),
    /// The upload is already registered under another share id.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Unknown, expired, or blob missing.
    #[error("file not found")]
    NotFound,
    #[error("blob store failure: {0}")]
    UpstreamStorage(#[from] BlobError),
    #[error("record store failure: {0}")]
    Persistence(#[from] RecordError),
}

pub type ShareResult<T> = Result<T, ShareError>;

/// Phase 1 input: what the client intends to upload.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub expiration: Expiration,
}

/// Phase 2 input: the finished upload to register.
#[derive(Clone, Debug)]
pub struct ConfirmUpload {
    /// Upload URL from phase 1, or an already canonical object path.
    pub object_path: String,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub expiration: Expiration,
}

/// A live record together with its opened blob.
pub struct ResolvedFile {
    pub record: FileRecord,
    pub blob: BlobReader,
}

#[derive(Clone)]
pub struct ShareService {
    pub records: Arc<dyn FileRecordStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl ShareService {
    pub fn new(records: Arc<dyn FileRecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { records, blobs }
    }

    /// Phase 1: validate the declared upload and issue a write URL scoped to
    /// a fresh blob path. No record is created.
    pub async fn request_upload(&self, req: &UploadRequest) -> ShareResult<String> {
        require_non_empty("filename", &req.filename)?;
        require_non_empty("mimeType", &req.mime_type)?;
        require_positive_size(req.size)?;

        let object_path = new_object_path();
        let url = self.blobs.issue_upload_url(&object_path).await?;
        debug!(object_path = %object_path, expiration = %req.expiration, "issued upload URL");
        Ok(url)
    }

    /// Phase 2: register a completed upload.
    pub async fn confirm_upload(&self, req: ConfirmUpload) -> ShareResult<FileRecord> {
        self.confirm_upload_at(req, Utc::now()).await
    }

    pub async fn confirm_upload_at(
        &self,
        req: ConfirmUpload,
        now: DateTime<Utc>,
    ) -> ShareResult<FileRecord> {
        require_non_empty("objectPath", &req.object_path)?;
        require_non_empty("filename", &req.filename)?;
        require_non_empty("originalName", &req.original_name)?;
        require_non_empty("mimeType", &req.mime_type)?;
        require_positive_size(req.size)?;

        let object_path = self
            .blobs
            .normalize_object_path(&req.object_path)
            .map_err(|err| ShareError::Validation(err.to_string()))?;

        // The record must describe bytes that actually arrived.
        match self.blobs.stat(&object_path).await {
            Ok(len) if len as i64 == req.size => {}
            Ok(len) => {
                return Err(ShareError::Validation(format!(
                    "`size` is {} but {} bytes were uploaded",
                    req.size, len
                )));
            }
            Err(BlobError::NotFound(_)) => {
                return Err(ShareError::Validation(
                    "no upload found for `objectPath`".into(),
                ));
            }
            Err(err) => return Err(err.into()),
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let new = NewFileRecord::new(
                generate_share_id(),
                req.filename.clone(),
                req.original_name.clone(),
                req.mime_type.clone(),
                req.size,
                object_path.clone(),
                req.expiration,
                now,
            );
            match self.records.create(new).await {
                Ok(record) => {
                    info!(
                        share_id = %record.share_id,
                        expires_at = %record.expires_at,
                        size = record.size,
                        "registered shared file"
                    );
                    return Ok(record);
                }
                Err(RecordError::DuplicateShareId(id)) if attempt < SHARE_ID_ATTEMPTS => {
                    warn!(share_id = %id, attempt, "share id collision, regenerating");
                }
                Err(RecordError::ObjectPathClaimed(path)) => {
                    return Err(ShareError::Conflict(format!(
                        "upload `{path}` is already shared"
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Resolve a share id to a live file.
    pub async fn resolve(&self, share_id: &str) -> ShareResult<ResolvedFile> {
        self.resolve_at(share_id, Utc::now()).await
    }

    /// Unknown and expired ids are indistinguishable to the caller. An expired
    /// hit is reclaimed on the spot; a live record whose blob is gone is
    /// reported as not found.
    pub async fn resolve_at(&self, share_id: &str, now: DateTime<Utc>) -> ShareResult<ResolvedFile> {
        let record = self
            .records
            .get_by_share_id(share_id)
            .await?
            .ok_or(ShareError::NotFound)?;

        if record.is_expired(now) {
            self.reclaim_lazily(&record).await;
            return Err(ShareError::NotFound);
        }

        match self.blobs.open_read_stream(&record.object_path).await {
            Ok(blob) => Ok(ResolvedFile { record, blob }),
            Err(BlobError::NotFound(_)) => {
                warn!(share_id = %record.share_id, object_path = %record.object_path, "live record has no blob");
                Err(ShareError::NotFound)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Blob first, then record. If the blob delete fails the record is kept
    /// so the sweeper retries the pair later.
    async fn reclaim_lazily(&self, record: &FileRecord) {
        if let Err(err) = self.blobs.delete(&record.object_path).await {
            warn!(share_id = %record.share_id, error = %err, "lazy reclamation: blob delete failed");
            return;
        }
        match self.records.delete(record.id).await {
            Ok(()) => debug!(share_id = %record.share_id, "lazily reclaimed expired file"),
            Err(err) => {
                warn!(share_id = %record.share_id, error = %err, "lazy reclamation: record delete failed")
            }
        }
    }
}

/// 128 bits from the OS CSPRNG, hex-encoded.
pub fn generate_share_id() -> String {
    let mut bytes = [0u8; SHARE_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn require_non_empty(field: &str, value: &str) -> ShareResult<()> {
    if value.trim().is_empty() {
        return Err(ShareError::Validation(format!("`{field}` must not be empty")));
    }
    Ok(())
}

fn require_positive_size(size: i64) -> ShareResult<()> {
    if size <= 0 {
        return Err(ShareError::Validation("`size` must be positive".into()));
    }
    Ok(())
}
