//! src/services/blob_store.rs
//!
//! Blob Store Adapter, a capability interface over opaque object storage
//! addressed by path, plus `LocalBlobStore`, which keeps payloads on local disk
//! sharded beneath `base_path/uploads/{shard}/{shard}/{id}` and hands out
//! HMAC-signed, time-limited upload URLs.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::{Stream, StreamExt, pin_mut, stream::BoxStream};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of every canonical object path handed to the record store.
pub const OBJECT_PATH_PREFIX: &str = "/objects/uploads/";

/// Path prefix of the externally reachable signed upload endpoint.
pub const UPLOAD_ROUTE_PREFIX: &str = "/blobs/uploads/";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid object path `{0}`")]
    InvalidPath(String),
    #[error("upload URL expired")]
    UrlExpired,
    #[error("invalid upload signature")]
    InvalidSignature,
    #[error("blob `{0}` already uploaded")]
    AlreadyExists(String),
    #[error("invalid signing key: {0}")]
    SigningKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Canonical object path for a fresh, unpredictable blob.
pub fn new_object_path() -> String {
    format!("{}{}", OBJECT_PATH_PREFIX, Uuid::new_v4())
}

/// An open blob ready to be streamed out.
pub struct BlobReader {
    /// Byte length when the backend knows it up front.
    pub len: Option<u64>,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

/// Capability-based blob storage. Knows nothing about shares or expiry.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Issue a time-limited URL the client can `PUT` bytes to.
    async fn issue_upload_url(&self, object_path: &str) -> BlobResult<String>;

    /// Translate an external upload URL (or an already canonical path) into
    /// the canonical `/objects/uploads/<id>` form.
    fn normalize_object_path(&self, raw: &str) -> BlobResult<String>;

    async fn open_read_stream(&self, object_path: &str) -> BlobResult<BlobReader>;

    /// Byte length of a stored blob.
    async fn stat(&self, object_path: &str) -> BlobResult<u64>;

    /// Remove a blob. Deleting a missing blob is not an error.
    async fn delete(&self, object_path: &str) -> BlobResult<()>;

    /// Canonical paths of blobs last written before `cutoff`.
    async fn list_older_than(&self, cutoff: DateTime<Utc>) -> BlobResult<Vec<String>>;

    async fn health_check(&self) -> BlobResult<()>;
}

/// Local-disk blob store with signed upload URLs.
#[derive(Clone)]
pub struct LocalBlobStore {
    /// Root directory for blob payloads.
    base_path: PathBuf,

    /// External base URL upload links are built on (no trailing slash).
    public_url: String,

    secret: Vec<u8>,

    upload_ttl: Duration,
}

impl LocalBlobStore {
    pub fn new(
        base_path: impl Into<PathBuf>,
        public_url: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        upload_ttl: Duration,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            upload_ttl,
        }
    }

    /// Extract the blob id from a canonical path, rejecting anything else.
    fn blob_id(object_path: &str) -> BlobResult<Uuid> {
        object_path
            .strip_prefix(OBJECT_PATH_PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| BlobError::InvalidPath(object_path.to_string()))
    }

    /// Two-level shard directories from MD5(id), `00`–`ff` each.
    fn shards(id: &Uuid) -> (String, String) {
        let digest = md5::compute(id.to_string());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn uploads_root(&self) -> PathBuf {
        self.base_path.join("uploads")
    }

    fn file_path(&self, id: &Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(id);
        let mut path = self.uploads_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(id.to_string());
        path
    }

    /// MAC over the method, blob id and expiry of an upload URL.
    fn upload_mac(&self, id: &Uuid, expires: i64) -> BlobResult<HmacSha256> {
        let msg = format!("PUT\n/uploads/{}\n{}", id, expires);
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| BlobError::SigningKey(err.to_string()))?;
        mac.update(msg.as_bytes());
        Ok(mac)
    }

    fn sign(&self, id: &Uuid, expires: i64) -> BlobResult<String> {
        Ok(hex::encode(self.upload_mac(id, expires)?.finalize().into_bytes()))
    }

    /// Verify an upload URL's signature and expiry.
    pub fn verify_upload(
        &self,
        id: &Uuid,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> BlobResult<()> {
        if now.timestamp() > expires {
            return Err(BlobError::UrlExpired);
        }
        let provided = hex::decode(signature).map_err(|_| BlobError::InvalidSignature)?;
        self.upload_mac(id, expires)?
            .verify_slice(&provided)
            .map_err(|_| BlobError::InvalidSignature)
    }

    /// Stream a blob to disk and return the number of bytes written.
    ///
    /// Bytes go to a temporary file which is fsynced and then linked into
    /// the final location. A blob is written at most once: if the final path
    /// already exists the upload fails with `AlreadyExists` and the stored
    /// bytes are left untouched. Temp files are removed on every path.
    pub async fn write_stream<S>(&self, id: &Uuid, stream: S) -> BlobResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let file_path = self.file_path(id);
        if fs::try_exists(&file_path).await? {
            return Err(BlobError::AlreadyExists(format!("{}{}", OBJECT_PATH_PREFIX, id)));
        }
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut written: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BlobError::Io(err));
                }
            };
            written += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BlobError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        // hard_link never replaces an existing file, unlike rename.
        let linked = fs::hard_link(&tmp_path, &file_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match linked {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(BlobError::AlreadyExists(format!("{}{}", OBJECT_PATH_PREFIX, id)));
            }
            Err(err) => return Err(BlobError::Io(err)),
        }

        debug!(blob = %id, bytes = written, "stored blob");
        Ok(written)
    }

    /// Remove empty shard directories up to the uploads root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.uploads_root();
        let mut current = start.to_path_buf();
        while current.starts_with(&stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn issue_upload_url(&self, object_path: &str) -> BlobResult<String> {
        let id = Self::blob_id(object_path)?;
        let expires = (Utc::now() + self.upload_ttl).timestamp();
        let signature = self.sign(&id, expires)?;
        Ok(format!(
            "{}{}{}?expires={}&signature={}",
            self.public_url, UPLOAD_ROUTE_PREFIX, id, expires, signature
        ))
    }

    fn normalize_object_path(&self, raw: &str) -> BlobResult<String> {
        let raw = raw.trim();
        // Drop `scheme://host` so any origin the URL was issued under maps.
        let path = match raw.find("://") {
            Some(pos) => {
                let rest = &raw[pos + 3..];
                rest.find('/').map(|slash| &rest[slash..]).unwrap_or("")
            }
            None => raw,
        };
        let path = path.split(['?', '#']).next().unwrap_or("");

        let id = path
            .strip_prefix(UPLOAD_ROUTE_PREFIX)
            .or_else(|| path.strip_prefix(OBJECT_PATH_PREFIX))
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| BlobError::InvalidPath(raw.to_string()))?;

        Ok(format!("{}{}", OBJECT_PATH_PREFIX, id))
    }

    async fn open_read_stream(&self, object_path: &str) -> BlobResult<BlobReader> {
        let id = Self::blob_id(object_path)?;
        let file = File::open(self.file_path(&id)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(object_path.to_string())
            } else {
                BlobError::Io(err)
            }
        })?;
        let len = file.metadata().await.ok().map(|m| m.len());

        Ok(BlobReader {
            len,
            stream: ReaderStream::new(file).boxed(),
        })
    }

    async fn stat(&self, object_path: &str) -> BlobResult<u64> {
        let id = Self::blob_id(object_path)?;
        match fs::metadata(self.file_path(&id)).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(BlobError::NotFound(object_path.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BlobError::NotFound(object_path.to_string()))
            }
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    async fn delete(&self, object_path: &str) -> BlobResult<()> {
        let id = Self::blob_id(object_path)?;
        let file_path = self.file_path(&id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
            }
            Err(err) => return Err(BlobError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn list_older_than(&self, cutoff: DateTime<Utc>) -> BlobResult<Vec<String>> {
        let mut found = Vec::new();
        let mut dirs = vec![(self.uploads_root(), 0usize)];

        // uploads/{aa}/{bb}/{id}: blobs sit exactly two levels below the root.
        while let Some((dir, depth)) = dirs.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(BlobError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if depth < 2 {
                    if meta.is_dir() {
                        dirs.push((entry.path(), depth + 1));
                    }
                    continue;
                }
                let Some(id) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| Uuid::parse_str(name).ok())
                else {
                    continue;
                };
                let modified: DateTime<Utc> = meta.modified()?.into();
                if meta.is_file() && modified < cutoff {
                    found.push(format!("{}{}", OBJECT_PATH_PREFIX, id));
                }
            }
        }

        Ok(found)
    }

    async fn health_check(&self) -> BlobResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read? != b"readyz" {
            return Err(BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "probe content mismatch",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LocalBlobStore {
        LocalBlobStore::new(
            dir.path(),
            "http://files.test/",
            b"test-secret".to_vec(),
            Duration::minutes(15),
        )
    }

    fn parse_query(url: &str) -> (i64, String) {
        let query = url.split('?').nth(1).unwrap();
        let mut expires = 0;
        let mut signature = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "signature" => signature = v.to_string(),
                _ => {}
            }
        }
        (expires, signature)
    }

    async fn collect(reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stream = reader.stream;
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn upload_url_round_trips_through_normalize_and_verify() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);
        let path = new_object_path();

        let url = blobs.issue_upload_url(&path).await.unwrap();
        assert!(url.starts_with("http://files.test/blobs/uploads/"));
        assert_eq!(blobs.normalize_object_path(&url).unwrap(), path);

        let id = LocalBlobStore::blob_id(&path).unwrap();
        let (expires, signature) = parse_query(&url);
        assert!(blobs.verify_upload(&id, expires, &signature, Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn verify_rejects_tampering_and_expiry() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);
        let path = new_object_path();
        let url = blobs.issue_upload_url(&path).await.unwrap();
        let (expires, signature) = parse_query(&url);
        let id = LocalBlobStore::blob_id(&path).unwrap();

        let other = Uuid::new_v4();
        assert!(matches!(
            blobs.verify_upload(&other, expires, &signature, Utc::now()),
            Err(BlobError::InvalidSignature)
        ));
        assert!(matches!(
            blobs.verify_upload(&id, expires + 60, &signature, Utc::now()),
            Err(BlobError::InvalidSignature)
        ));
        assert!(matches!(
            blobs.verify_upload(&id, expires, "zz-not-hex", Utc::now()),
            Err(BlobError::InvalidSignature)
        ));
        let later = Utc::now() + Duration::hours(1);
        assert!(matches!(
            blobs.verify_upload(&id, expires, &signature, later),
            Err(BlobError::UrlExpired)
        ));
    }

    #[test]
    fn normalize_rejects_foreign_paths() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        assert!(blobs.normalize_object_path("/objects/uploads/../../etc/passwd").is_err());
        assert!(blobs.normalize_object_path("https://evil.test/other/123").is_err());
        assert!(blobs.normalize_object_path("").is_err());

        let id = Uuid::new_v4();
        let canonical = format!("/objects/uploads/{id}");
        assert_eq!(blobs.normalize_object_path(&canonical).unwrap(), canonical);
        let other_host = format!("https://cdn.example.com/blobs/uploads/{id}?expires=1");
        assert_eq!(blobs.normalize_object_path(&other_host).unwrap(), canonical);
    }

    #[tokio::test]
    async fn write_read_delete() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);
        let path = new_object_path();
        let id = LocalBlobStore::blob_id(&path).unwrap();

        let chunks = vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))];
        let written = blobs.write_stream(&id, stream::iter(chunks)).await.unwrap();
        assert_eq!(written, 11);

        let reader = blobs.open_read_stream(&path).await.unwrap();
        assert_eq!(reader.len, Some(11));
        assert_eq!(collect(reader).await, b"hello world");

        blobs.delete(&path).await.unwrap();
        assert!(matches!(
            blobs.open_read_stream(&path).await,
            Err(BlobError::NotFound(_))
        ));
        // second delete is a no-op
        blobs.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn stored_blob_cannot_be_overwritten() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);
        let path = new_object_path();
        let id = LocalBlobStore::blob_id(&path).unwrap();

        blobs
            .write_stream(&id, stream::iter(vec![Ok(Bytes::from_static(b"original"))]))
            .await
            .unwrap();
        let err = blobs
            .write_stream(&id, stream::iter(vec![Ok(Bytes::from_static(b"replaced!"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::AlreadyExists(ref p) if *p == path));

        assert_eq!(blobs.stat(&path).await.unwrap(), 8);
        let reader = blobs.open_read_stream(&path).await.unwrap();
        assert_eq!(collect(reader).await, b"original");
        // no temp files left behind next to the blob
        let shard = blobs.file_path(&id).parent().unwrap().to_path_buf();
        assert_eq!(std::fs::read_dir(shard).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn stat_reports_length_or_not_found() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);
        let path = new_object_path();
        assert!(matches!(blobs.stat(&path).await, Err(BlobError::NotFound(_))));

        let id = LocalBlobStore::blob_id(&path).unwrap();
        blobs
            .write_stream(&id, stream::iter(vec![Ok(Bytes::from_static(b"abc"))]))
            .await
            .unwrap();
        assert_eq!(blobs.stat(&path).await.unwrap(), 3);
        assert!(matches!(
            blobs.stat("/etc/passwd").await,
            Err(BlobError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn empty_signing_key_is_accepted() {
        let temp = TempDir::new().unwrap();
        let blobs = LocalBlobStore::new(temp.path(), "http://files.test", Vec::new(), Duration::minutes(1));
        let url = blobs.issue_upload_url(&new_object_path()).await.unwrap();
        let (expires, signature) = parse_query(&url);
        let id = LocalBlobStore::blob_id(&blobs.normalize_object_path(&url).unwrap()).unwrap();
        assert!(blobs.verify_upload(&id, expires, &signature, Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_blob() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);
        let path = new_object_path();
        let id = LocalBlobStore::blob_id(&path).unwrap();

        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::BrokenPipe, "client went away")),
        ];
        assert!(blobs.write_stream(&id, stream::iter(chunks)).await.is_err());
        assert!(blobs.list_older_than(Utc::now() + Duration::hours(1)).await.unwrap().is_empty());
        assert!(matches!(
            blobs.open_read_stream(&path).await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_older_than_respects_cutoff() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);
        let path = new_object_path();
        let id = LocalBlobStore::blob_id(&path).unwrap();
        blobs
            .write_stream(&id, stream::iter(vec![Ok(Bytes::from_static(b"x"))]))
            .await
            .unwrap();

        let past = Utc::now() - Duration::hours(1);
        assert!(blobs.list_older_than(past).await.unwrap().is_empty());

        let future = Utc::now() + Duration::hours(1);
        assert_eq!(blobs.list_older_than(future).await.unwrap(), vec![path]);
    }

    #[tokio::test]
    async fn health_check_probes_disk() {
        let temp = TempDir::new().unwrap();
        assert!(store(&temp).health_check().await.is_ok());
    }
}
