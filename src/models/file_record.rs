//! Represents a shared file and its time-bounded validity window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Client-selectable lifetime of a share link.
///
/// The wire names (`"1h"`, `"1d"`, `"1w"`) are part of the public contract.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiration {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
}

impl Expiration {
    /// Offset added to the creation time to obtain `expires_at`.
    pub fn window(self) -> Duration {
        match self {
            Expiration::OneHour => Duration::hours(1),
            Expiration::OneDay => Duration::days(1),
            Expiration::OneWeek => Duration::days(7),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Expiration::OneHour => "1h",
            Expiration::OneDay => "1d",
            Expiration::OneWeek => "1w",
        }
    }
}

impl fmt::Display for Expiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A shared file.
///
/// Records are immutable once created: they are only ever inserted and
/// deleted. The `FileRecord` stores metadata, not the content bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Unpredictable public token embedded in share URLs.
    pub share_id: String,

    /// Storage-side filename.
    pub filename: String,

    /// User-facing filename, used in `Content-Disposition`.
    pub original_name: String,

    /// Client-declared content type.
    pub mime_type: String,

    /// Size in bytes.
    pub size: i64,

    /// Canonical blob locator (`/objects/uploads/<uuid>`).
    pub object_path: String,

    /// After this instant the record is logically gone.
    pub expires_at: DateTime<Utc>,

    /// When this record was created.
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// True once `now` is strictly past `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Fields supplied when creating a record. The store assigns `id`.
#[derive(Clone, Debug)]
pub struct NewFileRecord {
    pub share_id: String,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub object_path: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewFileRecord {
    /// Stamp `created_at = now` and derive `expires_at` from the selected window.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        share_id: String,
        filename: String,
        original_name: String,
        mime_type: String,
        size: i64,
        object_path: String,
        expiration: Expiration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            share_id,
            filename,
            original_name,
            mime_type,
            size,
            object_path,
            expires_at: now + expiration.window(),
            created_at: now,
        }
    }
}
