//! Shared router state.

use crate::services::{blob_store::LocalBlobStore, share_service::ShareService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// The file lifecycle core.
    pub shares: ShareService,

    /// Local blob backend, for the signed upload endpoint.
    pub uploads: Arc<LocalBlobStore>,

    /// Base for share URLs when the request carries no `Host` header.
    pub public_url: String,
}

impl AppState {
    pub fn new(shares: ShareService, uploads: Arc<LocalBlobStore>, public_url: impl Into<String>) -> Self {
        Self {
            shares,
            uploads,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }
}
