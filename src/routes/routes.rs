//! Defines routes for the file-share lifecycle.
//!
//! ## Structure
//! - **Share API**
//!   - `POST /api/upload-url` — phase 1: obtain a signed upload URL
//!   - `POST /api/files`      — phase 2: confirm upload, create share link
//!   - `POST /api/cleanup`    — reclaim expired files
//!
//! - **Public download**
//!   - `GET  /files/{share_id}` — stream a live shared file
//!
//! - **Blob upload target**
//!   - `PUT  /blobs/uploads/{id}` — signed direct upload of file bytes

use crate::{
    handlers::{
        blob_handlers::put_blob,
        file_handlers::{cleanup, create_file, download_file, request_upload_url},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Build and return the router for all routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Share API
        .route("/api/upload-url", post(request_upload_url))
        .route("/api/files", post(create_file))
        .route("/api/cleanup", post(cleanup))
        .route("/files/{share_id}", get(download_file))
        // Uploads are streamed to disk, so no body size cap here.
        .route(
            "/blobs/uploads/{id}",
            put(put_blob).layer(DefaultBodyLimit::disable()),
        )
}

/// Router with state attached, ready to serve.
pub fn app(state: AppState) -> Router {
    routes().with_state(state)
}
