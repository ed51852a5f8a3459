//! Anonymous file sharing with expiring links.
//!
//! Files are uploaded in two phases through signed URLs, registered under an
//! unpredictable share id, and reclaimed once their window (1 hour, 1 day or
//! 1 week) has passed.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
