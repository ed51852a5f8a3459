//! Core data models for the expiring file-share service.
//!
//! `FileRecord` maps to the `files` table via `sqlx::FromRow` and serializes
//! as JSON via `serde`.

pub mod file_record;
