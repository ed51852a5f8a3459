//! File lifecycle services: blob adapter, record store, upload coordination,
//! share resolution and reclamation.

pub mod blob_store;
pub mod record_store;
pub mod share_service;
pub mod sweeper;
