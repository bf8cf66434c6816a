//! Data transfer objects and persisted records.
//!
//! - `repository`: GitRepository sidecar record, create/update request bodies

pub mod repository;

pub use repository::*;
