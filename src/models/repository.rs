//! Repository metadata and request DTOs.
//!
//! - `GitRepository`: sidecar record stored as `aiplan.json` in each bare repo
//! - `CreateRepositoryRequest`: body of the create endpoint
//! - `UpdateRepositoryRequest`: mutable fields accepted by the update endpoint

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default branch for new repositories when the caller does not pick one.
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepository {
    pub name: String,
    pub workspace: String,
    pub private: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub branch: String,
    /// On-disk location, filled in by the store on load. Never serialized.
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRepositoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub private: bool,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRepositoryRequest {
    pub description: Option<String>,
    pub private: Option<bool>,
    pub branch: Option<String>,
}
