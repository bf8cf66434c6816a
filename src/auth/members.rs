//! JSON members file standing in for the user/workspace database.
//!
//! ```json
//! {
//!   "users": [
//!     { "id": "6f1c...", "name": "alice", "keys": ["ssh-ed25519 AAAA... alice@laptop"] }
//!   ],
//!   "workspaces": {
//!     "acme": { "6f1c...": "write" }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use super::{Principal, Role, WorkspaceDirectory};
use crate::error::Result;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MembersFile {
    #[serde(default)]
    users: Vec<UserEntry>,
    /// workspace slug -> user id -> role
    #[serde(default)]
    workspaces: HashMap<String, HashMap<String, Role>>,
}

#[derive(Debug, Clone, Deserialize)]
struct UserEntry {
    id: String,
    name: String,
    #[serde(default)]
    keys: Vec<String>,
}

impl MembersFile {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read members file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("failed to parse members file {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let members: Self = serde_json::from_str(contents)?;
        tracing::info!(
            users = members.users.len(),
            workspaces = members.workspaces.len(),
            "loaded workspace members"
        );
        Ok(members)
    }
}

/// Extract the base64 blob from an authorized_keys style line.
fn key_blob(line: &str) -> Option<&str> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    if first.starts_with("ssh-") || first.starts_with("ecdsa-") || first.starts_with("sk-") {
        parts.next()
    } else {
        Some(first)
    }
}

#[async_trait]
impl WorkspaceDirectory for MembersFile {
    async fn resolve_key(&self, key_base64: &str) -> Result<Option<Principal>> {
        let principal = self
            .users
            .iter()
            .find(|u| u.keys.iter().any(|k| key_blob(k) == Some(key_base64)))
            .map(|u| Principal {
                id: u.id.clone(),
                name: u.name.clone(),
            });
        Ok(principal)
    }

    async fn role_of(&self, user_id: &str, workspace: &str) -> Result<Option<Role>> {
        Ok(self
            .workspaces
            .get(workspace)
            .and_then(|members| members.get(user_id))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMBERS: &str = r#"{
        "users": [
            { "id": "u-alice", "name": "alice", "keys": ["ssh-ed25519 AAAAC3alice alice@laptop"] },
            { "id": "u-bob", "name": "bob", "keys": ["AAAAB3bob", "ecdsa-sha2-nistp256 AAAAE2bob"] }
        ],
        "workspaces": {
            "acme": { "u-alice": "admin", "u-bob": "read" }
        }
    }"#;

    #[tokio::test]
    async fn resolves_keys_in_either_format() {
        let members = MembersFile::parse(MEMBERS).unwrap();

        let alice = members.resolve_key("AAAAC3alice").await.unwrap().unwrap();
        assert_eq!(alice.name, "alice");
        let bob = members.resolve_key("AAAAE2bob").await.unwrap().unwrap();
        assert_eq!(bob.id, "u-bob");
        assert!(members.resolve_key("AAAAB3bob").await.unwrap().is_some());
        assert!(members.resolve_key("ssh-ed25519").await.unwrap().is_none());
        assert!(members.resolve_key("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reports_workspace_roles() {
        let members = MembersFile::parse(MEMBERS).unwrap();
        assert_eq!(
            members.role_of("u-alice", "acme").await.unwrap(),
            Some(Role::Admin)
        );
        assert_eq!(
            members.role_of("u-bob", "acme").await.unwrap(),
            Some(Role::Read)
        );
        assert_eq!(members.role_of("u-bob", "other").await.unwrap(), None);
        assert_eq!(members.role_of("u-carol", "acme").await.unwrap(), None);
    }

    #[test]
    fn rejects_unknown_roles() {
        let err = MembersFile::parse(r#"{ "workspaces": { "acme": { "u": "owner" } } }"#);
        assert!(err.is_err());
    }
}
