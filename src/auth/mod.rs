//! Workspace membership lookups and the access decision for git services.
//!
//! The gateway owns no user records. Everything it needs to know about
//! principals comes through [`WorkspaceDirectory`]:
//! - `resolve_key`: which user an SSH public key belongs to
//! - `role_of`: the user's role in a workspace, if any
//!
//! `members` provides a file-backed implementation.

pub mod members;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::git::GitService;
use crate::models::GitRepository;

pub use members::MembersFile;

/// Membership level within a workspace, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Read,
    Write,
    Admin,
}

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait WorkspaceDirectory: Send + Sync {
    /// Look up the owner of an SSH public key (base64 key blob, no algorithm
    /// prefix or comment).
    async fn resolve_key(&self, key_base64: &str) -> Result<Option<Principal>>;

    /// The user's role in `workspace`, or `None` if they are not a member.
    async fn role_of(&self, user_id: &str, workspace: &str) -> Result<Option<Role>>;
}

/// Decide whether a principal with `role` may run `service` against `repo`.
///
/// Reads of public repositories are open to any authenticated principal.
/// Everything else requires membership: `read` for fetch and archive,
/// `write` for push.
pub fn authorize(repo: &GitRepository, service: GitService, role: Option<Role>) -> Result<()> {
    let required = if service.is_write() {
        Role::Write
    } else {
        Role::Read
    };

    let allowed = match role {
        Some(role) => role >= required,
        None => !repo.private && !service.is_write(),
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::AuthorizationDenied)
    }
}

/// Check that `user_id` holds at least `required` in `workspace`.
pub async fn require_role(
    directory: &dyn WorkspaceDirectory,
    user_id: &str,
    workspace: &str,
    required: Role,
) -> Result<Role> {
    match directory.role_of(user_id, workspace).await? {
        Some(role) if role >= required => Ok(role),
        _ => Err(AppError::AuthorizationDenied),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(private: bool) -> GitRepository {
        GitRepository {
            name: "widgets".to_string(),
            workspace: "acme".to_string(),
            private,
            description: String::new(),
            created_at: chrono::Utc::now(),
            created_by: "owner".to_string(),
            branch: "main".to_string(),
            path: "/srv/git/acme/widgets.git".into(),
        }
    }

    #[test]
    fn public_repositories_are_readable_by_anyone() {
        let public = repo(false);
        assert!(authorize(&public, GitService::UploadPack, None).is_ok());
        assert!(authorize(&public, GitService::UploadArchive, None).is_ok());
        assert!(authorize(&public, GitService::ReceivePack, None).is_err());
    }

    #[test]
    fn private_repositories_require_membership() {
        let private = repo(true);
        for service in [
            GitService::UploadPack,
            GitService::UploadArchive,
            GitService::ReceivePack,
        ] {
            assert!(matches!(
                authorize(&private, service, None),
                Err(AppError::AuthorizationDenied)
            ));
        }
        assert!(authorize(&private, GitService::UploadPack, Some(Role::Read)).is_ok());
    }

    #[test]
    fn push_requires_write() {
        for private in [true, false] {
            let r = repo(private);
            assert!(authorize(&r, GitService::ReceivePack, Some(Role::Read)).is_err());
            assert!(authorize(&r, GitService::ReceivePack, Some(Role::Write)).is_ok());
            assert!(authorize(&r, GitService::ReceivePack, Some(Role::Admin)).is_ok());
        }
    }

    #[test]
    fn roles_are_ordered() {
        assert!(Role::Read < Role::Write);
        assert!(Role::Write < Role::Admin);
    }
}
