//! Name rules for everything that becomes a path component.
//!
//! Validation rejects, it never sanitizes: a name with a single character
//! outside the whitelist is an error, so `..`, `/`, NUL and quotes can never
//! reach the filesystem or a subprocess argument.

use crate::error::{AppError, Result};

const MAX_NAME_LEN: usize = 100;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn is_branch_char(c: char) -> bool {
    is_name_char(c) || c == '/'
}

/// Repository names: `[A-Za-z0-9._-]`, 1-100 chars, no leading or trailing `.`.
pub fn validate_repository_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(AppError::InvalidRepositoryName(format!(
            "name must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }
    if !name.chars().all(is_name_char) {
        return Err(AppError::InvalidRepositoryName(
            "name may only contain letters, digits, '.', '_' and '-'".to_string(),
        ));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(AppError::InvalidRepositoryName(
            "name must not start or end with '.'".to_string(),
        ));
    }
    Ok(())
}

/// Workspace slugs follow the repository name rule.
pub fn validate_workspace_slug(slug: &str) -> Result<()> {
    validate_repository_name(slug)
}

/// Branch names: `[A-Za-z0-9._/-]`, 1-100 chars, must not start with `.` or `/`.
pub fn validate_branch_name(branch: &str) -> Result<()> {
    if branch.is_empty() || branch.len() > MAX_NAME_LEN {
        return Err(AppError::InvalidBranchName(format!(
            "branch must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }
    if !branch.chars().all(is_branch_char) {
        return Err(AppError::InvalidBranchName(
            "branch may only contain letters, digits, '.', '_', '-' and '/'".to_string(),
        ));
    }
    if branch.starts_with('.') || branch.starts_with('/') {
        return Err(AppError::InvalidBranchName(
            "branch must not start with '.' or '/'".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_repository_names() {
        for name in ["repo", "my-repo", "my_repo", "v1.2", "A", "x.y-z_0"] {
            assert!(validate_repository_name(name).is_ok(), "{name}");
        }
        assert!(validate_repository_name(&"a".repeat(100)).is_ok());
    }

    #[test]
    fn rejects_traversal_and_foreign_characters() {
        for name in [
            "", "..", ".repo", "repo.", "a/b", "a\\b", "re po", "repo\0", "ré", "'repo'", "a;b",
        ] {
            assert!(
                matches!(
                    validate_repository_name(name),
                    Err(AppError::InvalidRepositoryName(_))
                ),
                "{name:?} should be rejected"
            );
        }
        assert!(validate_repository_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn branch_rules() {
        for branch in ["main", "feature/x", "release-1.0", "a.b/c_d"] {
            assert!(validate_branch_name(branch).is_ok(), "{branch}");
        }
        for branch in ["", ".hidden", "/x", "bad branch", "a:b", "x~1"] {
            assert!(
                matches!(
                    validate_branch_name(branch),
                    Err(AppError::InvalidBranchName(_))
                ),
                "{branch:?} should be rejected"
            );
        }
        assert!(validate_branch_name(&"b".repeat(101)).is_err());
        // Trailing dot is allowed for branches, unlike repository names.
        assert!(validate_branch_name("v1.").is_ok());
    }
}
