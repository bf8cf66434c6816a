//! Application error types, HTTP response mapping and SSH client messages.
//!
//! Defines `AppError` enum for all error conditions. The same enum feeds two
//! surfaces:
//! - HTTP: `IntoResponse` renders a JSON body with `error` and `code`
//! - SSH: `client_message()` renders the single stderr line sent before the
//!   channel is closed with a nonzero exit status
//!
//! Error mappings (HTTP):
//! - `InvalidCommandFormat`, `UnsupportedGitCommand`, `InvalidPathFormat`,
//!   `InvalidRepositoryName`, `InvalidBranchName` → 400
//! - `AuthorizationDenied` → 403
//! - `RepositoryNotFound` → 404
//! - `RepositoryExists` → 409
//! - `RateLimited` → 429
//! - `Io`, `CorruptMetadata`, `Git`, `Internal` → 500

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid command format: {0}")]
    InvalidCommandFormat(String),

    #[error("Unsupported git command: {0}")]
    UnsupportedGitCommand(String),

    #[error("Invalid repository path: {0}")]
    InvalidPathFormat(String),

    #[error("Invalid repository name: {0}")]
    InvalidRepositoryName(String),

    #[error("Invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Repository already exists: {0}")]
    RepositoryExists(String),

    #[error("Repository not found or access denied")]
    AuthorizationDenied,

    #[error("Too many connection attempts from {0}")]
    RateLimited(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt repository metadata at {path}: {reason}")]
    CorruptMetadata { path: String, reason: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable error code used by the HTTP API.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidCommandFormat(_) => "INVALID_COMMAND_FORMAT",
            AppError::UnsupportedGitCommand(_) => "UNSUPPORTED_GIT_COMMAND",
            AppError::InvalidPathFormat(_) => "INVALID_PATH_FORMAT",
            AppError::InvalidRepositoryName(_) => "INVALID_REPOSITORY_NAME",
            AppError::InvalidBranchName(_) => "INVALID_BRANCH_NAME",
            AppError::RepositoryNotFound(_) => "REPOSITORY_NOT_FOUND",
            AppError::RepositoryExists(_) => "REPOSITORY_EXISTS",
            AppError::AuthorizationDenied => "AUTHORIZATION_DENIED",
            AppError::RateLimited(_) => "RATE_LIMITED",
            AppError::Io(_) => "IO_ERROR",
            AppError::CorruptMetadata { .. } => "CORRUPT_METADATA",
            AppError::Git(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCommandFormat(_)
            | AppError::UnsupportedGitCommand(_)
            | AppError::InvalidPathFormat(_)
            | AppError::InvalidRepositoryName(_)
            | AppError::InvalidBranchName(_) => StatusCode::BAD_REQUEST,
            AppError::AuthorizationDenied => StatusCode::FORBIDDEN,
            AppError::RepositoryNotFound(_) => StatusCode::NOT_FOUND,
            AppError::RepositoryExists(_) => StatusCode::CONFLICT,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Io(_)
            | AppError::CorruptMetadata { .. }
            | AppError::Git(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Line written to the SSH client's stderr stream.
    ///
    /// Server-side failures are not echoed in detail; the full error is
    /// logged instead.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Io(_)
            | AppError::CorruptMetadata { .. }
            | AppError::Git(_)
            | AppError::Internal(_) => "ERROR: internal server error\n".to_string(),
            other => format!("ERROR: {}\n", other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
