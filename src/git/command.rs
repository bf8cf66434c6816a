//! Parsing of SSH exec commands into git smart-service invocations.
//!
//! Grammar: `<service> <path>` where service is one of `git-upload-pack`,
//! `git-receive-pack` or `git-upload-archive`. The service whitelist is what
//! keeps the dispatcher from ever running anything but these three.

use std::fmt;

use crate::error::{AppError, Result};

/// The three smart git services that may be requested over SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    ReceivePack,
    UploadArchive,
}

impl GitService {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "git-upload-pack" => Some(Self::UploadPack),
            "git-receive-pack" => Some(Self::ReceivePack),
            "git-upload-archive" => Some(Self::UploadArchive),
            _ => None,
        }
    }

    /// Subcommand passed to the `git` binary.
    pub fn subcommand(&self) -> &'static str {
        match self {
            Self::UploadPack => "upload-pack",
            Self::ReceivePack => "receive-pack",
            Self::UploadArchive => "upload-archive",
        }
    }

    /// Whether the service modifies the repository.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::ReceivePack)
    }
}

impl fmt::Display for GitService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "git-{}", self.subcommand())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub service: GitService,
    pub raw_path: String,
}

/// Parse an already tokenized exec command.
pub fn parse(argv: &[&str]) -> Result<ParsedCommand> {
    if argv.len() < 2 {
        return Err(AppError::InvalidCommandFormat(
            "expected '<git-service> <repository>'".to_string(),
        ));
    }

    let service = GitService::from_command(argv[0])
        .ok_or_else(|| AppError::UnsupportedGitCommand(argv[0].to_string()))?;

    if argv.len() > 2 {
        return Err(AppError::InvalidCommandFormat(
            "unexpected arguments after repository path".to_string(),
        ));
    }

    Ok(ParsedCommand {
        service,
        raw_path: argv[1].to_string(),
    })
}

/// Tokenize a raw exec string on whitespace and parse it.
pub fn parse_exec(command: &str) -> Result<ParsedCommand> {
    let argv: Vec<&str> = command.split_whitespace().collect();
    parse(&argv)
}
