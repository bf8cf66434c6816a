//! Runtime configuration.
//!
//! All options come from the command line with environment variable
//! fallbacks (`GIT_GATEWAY_*`), and are resolved once into [`Config`], which
//! is shared through `AppState`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::ssh::RateLimitConfig;

#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Address for the git SSH listener
    #[arg(long, env = "GIT_GATEWAY_SSH_LISTEN", default_value = "0.0.0.0:2222")]
    pub ssh_listen: SocketAddr,

    /// Address for the repository management HTTP API
    #[arg(long, env = "GIT_GATEWAY_HTTP_LISTEN", default_value = "127.0.0.1:3001")]
    pub http_listen: SocketAddr,

    /// OpenSSH private key used as the SSH host key (ephemeral if omitted)
    #[arg(long, env = "GIT_GATEWAY_HOST_KEY", value_name = "FILE")]
    pub host_key: Option<PathBuf>,

    /// JSON file with users, their SSH keys and workspace roles
    #[arg(long, env = "GIT_GATEWAY_MEMBERS", value_name = "FILE")]
    pub members: Option<PathBuf>,

    /// Connections allowed per source IP within the rate-limit window
    #[arg(long, env = "GIT_GATEWAY_RATE_LIMIT_MAX", default_value = "5")]
    pub rate_limit_max: usize,

    /// Rate-limit window in seconds
    #[arg(long, env = "GIT_GATEWAY_RATE_LIMIT_WINDOW", default_value = "60")]
    pub rate_limit_window: u64,

    /// Interval in seconds between rate-limiter cleanup sweeps
    #[arg(long, env = "GIT_GATEWAY_RATE_LIMIT_CLEANUP", default_value = "60")]
    pub rate_limit_cleanup: u64,

    /// Kill a git process after this many idle seconds (0 disables)
    #[arg(long, env = "GIT_GATEWAY_IDLE_TIMEOUT", default_value = "3600")]
    pub idle_timeout: u64,

    /// git executable used to serve the smart protocol
    #[arg(long, env = "GIT_GATEWAY_GIT_BIN", default_value = "git")]
    pub git_bin: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub git_root: PathBuf,
    pub ssh_listen: SocketAddr,
    pub http_listen: SocketAddr,
    pub host_key: Option<PathBuf>,
    pub members: Option<PathBuf>,
    pub rate_limit: RateLimitConfig,
    pub idle_timeout: Option<Duration>,
    pub git_bin: PathBuf,
}

impl Config {
    pub fn new(git_root: PathBuf, args: ServerArgs) -> Self {
        Self {
            git_root,
            ssh_listen: args.ssh_listen,
            http_listen: args.http_listen,
            host_key: args.host_key,
            members: args.members,
            rate_limit: RateLimitConfig {
                max_attempts: args.rate_limit_max,
                window: Duration::from_secs(args.rate_limit_window),
                cleanup_interval: Duration::from_secs(args.rate_limit_cleanup.max(1)),
            },
            idle_timeout: (args.idle_timeout > 0).then(|| Duration::from_secs(args.idle_timeout)),
            git_bin: args.git_bin,
        }
    }
}
