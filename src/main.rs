//! git-gateway - database-free Git hosting over SSH
//!
//! # Usage
//! ```bash
//! git-gateway /srv/git --members members.json   # Start SSH + HTTP servers
//! git-gateway status                            # Check if running
//! git-gateway kill                              # Stop running instance
//! ```

mod auth;
mod config;
mod error;
mod git;
mod models;
mod routes;
mod ssh;

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::{MembersFile, WorkspaceDirectory};
use config::{Config, ServerArgs};
use git::RepositoryStore;
use ssh::RateLimiter;

/// git-gateway - Host bare git repositories over SSH
#[derive(Parser)]
#[command(name = "git-gateway")]
#[command(about = "Database-free git hosting over SSH", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding `{workspace}/{repo}.git` bare repositories
    #[arg(value_name = "GIT_ROOT", env = "GIT_GATEWAY_ROOT")]
    git_root: Option<PathBuf>,

    #[command(flatten)]
    server: ServerArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Check if git-gateway is currently running
    Status,
    /// Stop the running git-gateway instance
    Kill,
}

/// Shared state for SSH sessions and HTTP handlers.
pub struct AppState {
    pub config: Config,
    pub store: RepositoryStore,
    pub directory: Arc<dyn WorkspaceDirectory>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Must be called from within a tokio runtime (starts the rate limiter).
    pub fn new(config: Config, directory: Arc<dyn WorkspaceDirectory>) -> Arc<Self> {
        Arc::new(Self {
            store: RepositoryStore::new(&config.git_root),
            rate_limiter: RateLimiter::new(config.rate_limit),
            directory,
            config,
        })
    }
}

/// PID file info stored as JSON
#[derive(serde::Serialize, serde::Deserialize)]
struct PidInfo {
    pid: u32,
    git_root: String,
    ssh_listen: String,
    http_listen: String,
}

fn get_pid_file_path() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push("git-gateway.pid");
    path
}

fn read_pid_info() -> Option<PidInfo> {
    let path = get_pid_file_path();
    let mut file = fs::File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
}

fn write_pid_info(info: &PidInfo) -> anyhow::Result<()> {
    let path = get_pid_file_path();
    let mut file = fs::File::create(&path)?;
    file.write_all(serde_json::to_string(info)?.as_bytes())?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(get_pid_file_path());
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(windows)]
fn is_process_running(pid: u32) -> bool {
    use std::process::Command;
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|output| String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

#[cfg(unix)]
fn kill_process(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGTERM) == 0 }
}

#[cfg(windows)]
fn kill_process(pid: u32) -> bool {
    use std::process::Command;
    Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn print_instance(info: &PidInfo) {
    println!("  PID:  {}", info.pid);
    println!("  Root: {}", info.git_root);
    println!("  SSH:  {}", info.ssh_listen);
    println!("  HTTP: http://{}", info.http_listen);
}

fn handle_status() {
    match read_pid_info() {
        Some(info) if is_process_running(info.pid) => {
            println!("✓ git-gateway is running");
            print_instance(&info);
        }
        Some(_) => {
            println!("✗ git-gateway is not running (stale PID file)");
            remove_pid_file();
        }
        None => println!("✗ git-gateway is not running"),
    }
}

fn handle_kill() {
    match read_pid_info() {
        Some(info) if is_process_running(info.pid) => {
            if kill_process(info.pid) {
                println!("✓ Stopped git-gateway (PID {})", info.pid);
                remove_pid_file();
            } else {
                println!("✗ Failed to stop git-gateway (PID {})", info.pid);
            }
        }
        Some(_) => {
            println!("✗ git-gateway is not running (stale PID file)");
            remove_pid_file();
        }
        None => println!("✗ git-gateway is not running"),
    }
}

fn load_directory(config: &Config) -> anyhow::Result<Arc<dyn WorkspaceDirectory>> {
    let members = match &config.members {
        Some(path) => MembersFile::load(path)?,
        None => {
            tracing::warn!("no members file configured; all SSH keys will be rejected");
            MembersFile::default()
        }
    };
    Ok(Arc::new(members))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Status) => {
            handle_status();
            return Ok(());
        }
        Some(Commands::Kill) => {
            handle_kill();
            return Ok(());
        }
        None => {}
    }

    let git_root = cli.git_root.unwrap_or_else(|| {
        eprintln!("Usage: git-gateway <GIT_ROOT> [OPTIONS]");
        eprintln!("       git-gateway status");
        eprintln!("       git-gateway kill");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  git-gateway /srv/git --members members.json");
        eprintln!("  git-gateway /srv/git --host-key /etc/git-gateway/ssh_host_ed25519_key");
        std::process::exit(1);
    });

    if let Some(info) = read_pid_info() {
        if is_process_running(info.pid) {
            eprintln!("✗ git-gateway is already running (PID {})", info.pid);
            eprintln!("  Root: {}", info.git_root);
            eprintln!();
            eprintln!("Run 'git-gateway kill' to stop it first.");
            std::process::exit(1);
        } else {
            remove_pid_file();
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    fs::create_dir_all(&git_root)
        .with_context(|| format!("failed to create git root {}", git_root.display()))?;
    let git_root = fs::canonicalize(&git_root)
        .with_context(|| format!("failed to resolve git root {}", git_root.display()))?;

    let config = Config::new(git_root, cli.server);
    let directory = load_directory(&config)?;
    let state = AppState::new(config, directory);

    let app = routes::create_router(Arc::clone(&state)).layer(TraceLayer::new_for_http());

    let http_addr = state.config.http_listen;
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", http_addr))?;

    let pid_info = PidInfo {
        pid: std::process::id(),
        git_root: state.config.git_root.display().to_string(),
        ssh_listen: state.config.ssh_listen.to_string(),
        http_listen: http_addr.to_string(),
    };
    write_pid_info(&pid_info)?;

    println!();
    println!("  git-gateway");
    println!();
    print_instance(&pid_info);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    let ssh_server = tokio::spawn(ssh::start_ssh_server(Arc::clone(&state)));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        println!("\n  Shutting down...");
    };

    let result = tokio::select! {
        served = async { axum::serve(listener, app).with_graceful_shutdown(shutdown).await } => {
            served.context("HTTP server exited with error")
        }
        ssh = ssh_server => match ssh {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(anyhow::anyhow!("SSH server task failed: {}", e)),
        },
    };

    state.rate_limiter.stop();
    remove_pid_file();
    result
}
