//! SSH listener: rate-limited accept loop feeding russh sessions.
//!
//! The rate limiter is consulted with the peer IP right after `accept`,
//! before any SSH bytes are exchanged, so a denied source never reaches the
//! authentication stage.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::MethodSet;
use russh::server;
use russh_keys::key::KeyPair;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::session::SshSession;
use crate::AppState;
use crate::error::AppError;

/// Load the host key from `--host-key`, or generate an ephemeral Ed25519 key.
fn load_host_key(state: &AppState) -> Result<KeyPair> {
    match &state.config.host_key {
        Some(path) => {
            let key = russh_keys::load_secret_key(path, None)
                .with_context(|| format!("failed to load SSH host key {}", path.display()))?;
            info!(path = %path.display(), "loaded SSH host key");
            Ok(key)
        }
        None => {
            warn!("no SSH host key configured; generating ephemeral Ed25519 key");
            Ok(KeyPair::generate_ed25519())
        }
    }
}

/// Headroom so the dispatcher's idle kill reports its exit status before
/// russh drops the connection.
const SESSION_TIMEOUT_GRACE: Duration = Duration::from_secs(30);

/// russh session timeout derived from `--idle-timeout`; disabled with it.
fn session_inactivity_timeout(idle_timeout: Option<Duration>) -> Option<Duration> {
    idle_timeout.map(|t| t + SESSION_TIMEOUT_GRACE)
}

fn server_config(state: &AppState) -> Result<server::Config> {
    Ok(server::Config {
        keys: vec![load_host_key(state)?],
        methods: MethodSet::PUBLICKEY,
        inactivity_timeout: session_inactivity_timeout(state.config.idle_timeout),
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        max_auth_attempts: 3,
        ..Default::default()
    })
}

/// Run the SSH listener until the process shuts down.
pub async fn start_ssh_server(state: Arc<AppState>) -> Result<()> {
    let config = Arc::new(server_config(&state)?);
    let listen_addr = state.config.ssh_listen;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind SSH listener on {}", listen_addr))?;

    info!(address = %listen_addr, "SSH server listening");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "failed to accept SSH connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let ip = peer.ip().to_string();
        if !state.rate_limiter.check_and_record(&ip) {
            warn!(peer = %peer, error = %AppError::RateLimited(ip), "dropping SSH connection");
            drop(socket);
            continue;
        }

        serve_connection(Arc::clone(&config), Arc::clone(&state), socket, peer);
    }
}

fn serve_connection(
    config: Arc<server::Config>,
    state: Arc<AppState>,
    socket: tokio::net::TcpStream,
    peer: SocketAddr,
) {
    debug!(peer = %peer, "new SSH client connection");
    let _ = socket.set_nodelay(true);
    let handler = SshSession::new(state, Some(peer));

    tokio::spawn(async move {
        let session = match server::run_stream(config, socket, handler).await {
            Ok(session) => session,
            Err(e) => {
                debug!(peer = %peer, error = %e, "SSH handshake failed");
                return;
            }
        };
        match session.await {
            Ok(()) => debug!(peer = %peer, "SSH connection closed"),
            Err(e) => debug!(peer = %peer, error = %e, "SSH connection ended with error"),
        }
    });
}
