//! SSH session handler implementing the `russh` 0.46 [`Handler`] trait.
//!
//! Each accepted connection is served by a dedicated [`SshSession`]. The
//! handler authenticates public keys against the workspace directory, turns
//! each `exec` request into a git service invocation and keeps the running
//! git processes per channel so client data and EOF can be forwarded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use base64::Engine as _;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::PublicKeyBase64;
use russh_keys::key::PublicKey;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::dispatch::{RunningService, ServiceRequest, SshChannel, spawn_service};
use crate::AppState;
use crate::auth::{Principal, authorize};
use crate::error::AppError;
use crate::git::{GitService, command, resolver};

/// Per-connection SSH session state.
pub struct SshSession {
    state: Arc<AppState>,
    peer_addr: Option<SocketAddr>,
    principal: Option<Principal>,
    /// `GIT_PROTOCOL` value sent by the client via SSH env request.
    git_protocol: Option<String>,
    services: HashMap<ChannelId, RunningService>,
}

impl SshSession {
    pub fn new(state: Arc<AppState>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            state,
            peer_addr,
            principal: None,
            git_protocol: None,
            services: HashMap::new(),
        }
    }

    /// Parse, resolve and authorize an exec command.
    ///
    /// A missing repository and a denied principal both come back as
    /// `AuthorizationDenied`, so clients cannot probe for repository names.
    async fn prepare(&self, raw_cmd: &str) -> crate::error::Result<(GitService, std::path::PathBuf)> {
        let parsed = command::parse_exec(raw_cmd)?;
        let (workspace, name) = resolver::resolve(&parsed.raw_path)?;

        let principal = self
            .principal
            .as_ref()
            .ok_or(AppError::AuthorizationDenied)?;

        let repo = match self.state.store.get(&workspace, &name) {
            Ok(repo) => repo,
            Err(AppError::RepositoryNotFound(_)) => return Err(AppError::AuthorizationDenied),
            Err(e @ AppError::CorruptMetadata { .. }) => {
                error!(error = %e, "refusing to serve repository with corrupt metadata");
                return Err(AppError::AuthorizationDenied);
            }
            Err(e) => return Err(e),
        };

        let role = self
            .state
            .directory
            .role_of(&principal.id, &workspace)
            .await?;
        authorize(&repo, parsed.service, role).inspect_err(|_| {
            warn!(
                user = %principal.name,
                repo = %format!("{}/{}", workspace, name),
                service = %parsed.service,
                ?role,
                "SSH repo access denied"
            );
        })?;

        Ok((parsed.service, repo.path))
    }
}

/// Send exit-status, EOF, and close on a channel in the order required by
/// the SSH protocol (RFC 4254). Git's SSH transport treats a close without
/// exit-status as "the remote end hung up unexpectedly".
fn finish_channel(session: &mut Session, channel_id: ChannelId, exit_status: u32) {
    session.exit_status_request(channel_id, exit_status);
    session.eof(channel_id);
    session.close(channel_id);
}

fn reject(session: &mut Session, channel_id: ChannelId, err: &AppError) {
    session.extended_data(
        channel_id,
        1,
        CryptoVec::from_slice(err.client_message().as_bytes()),
    );
    finish_channel(session, channel_id, 1);
}

/// SHA-256 fingerprint in `ssh-keygen -l` format.
fn fingerprint_of(key_base64: &str) -> String {
    let blob = base64::engine::general_purpose::STANDARD
        .decode(key_base64.as_bytes())
        .unwrap_or_default();
    let hash = Sha256::digest(&blob);
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    format!("SHA256:{encoded}")
}

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = anyhow::Error;

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let blob = key.public_key_base64();
        let fp = fingerprint_of(&blob);

        match self.state.directory.resolve_key(&blob).await {
            Ok(Some(principal)) => {
                info!(
                    peer = ?self.peer_addr,
                    user = %user,
                    principal = %principal.name,
                    fingerprint = %fp,
                    "SSH key accepted"
                );
                self.principal = Some(principal);
                Ok(Auth::Accept)
            }
            Ok(None) => {
                warn!(peer = ?self.peer_addr, fingerprint = %fp, "SSH key not associated with any user");
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
            Err(e) => {
                error!(fingerprint = %fp, error = %e, "failed to resolve SSH key");
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Git clients send `GIT_PROTOCOL=version=2` here before the exec request.
    async fn env_request(
        &mut self,
        _channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if variable_name == "GIT_PROTOCOL" {
            debug!(value = %variable_value, "captured GIT_PROTOCOL from client");
            self.git_protocol = Some(variable_value.to_string());
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(running) = self.services.get_mut(&channel) {
            running.activity.touch();
            if let Some(stdin) = running.stdin.as_mut() {
                if let Err(e) = stdin.write_all(data).await {
                    debug!(error = %e, "failed to write to git stdin (process may have exited)");
                    running.stdin.take();
                }
            }
        }
        Ok(())
    }

    /// Dropping the stdin handle closes the pipe so git sees EOF.
    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(running) = self.services.get_mut(&channel) {
            running.stdin.take();
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.services.remove(&channel).is_some() {
            debug!(?channel, "channel closed while git was running");
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let raw_cmd = String::from_utf8_lossy(data).into_owned();
        info!(
            peer = ?self.peer_addr,
            principal = ?self.principal.as_ref().map(|p| &p.name),
            command = %raw_cmd,
            "SSH exec request"
        );

        if self.services.contains_key(&channel_id) {
            reject(
                session,
                channel_id,
                &AppError::InvalidCommandFormat("channel already running a command".to_string()),
            );
            return Ok(());
        }

        let (service, repo_path) = match self.prepare(&raw_cmd).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(peer = ?self.peer_addr, command = %raw_cmd, error = %e, "rejected SSH exec request");
                reject(session, channel_id, &e);
                return Ok(());
            }
        };

        let request = ServiceRequest {
            git_bin: &self.state.config.git_bin,
            service,
            repo_path: &repo_path,
            git_protocol: self.git_protocol.as_deref(),
            idle_timeout: self.state.config.idle_timeout,
        };

        match spawn_service(request, SshChannel::new(session.handle(), channel_id)) {
            Ok(running) => {
                info!(%service, path = %repo_path.display(), "serving git request");
                self.services.insert(channel_id, running);
            }
            Err(e) => {
                error!(%service, path = %repo_path.display(), error = %e, "failed to spawn git");
                reject(session, channel_id, &AppError::Io(e));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_matches_ssh_keygen_format() {
        let fp = fingerprint_of("AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl");
        assert!(fp.starts_with("SHA256:"));
        // 32-byte digest, base64 without padding
        assert_eq!(fp.len(), "SHA256:".len() + 43);
    }

    #[test]
    fn fingerprint_of_garbage_is_still_well_formed() {
        assert!(fingerprint_of("not base64!").starts_with("SHA256:"));
    }
}
