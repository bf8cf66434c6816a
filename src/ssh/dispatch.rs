//! Runs a git smart service for an SSH channel.
//!
//! The subprocess is `{git_bin} <service> <repo_dir>` with all three stdio
//! streams piped:
//! - channel data → stdin (written by the session's `data` callback)
//! - stdout → channel data
//! - stderr → channel extended data (stream 1), forwarded as it arrives
//!
//! When the process exits, its remaining output is drained (bounded by
//! [`DRAIN_TIMEOUT`]) and exit-status, EOF and close are sent in that order.
//! Dropping the returned [`RunningService`] (channel closed, or the whole
//! connection gone) kills the process, as does the idle timeout.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::git::GitService;

/// SSH extended data type for stderr (RFC 4254 §5.2).
const STDERR: u32 = 1;

const BUF_SIZE: usize = 32 * 1024;

/// How long output may keep flowing after git itself has exited. A hook that
/// leaves a background process holding the pipes would otherwise keep the
/// channel open forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const IDLE_MESSAGE: &[u8] = b"ERROR: connection idle for too long\n";

/// Where a git process's output goes.
#[async_trait]
pub trait ChannelSink: Clone + Send + Sync + 'static {
    /// Returns `false` once the channel can no longer take data.
    async fn data(&self, data: &[u8]) -> bool;
    async fn stderr(&self, data: &[u8]) -> bool;
    /// Exit status, EOF and close.
    async fn finish(&self, exit_status: u32);
}

/// One channel of a russh session.
#[derive(Clone)]
pub struct SshChannel {
    handle: Handle,
    channel: ChannelId,
}

impl SshChannel {
    pub fn new(handle: Handle, channel: ChannelId) -> Self {
        Self { handle, channel }
    }
}

#[async_trait]
impl ChannelSink for SshChannel {
    async fn data(&self, data: &[u8]) -> bool {
        self.handle
            .data(self.channel, CryptoVec::from_slice(data))
            .await
            .is_ok()
    }

    async fn stderr(&self, data: &[u8]) -> bool {
        self.handle
            .extended_data(self.channel, STDERR, CryptoVec::from_slice(data))
            .await
            .is_ok()
    }

    async fn finish(&self, exit_status: u32) {
        // RFC 4254: exit-status, then EOF, then close.
        let _ = self
            .handle
            .exit_status_request(self.channel, exit_status)
            .await;
        let _ = self.handle.eof(self.channel).await;
        let _ = self.handle.close(self.channel).await;
    }
}

/// Last time bytes moved in either direction.
#[derive(Debug)]
pub struct Activity(Mutex<Instant>);

impl Activity {
    fn new() -> Self {
        Self(Mutex::new(Instant::now()))
    }

    pub fn touch(&self) {
        if let Ok(mut last) = self.0.lock() {
            *last = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.0
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }
}

/// Handle to a git process serving one channel.
pub struct RunningService {
    pub stdin: Option<ChildStdin>,
    pub activity: Arc<Activity>,
    /// Dropping this sender kills the process.
    _kill: oneshot::Sender<()>,
}

pub struct ServiceRequest<'a> {
    pub git_bin: &'a Path,
    pub service: GitService,
    pub repo_path: &'a Path,
    pub git_protocol: Option<&'a str>,
    pub idle_timeout: Option<Duration>,
}

pub fn build_command(request: &ServiceRequest<'_>) -> Command {
    let mut cmd = Command::new(request.git_bin);
    cmd.arg(request.service.subcommand()).arg(request.repo_path);

    if let Some(proto) = request.git_protocol {
        cmd.env("GIT_PROTOCOL", proto);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Spawn the git process and the task that streams its output to `sink`.
pub fn spawn_service<S: ChannelSink>(
    request: ServiceRequest<'_>,
    sink: S,
) -> std::io::Result<RunningService> {
    let cmd = build_command(&request);
    let repo = request.repo_path.display().to_string();
    supervise(cmd, request.service, repo, request.idle_timeout, sink)
}

fn supervise<S: ChannelSink>(
    mut cmd: Command,
    service: GitService,
    repo: String,
    idle_timeout: Option<Duration>,
    sink: S,
) -> std::io::Result<RunningService> {
    let mut child = cmd.spawn()?;
    let stdin = child.stdin.take();
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(std::io::Error::other("git process stdio was not piped"));
    };

    let activity = Arc::new(Activity::new());
    let (kill, mut killed) = oneshot::channel::<()>();

    let watched = Arc::clone(&activity);
    tokio::spawn(async move {
        let mut out = tokio::spawn(copy_to_channel(
            stdout,
            sink.clone(),
            false,
            Arc::clone(&watched),
        ));
        let mut err = tokio::spawn(copy_to_channel(
            stderr,
            sink.clone(),
            true,
            Arc::clone(&watched),
        ));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status.ok().and_then(|s| s.code())),
            _ = &mut killed => Outcome::ChannelClosed,
            _ = idle_expired(&watched, idle_timeout) => Outcome::IdleTimeout,
        };

        let exit_status = match outcome {
            Outcome::Exited(code) => {
                let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                    let _ = (&mut out).await;
                    let _ = (&mut err).await;
                })
                .await;
                if drained.is_err() {
                    out.abort();
                    err.abort();
                    warn!(%service, %repo, "git output still open after exit; closing channel");
                }
                let code = code.map(|c| c as u32).unwrap_or(1);
                info!(%service, %repo, exit_status = code, "git process finished");
                code
            }
            Outcome::ChannelClosed => {
                out.abort();
                err.abort();
                let _ = child.kill().await;
                debug!(%service, %repo, "channel closed; git process killed");
                return;
            }
            Outcome::IdleTimeout => {
                out.abort();
                err.abort();
                let _ = child.kill().await;
                warn!(%service, %repo, "idle timeout; git process killed");
                sink.stderr(IDLE_MESSAGE).await;
                1
            }
        };

        sink.finish(exit_status).await;
    });

    Ok(RunningService {
        stdin,
        activity,
        _kill: kill,
    })
}

enum Outcome {
    Exited(Option<i32>),
    ChannelClosed,
    IdleTimeout,
}

async fn idle_expired(activity: &Activity, timeout: Option<Duration>) {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };
    loop {
        let idle = activity.idle_for();
        if idle >= timeout {
            return;
        }
        tokio::time::sleep(timeout - idle).await;
    }
}

async fn copy_to_channel<R, S>(mut reader: R, sink: S, to_stderr: bool, activity: Arc<Activity>)
where
    R: AsyncRead + Unpin,
    S: ChannelSink,
{
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                activity.touch();
                let sent = if to_stderr {
                    sink.stderr(&buf[..n]).await
                } else {
                    sink.data(&buf[..n]).await
                };
                if !sent {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "error reading git process output");
                break;
            }
        }
    }
}
