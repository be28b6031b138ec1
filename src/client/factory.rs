//! URL parsing, subprocess launch and session wiring
// (c) 2026 Dolt Authors

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use tokio::time::timeout;
use tracing::{debug, trace};
use url::Url;

use crate::client::http::MuxHttpTransport;
use crate::client::process::{StderrBuffer, TransferProcess};
use crate::client::SessionContext;
use crate::mux::{MuxSession, PipeConn};
use crate::rpc::RpcClient;
use crate::store::RemoteChunkStore;

/// SSH client binary override. May include leading arguments, split on
/// whitespace.
pub const SSH_ENV_VAR: &str = "DOLT_SSH";
/// Path of the dolt binary on the remote host.
pub const EXEC_PATH_ENV_VAR: &str = "DOLT_SSH_EXEC_PATH";

const DEFAULT_SSH: &str = "ssh";
const DEFAULT_REMOTE_EXEC: &str = "dolt";

/// How long to wait for the session to drain before killing the subprocess
/// anyway.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the factory finds its binaries. [`from_env`](SshOptions::from_env)
/// reads the documented environment variables; tests inject values directly.
#[derive(Debug, Clone, Default)]
pub struct SshOptions {
    /// SSH client invocation; `None` means plain `ssh`.
    pub ssh_command: Option<String>,
    /// Remote dolt binary; `None` means `dolt` on the remote `PATH`.
    pub remote_exec: Option<String>,
}

impl SshOptions {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            ssh_command: std::env::var(SSH_ENV_VAR).ok().filter(|s| !s.is_empty()),
            remote_exec: std::env::var(EXEC_PATH_ENV_VAR).ok().filter(|s| !s.is_empty()),
        }
    }
}

/// A parsed `ssh://[user@]host[:port]/path[/.dolt]` remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshUrl {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// Repository path on the remote host, `/.dolt` suffix stripped.
    pub path: String,
}

impl SshUrl {
    pub fn parse(s: &str) -> Result<Self> {
        let parsed = Url::parse(s).with_context(|| format!("invalid remote url {s}"))?;
        anyhow::ensure!(
            parsed.scheme() == "ssh",
            "unsupported url scheme {}://",
            parsed.scheme()
        );
        let mut host = parsed
            .host_str()
            .with_context(|| format!("remote url {s} has no host"))?
            .to_string();
        let mut user = (!parsed.username().is_empty()).then(|| parsed.username().to_string());
        if let Some(at) = host.rfind('@') {
            // A user smuggled through the host field. The URL-form
            // user-info wins when both appear.
            if user.is_none() {
                user = Some(host[..at].to_string());
            }
            host = host[at + 1..].to_string();
        }

        let mut path = parsed.path().to_string();
        if let Some(stripped) = path.strip_suffix("/.dolt") {
            path = stripped.to_string();
        }
        check_path_charset(&path)?;

        Ok(Self {
            user,
            host,
            port: parsed.port(),
            path,
        })
    }

    /// `[user@]host`, as handed to the ssh client.
    #[must_use]
    pub fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// The remote command is a single shell-evaluated string, so the path must
/// not be able to escape it. Rejecting up front beats quoting: there is no
/// portable quoting across remote shells.
fn check_path_charset(path: &str) -> Result<()> {
    if let Some(c) = path
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "/._~+-".contains(*c)))
    {
        bail!("unsupported character {c:?} in remote path {path}");
    }
    Ok(())
}

/// Builds `ssh [-p port] [user@]host "<dolt> --data-dir <path> transfer"`.
fn build_transfer_command(
    url: &SshUrl,
    options: &SshOptions,
) -> Result<tokio::process::Command> {
    let ssh_command = options.ssh_command.as_deref().unwrap_or(DEFAULT_SSH);
    let mut fields = ssh_command.split_whitespace();
    let Some(program) = fields.next() else {
        bail!("{SSH_ENV_VAR} is set but empty");
    };
    let remote_exec = options.remote_exec.as_deref().unwrap_or(DEFAULT_REMOTE_EXEC);
    // Passed as one argument; ssh re-joins its trailing arguments with
    // spaces for the remote shell anyway.
    let remote_command = format!("{remote_exec} --data-dir {} transfer", url.path);

    let mut command = tokio::process::Command::new(program);
    let _ = command.args(fields);
    if let Some(port) = url.port {
        let _ = command.arg("-p").arg(port.to_string());
    }
    let _ = command.arg(url.target()).arg(remote_command);
    Ok(command)
}

/// Owns every per-session resource on the client. Torn down (via
/// [`RemoteChunkStore::close`]) in a fixed order.
pub struct TransferConnection {
    pub(crate) process: TransferProcess,
    pub(crate) session: Arc<MuxSession>,
    pub(crate) ctx: SessionContext,
    pub(crate) monitor: tokio::task::JoinHandle<()>,
}

impl TransferConnection {
    /// Coordinated teardown. The order matters:
    ///
    /// 1. cancel the session context (fails future operations with
    ///    `connection closed`);
    /// 2. close the mux (unblocks every in-flight substream, and — once the
    ///    driver exits — drops the child's stdin, which is the server's EOF
    ///    cue);
    /// 3. retire the session monitor;
    /// 4. kill the subprocess and reap it.
    ///
    /// Killing before the mux has drained races pending writes, hence the
    /// sequencing. A wedged session only delays the kill by
    /// [`CLOSE_TIMEOUT`].
    pub(crate) async fn close(mut self) {
        self.ctx.cancel("connection closed");
        if timeout(CLOSE_TIMEOUT, self.session.close()).await.is_err() {
            debug!("session did not drain within {CLOSE_TIMEOUT:?}");
        }
        self.monitor.abort();
        self.process.kill_and_wait().await;
    }
}

/// Connects to an ssh remote, reading configuration from the environment.
///
/// Returns a [`RemoteChunkStore`] scoped to the URL's path. Closing the
/// store tears the whole session down, subprocess included.
pub async fn connect(url: &str) -> Result<RemoteChunkStore> {
    connect_with(url, &SshOptions::from_env()).await
}

/// [`connect`] with explicit options instead of the environment.
pub async fn connect_with(url: &str, options: &SshOptions) -> Result<RemoteChunkStore> {
    let url = SshUrl::parse(url)?;
    let command = build_transfer_command(&url, options)?;
    let mut process = TransferProcess::spawn(command)?;
    let stderr = process.stderr();
    let (stdout, stdin) = process.stream_pair()?;

    let session = Arc::new(MuxSession::client(PipeConn::new(stdout, stdin)));
    let ctx = SessionContext::new();

    // Session monitor. Accepting on the opening side never yields a stream;
    // it returns the moment the session dies, and parking here keeps the
    // mux reading the pipe so that EOF propagates promptly. Without this,
    // a call blocked waiting for a response would hang forever after the
    // subprocess exits.
    let monitor = tokio::spawn({
        let session = Arc::clone(&session);
        let ctx = ctx.clone();
        async move {
            let _ = session.accept_stream().await;
            trace!("session monitor: remote went away");
            ctx.cancel("remote process exited");
        }
    });

    let rpc = RpcClient::new(Arc::clone(&session), ctx.clone());
    let http = MuxHttpTransport::new(Arc::clone(&session));
    let connection = TransferConnection {
        process,
        session,
        ctx,
        monitor,
    };
    let store = RemoteChunkStore::new(rpc, http, url.path.clone(), Some(connection));

    // One probe before handing the store out, so that a bad URL, a missing
    // remote binary or a failed repository load surfaces here with a
    // useful diagnostic instead of on the first real operation.
    match store.repo_metadata().await {
        Ok(metadata) => {
            debug!(
                "connected to {} (format {}, {} bytes stored)",
                url.path, metadata.format_version, metadata.storage_size
            );
            Ok(store)
        }
        Err(error) => {
            // Tear down first: triage must not read stderr until the
            // subprocess is gone and the drainer has signalled EOF.
            let _ = store.close().await;
            Err(remote_error(&stderr, &url.path, "failed to open remote repository", error).await)
        }
    }
}

/// Builds the user-facing error for a failed remote operation, preferring
/// the remote's own words over the local I/O error.
///
/// Blocks on the stderr done-signal: the buffer's contents are undefined
/// before the drainer has seen EOF. Callers must have ended the subprocess.
pub(crate) async fn remote_error(
    stderr: &StderrBuffer,
    path: &str,
    context: &str,
    cause: anyhow::Error,
) -> anyhow::Error {
    let raw = stderr.wait().await;
    classify_remote_error(&raw, path, context, cause)
}

fn classify_remote_error(
    stderr: &str,
    path: &str,
    context: &str,
    cause: anyhow::Error,
) -> anyhow::Error {
    let filtered = filter_ssh_noise(stderr);
    if filtered.is_empty() {
        return cause.context(context.to_string());
    }
    let lower = filtered.to_lowercase();
    if lower.contains("no such file or directory") || lower.contains("failed to load database") {
        return anyhow!("repository not found at {path}");
    }
    anyhow!("{context}: remote: {filtered}")
}

/// Removes ssh's informational chatter so it is not mistaken for an error.
fn filter_ssh_noise(s: &str) -> String {
    s.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("Warning: Permanently added"))
        .collect::<Vec<_>>()
        .join("\n")
}
