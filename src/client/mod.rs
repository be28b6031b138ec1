//! Client factory: ssh:// URLs to live chunk-store handles
// (c) 2026 Dolt Authors
//!
//! [`connect`] turns `ssh://[user@]host[:port]/path[/.dolt]` into a
//! [`RemoteChunkStore`](crate::store::RemoteChunkStore): it spawns the ssh
//! subprocess, establishes the multiplexed session over its stdio, wires up
//! the RPC client and the HTTP round-tripper, probes the remote repository
//! once, and hands back a handle whose `close` runs the coordinated
//! teardown.
//!
//! Remote failures are diagnosed from the subprocess's stderr; see
//! [`factory`] for the triage rules.

mod factory;
pub use factory::{SshOptions, SshUrl, TransferConnection, connect, connect_with};
mod http;
pub use http::MuxHttpTransport;
mod process;
pub(crate) use process::{StderrBuffer, TransferProcess};

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Session-scoped cancellation with a recorded cause.
///
/// Cancelling fails every in-flight and future operation that borrowed the
/// session; the cause string becomes their error. Triggers: explicit close
/// (`connection closed`), the session monitor detecting remote exit
/// (`remote process exited`), or the factory caller going away.
#[derive(Clone, Default)]
pub struct SessionContext {
    token: CancellationToken,
    cause: Arc<OnceLock<String>>,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the session. The first cause recorded wins; cancelling twice
    /// is harmless.
    pub fn cancel(&self, cause: &str) {
        let _ = self.cause.set(cause.to_string());
        self.token.cancel();
    }

    /// Resolves when the session has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The recorded cause, once cancelled.
    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        self.cause.get().map(String::as_str)
    }

    /// An error carrying the cancellation cause.
    #[must_use]
    pub fn cause_error(&self) -> anyhow::Error {
        anyhow::anyhow!("{}", self.cause().unwrap_or("session cancelled"))
    }
}
