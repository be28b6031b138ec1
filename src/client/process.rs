//! Subprocess management (client side)
// (c) 2026 Dolt Authors

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result, anyhow};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::watch;
use tracing::{debug, warn};

/// The child process (usually ssh) carrying the connection to the remote.
#[derive(Debug)]
pub(crate) struct TransferProcess {
    child: tokio::process::Child,
    stderr: StderrBuffer,
}

impl Drop for TransferProcess {
    fn drop(&mut self) {
        // Tidy up as best we can.
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        let _ = self
            .child
            .start_kill()
            .map_err(|e| warn!("killing transfer subprocess: {e}"));
        let _ = self
            .child
            .try_wait()
            .map_err(|e| warn!("reaping transfer subprocess: {e}"));
    }
}

impl TransferProcess {
    /// Spawns `command` with piped stdio and starts the stderr drainer.
    pub(crate) fn spawn(mut command: tokio::process::Command) -> Result<Self> {
        let _ = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!("spawning command: {command:?}");
        let mut child = command
            .spawn()
            .context("could not launch transfer subprocess")?;

        let pipe = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("could not access subprocess stderr"))?;
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = watch::channel(false);
        drop(tokio::spawn(drain_stderr(pipe, Arc::clone(&buf), done_tx)));

        Ok(Self {
            child,
            stderr: StderrBuffer { buf, done: done_rx },
        })
    }

    /// Accessor for the communication pipes.
    /// Note that this can only be called once; future calls error.
    pub(crate) fn stream_pair(&mut self) -> Result<(ChildStdout, ChildStdin)> {
        Ok((
            self.child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("could not access subprocess stdout"))?,
            self.child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("could not access subprocess stdin"))?,
        ))
    }

    pub(crate) fn stderr(&self) -> StderrBuffer {
        self.stderr.clone()
    }

    /// Kills the subprocess and reaps it. This also guarantees the stderr
    /// drainer's done-signal fires.
    pub(crate) async fn kill_and_wait(&mut self) {
        if let Err(error) = self.child.kill().await {
            warn!("killing transfer subprocess: {error}");
        }
    }
}

/// Mirrors the subprocess's stderr to our own while accumulating a copy for
/// error triage. The done-signal fires at stderr EOF, which is the
/// authoritative sign that the subprocess has terminated.
async fn drain_stderr(
    mut pipe: ChildStderr,
    buf: Arc<Mutex<Vec<u8>>>,
    done: watch::Sender<bool>,
) {
    let mut mirror = tokio::io::stderr();
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let _ = mirror.write_all(&chunk[..n]).await;
                let _ = mirror.flush().await;
                buf.lock().unwrap().extend_from_slice(&chunk[..n]);
            }
        }
    }
    let _ = done.send(true);
}

/// Read side of the stderr drainer. Cheap to clone.
#[derive(Debug, Clone)]
pub(crate) struct StderrBuffer {
    buf: Arc<Mutex<Vec<u8>>>,
    done: watch::Receiver<bool>,
}

impl StderrBuffer {
    /// Waits for stderr EOF, then returns everything the subprocess wrote.
    ///
    /// The buffer's contents are undefined before the done-signal fires;
    /// callers must kill (or otherwise end) the subprocess before calling
    /// this, or it will block for as long as the subprocess lives.
    pub(crate) async fn wait(&self) -> String {
        let mut done = self.done.clone();
        let _ = done.wait_for(|eof| *eof).await;
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }
}
