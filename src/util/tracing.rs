//! Tracing helpers
// (c) 2026 Dolt Authors

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Environment variable that controls what gets logged to stderr
const STANDARD_ENV_VAR: &str = "RUST_LOG";

/// Log filter setup:
/// use `RUST_LOG` if present; otherwise log only our own items at the given
/// trace level.
fn filter_for(trace_level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_env(STANDARD_ENV_VAR) {
        Ok(filter) => Ok(filter),
        Err(e) => {
            // The env var was unset or invalid. Which is it?
            if std::env::var(STANDARD_ENV_VAR).is_ok() {
                anyhow::bail!("{STANDARD_ENV_VAR} (set in environment) was not understood: {e}");
            }
            // It was unset. Fall back.
            Ok(EnvFilter::try_new(format!("dolt={trace_level}"))?)
        }
    }
}

/// Initialises the tracing subsystem, writing to stderr.
///
/// Idempotent: later calls are no-ops, so library consumers that install
/// their own subscriber first keep it.
pub(crate) fn setup(trace_level: &str) -> anyhow::Result<()> {
    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    let filter = filter_for(trace_level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("initialising tracing")?;
    Ok(())
}

pub(crate) fn is_initialized() -> bool {
    TRACING_INITIALIZED.load(Ordering::SeqCst)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::filter_for;

    #[test]
    fn fallback_filter_parses() {
        // With RUST_LOG unset (the normal test environment), the fallback
        // filter must build cleanly at every level we use.
        if std::env::var("RUST_LOG").is_ok() {
            return; // can't assert anything useful without mutating the env
        }
        for level in ["info", "debug", "trace"] {
            let _ = filter_for(level).unwrap();
        }
    }
}
