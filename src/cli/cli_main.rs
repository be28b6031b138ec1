//! Main CLI entrypoint
// (c) 2026 Dolt Authors

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser as _;

use super::args::{CliArgs, Command};
use crate::store::FsStore;

/// Main CLI entrypoint
///
/// Call this from `main`. It reads argv.
#[must_use]
pub fn cli() -> ExitCode {
    match cli_inner() {
        Ok(code) => code,
        Err(e) => {
            if crate::util::tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else {
                eprintln!("error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn cli_inner() -> anyhow::Result<ExitCode> {
    let args = CliArgs::parse();
    let trace_level = if args.debug { "debug" } else { "info" };
    // Everything we log goes to stderr. For the transfer command that is
    // load-bearing: stderr is the client's only diagnostic channel.
    crate::util::setup_tracing(trace_level)?;

    match args.command {
        Command::Transfer => {
            // The repository load happens here, before the session starts,
            // so a bad --data-dir produces one clean line on stderr and a
            // nonzero exit instead of a half-open session.
            let store = match FsStore::load(&args.data_dir).await {
                Ok(store) => Arc::new(store),
                Err(error) => {
                    eprintln!("failed to load database: {error:#}");
                    return Ok(ExitCode::FAILURE);
                }
            };
            crate::server::transfer_main(store).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
