// (c) 2026 Dolt Authors

//! SSH-tunneled remote transport for a version-controlled database.
//!
//! `dolt` repositories can be cloned, fetched, pushed and pulled across any
//! host reachable over `ssh`, with no daemon and no open port on the far
//! side. The client spawns an `ssh` subprocess that runs a hidden `transfer`
//! subcommand on the remote host, then multiplexes two wire protocols over
//! the single byte pipe ssh provides:
//!
//! * a chunk-store RPC service for metadata and chunk coordination, and
//! * an HTTP file-transfer endpoint for large immutable table files.
//!
//! ## Overview
//!
//! 1. [`client::connect`] parses an `ssh://` URL and spawns
//!    `ssh [-p port] [user@]host "dolt --data-dir <path> transfer"`.
//! 2. Both sides wrap their end of the pipe in a [`mux::MuxSession`]:
//!    every RPC call and every HTTP request gets its own ordered substream
//!    with independent flow control.
//! 3. The server binds the session to the repository at `--data-dir` and
//!    serves both protocols from the same pipe; the first byte of each
//!    substream selects which one.
//! 4. When either side goes away, the session tears down and every
//!    outstanding operation unblocks with an error derived from the remote's
//!    stderr.
//!
//! Authentication, host-key handling and encryption are wholly delegated to
//! the user's `ssh` configuration; this crate never implements its own.
//!
//! ## Environment
//!
//! * `DOLT_SSH` — ssh client binary, may include leading arguments
//!   (whitespace-separated). Default `ssh`.
//! * `DOLT_SSH_EXEC_PATH` — path of the dolt binary on the remote host.
//!   Default `dolt`.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub(crate) mod cli;
pub use cli::cli as main;

pub mod client;
pub mod mux;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod store;
pub(crate) mod util;
