//! Wire protocols spoken inside the ssh tunnel
// (c) 2026 Dolt Authors
//!
//! Two unrelated protocols share the tunnel, multiplexed onto independent
//! substreams by [`crate::mux`]:
//!
//! * the chunk-store RPC service ([`service`]), one substream per call;
//! * HTTP/1.1 file transfer, one substream per request.
//!
//! The first byte of every substream is a [`StreamScheme`] selector, so the
//! server can dispatch without sniffing protocol internals.

pub mod common;
pub mod service;

/// Virtual hostname for HTTP requests that must travel through the
/// multiplexed session rather than the network. URLs handed out by the RPC
/// service name this host; the client refuses to dial anything else.
pub const TRANSFER_HOST: &str = "transfer.local";

/// Upper bound on a single RPC message.
///
/// The mux session's receive window and stream buffer are sized to this same
/// value; anything smaller deadlocks under large chunk-batch messages.
pub const MAX_RPC_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

/// First byte of every substream: which protocol the stream speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamScheme {
    /// Chunk-store RPC (framed BARE messages).
    Rpc = b'R',
    /// HTTP/1.1 file transfer.
    Http = b'H',
}

impl TryFrom<u8> for StreamScheme {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'R' => Ok(StreamScheme::Rpc),
            b'H' => Ok(StreamScheme::Http),
            b => Err(anyhow::anyhow!("unknown substream scheme byte {b:#04x}")),
        }
    }
}
