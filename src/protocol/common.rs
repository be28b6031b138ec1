// (c) 2026 Dolt Authors

//! On-wire message framing
//!
//! All RPC protocol messages are sent in two parts:
//!
//! * [`MessageHeader`] — a fixed-size length prefix
//! * The encoded message
//!
//! Both the header and payload are encoded using [BARE].
//!
//! Each message type carries an encoding limit; the framed readers reject
//! any header announcing a larger payload, so a corrupt or hostile peer
//! cannot provoke unbounded allocation.
//!
//! [BARE]: https://www.ietf.org/archive/id/draft-devault-bare-11.html

use anyhow::Error;
use bytes::BytesMut;
use serde_bare::error::Error as sbError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::MAX_RPC_MESSAGE_SIZE;

/// Marker trait for streams used for sending data
pub trait SendingStream: AsyncWrite + Send + Unpin {}
impl<T: AsyncWrite + Send + Unpin> SendingStream for T {}

/// Marker trait for streams used for receiving data
pub trait ReceivingStream: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin> ReceivingStream for T {}

/// Framing header used on the wire for protocol messages
#[derive(serde::Serialize, serde::Deserialize, PartialEq, Eq, Debug, Default, Clone, Copy)]
pub struct MessageHeader {
    /// Size of the payload that follows the header
    pub size: u32,
}

impl MessageHeader {
    /// The on-wire size of this struct, which is fixed (any change would
    /// constitute a breaking protocol change)
    pub const SIZE: u32 = 4;
}
impl ProtocolMessage for MessageHeader {
    const WIRE_ENCODING_LIMIT: u32 = Self::SIZE;
}

/// Provides I/O functions for all structs taking part in the RPC protocol.
///
/// Callers are expected to use the `..._framed` functions, which include
/// framing. Message structs are not expected to override the provided
/// implementations.
pub trait ProtocolMessage
where
    Self: serde::Serialize + serde::de::DeserializeOwned + Sync,
{
    /// Absolute limit on the wire encoding of this type.
    /// The `from_..._framed` functions reject any attempt to deserialise a
    /// message with a header frame longer than this.
    ///
    /// Defaults to the RPC maximum; chunk-batch messages genuinely get
    /// this large.
    const WIRE_ENCODING_LIMIT: u32 = MAX_RPC_MESSAGE_SIZE as u32;

    /// Checks a proposed payload size against this type's
    /// [`WIRE_ENCODING_LIMIT`](Self::WIRE_ENCODING_LIMIT).
    fn check_size(size: usize) -> Result<(), Error> {
        anyhow::ensure!(
            size <= Self::WIRE_ENCODING_LIMIT as usize,
            "wire message size {} too long for {} (limit: {})",
            size,
            std::any::type_name::<Self>(),
            Self::WIRE_ENCODING_LIMIT
        );
        Ok(())
    }

    /// Creates this struct from a slice of bytes.
    /// The slice must be the correct size for the payload (that's what
    /// [`MessageHeader`] is for).
    fn from_slice(slice: &[u8]) -> Result<Self, sbError> {
        serde_bare::from_slice(slice)
    }

    /// Serializes this struct into a vector of bytes
    fn to_vec(&self) -> Result<Vec<u8>, sbError> {
        serde_bare::to_vec(&self)
    }

    /// Deserializes this struct asynchronously using a given number of bytes
    /// from an async reader.
    fn from_reader_async<R>(
        reader: &mut R,
        size: u32,
    ) -> impl Future<Output = Result<Self, Error>> + Send
    where
        R: AsyncReadExt + Unpin + Send,
    {
        async move {
            let mut buffer = BytesMut::zeroed(size as usize);
            let _ = reader.read_exact(&mut buffer).await?;
            Ok(serde_bare::from_slice(&buffer)?)
        }
    }

    /// Deserializes this struct asynchronously from an async reader by
    /// reading a [`MessageHeader`], then this struct as payload.
    ///
    /// Checks the struct's [`WIRE_ENCODING_LIMIT`](Self::WIRE_ENCODING_LIMIT).
    fn from_reader_async_framed<R>(
        reader: &mut R,
    ) -> impl Future<Output = Result<Self, Error>> + Send
    where
        R: AsyncReadExt + Unpin + Send,
    {
        async {
            let header = MessageHeader::from_reader_async(reader, MessageHeader::SIZE).await?;
            Self::check_size(header.size as usize)?;
            Self::from_reader_async(reader, header.size).await
        }
    }

    /// Serializes this struct asynchronously into an async writer by writing
    /// a [`MessageHeader`], then this struct as payload.
    fn to_writer_async_framed<W>(
        &self,
        writer: &mut W,
    ) -> impl Future<Output = Result<(), Error>> + Send
    where
        W: AsyncWriteExt + Unpin + Send,
    {
        async {
            let vec = self.to_vec()?;
            Self::check_size(vec.len())?;
            #[allow(clippy::cast_possible_truncation)] // already checked
            let header = MessageHeader {
                size: vec.len() as u32,
            }
            .to_vec()?;
            writer.write_all(&header).await?;
            writer.write_all(&vec).await?;
            Ok(writer.flush().await?)
        }
    }
}
