//! Framed connection over a tokio byte stream.
//!
//! Every message is one frame (see [`FrameHeader`]) whose payload is a MsgPack
//! envelope. A connection starts with a HELLO/HELLO_ACK exchange that settles
//! the protocol version, then carries strictly alternating EXECUTE/REPLY
//! frames.
//!
//! # Example
//!
//! ```ignore
//! use composer_client::protocol::ProtocolVersion;
//! use composer_client::transport::FramedConnection;
//! use tokio::net::UnixStream;
//!
//! let stream = UnixStream::connect("/run/composer.sock").await?;
//! let connection = FramedConnection::negotiate(stream, ProtocolVersion::LATEST).await?;
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{BoxFuture, ServiceConnection};
use crate::codec::{Envelope, Hello, MsgPackCodec, OutboundEnvelope};
use crate::command::CommandBuffer;
use crate::error::{ComposerError, Result};
use crate::protocol::{frame_kind, FrameHeader, ProtocolVersion, FRAME_HEADER_SIZE};
use crate::reply::RawReply;

/// Default maximum reply frame payload (1MB).
pub const DEFAULT_MAX_REPLY_SIZE: u32 = 1024 * 1024;

fn transport_error(context: &str, err: std::io::Error) -> ComposerError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        ComposerError::TransportFailure(format!("{}: connection closed", context))
    } else {
        ComposerError::TransportFailure(format!("{}: {}", context, err))
    }
}

/// Write one frame and flush.
///
/// # Errors
///
/// `TransportFailure` on any I/O error, `EncodingOverflow` if the payload
/// does not fit the 32-bit length field.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    kind: u8,
    batch_id: u32,
    payload: &[u8],
) -> Result<()> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        ComposerError::EncodingOverflow(format!("frame payload of {} bytes", payload.len()))
    })?;
    let header = FrameHeader::new(kind, batch_id, length);

    stream
        .write_all(&header.encode())
        .await
        .map_err(|e| transport_error("write frame header", e))?;
    stream
        .write_all(payload)
        .await
        .map_err(|e| transport_error("write frame payload", e))?;
    stream
        .flush()
        .await
        .map_err(|e| transport_error("flush frame", e))
}

/// Read one complete frame.
///
/// # Errors
///
/// `TransportFailure` on I/O errors or EOF, `MalformedReply` if the header
/// is invalid or announces more than `max_payload` bytes.
pub async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_payload: u32,
) -> Result<(FrameHeader, Bytes)> {
    let mut raw = [0u8; FRAME_HEADER_SIZE];
    stream
        .read_exact(&mut raw)
        .await
        .map_err(|e| transport_error("read frame header", e))?;

    let header = FrameHeader::decode(&raw).ok_or_else(|| {
        ComposerError::MalformedReply("short frame header".to_string())
    })?;
    header.validate(max_payload)?;

    let mut payload = vec![0u8; header.length as usize];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| transport_error("read frame payload", e))?;

    Ok((header, Bytes::from(payload)))
}

/// [`ServiceConnection`] over a byte stream.
pub struct FramedConnection<S> {
    stream: S,
    version: ProtocolVersion,
    max_reply_size: u32,
    /// Set while a round trip is outstanding; still set after an abandoned one.
    in_flight: bool,
}

impl<S> FramedConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Negotiate a version with the service, then return the connection.
    ///
    /// The agreed version is the lower of `ours` and the service's.
    pub async fn negotiate(mut stream: S, ours: ProtocolVersion) -> Result<Self> {
        let hello = MsgPackCodec::encode(&Hello {
            version: ours.as_u16(),
        })?;
        write_frame(&mut stream, frame_kind::HELLO, 0, &hello).await?;

        let (header, payload) = read_frame(&mut stream, DEFAULT_MAX_REPLY_SIZE).await?;
        if header.kind != frame_kind::HELLO_ACK {
            return Err(ComposerError::MalformedReply(format!(
                "expected HELLO_ACK, got frame kind {}",
                header.kind
            )));
        }
        let theirs: Hello = MsgPackCodec::decode(&payload)
            .map_err(|e| ComposerError::MalformedReply(format!("HELLO_ACK: {}", e)))?;
        let theirs = ProtocolVersion::from_u16(theirs.version).ok_or_else(|| {
            ComposerError::MalformedReply("service advertised version 0".to_string())
        })?;

        let version = ours.min(theirs);
        tracing::debug!("Negotiated composer protocol {} (service speaks {})", version, theirs);

        Ok(Self::with_version(stream, version))
    }

    /// Wrap a stream whose version was settled out of band.
    pub fn with_version(stream: S, version: ProtocolVersion) -> Self {
        Self {
            stream,
            version,
            max_reply_size: DEFAULT_MAX_REPLY_SIZE,
            in_flight: false,
        }
    }

    /// Set the largest reply frame accepted.
    ///
    /// Default: 1MB
    pub fn max_reply_size(mut self, limit: u32) -> Self {
        self.max_reply_size = limit;
        self
    }

    /// Whether an abandoned round trip left the stream unusable.
    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.in_flight
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn round_trip(&mut self, batch_id: u32, batch: CommandBuffer) -> Result<RawReply> {
        if self.in_flight {
            return Err(ComposerError::TransportFailure(
                "an abandoned round trip left the connection out of sync".to_string(),
            ));
        }

        let payload = MsgPackCodec::encode(&OutboundEnvelope::from_batch(&batch))
            .map_err(|e| ComposerError::TransportFailure(format!("encode batch: {}", e)))?;

        self.in_flight = true;
        write_frame(&mut self.stream, frame_kind::EXECUTE, batch_id, &payload).await?;
        let (header, body) = read_frame(&mut self.stream, self.max_reply_size).await?;
        // A whole frame was consumed, so the stream is in sync again.
        self.in_flight = false;

        if header.kind != frame_kind::REPLY {
            return Err(ComposerError::MalformedReply(format!(
                "expected REPLY, got frame kind {}",
                header.kind
            )));
        }
        if header.batch_id != batch_id {
            return Err(ComposerError::MalformedReply(format!(
                "reply for batch {} while waiting for batch {}",
                header.batch_id, batch_id
            )));
        }

        let envelope: Envelope = MsgPackCodec::decode(&body)
            .map_err(|e| ComposerError::MalformedReply(format!("reply envelope: {}", e)))?;
        Ok(envelope.into_reply())
    }
}

impl<S> ServiceConnection for FramedConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn send(&mut self, batch_id: u32, batch: CommandBuffer) -> BoxFuture<'_, Result<RawReply>> {
        Box::pin(self.round_trip(batch_id, batch))
    }
}
