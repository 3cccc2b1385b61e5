//! Error types for composer-client.

use thiserror::Error;

use crate::protocol::{ErrorCode, Opcode, ProtocolVersion};

/// Main error type for all composer operations.
#[derive(Debug, Error)]
pub enum ComposerError {
    /// Appending would exceed the configured batch bounds.
    #[error("Encoding overflow: {0}")]
    EncodingOverflow(String),

    /// The reply stream is corrupt; the whole batch is discarded.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// A command buffer could not be decoded (service side).
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// Connection lost, timed out or otherwise unusable.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Accessor read before execution, or for an operation never enqueued.
    #[error("Result not available: {0}")]
    ResultNotAvailable(String),

    /// Structural argument validation failed at the call site.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection does not speak the protocol version required.
    #[error("Unsupported version: requires {required}, connection speaks {available}")]
    UnsupportedVersion {
        required: ProtocolVersion,
        available: ProtocolVersion,
    },

    /// The service executed the operation and reported an error status.
    #[error("{opcode:?} failed with {code}")]
    OperationFailed { opcode: Opcode, code: ErrorCode },

    /// The batch containing the operation never completed a round trip.
    #[error("Operation outcome unknown")]
    OutcomeUnknown,

    /// MsgPack serialization error (transport envelope).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (transport envelope).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Result type alias using ComposerError.
pub type Result<T> = std::result::Result<T, ComposerError>;
