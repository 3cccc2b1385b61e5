//! Wire format encoding and decoding.
//!
//! Three layouts live here, all Big Endian:
//!
//! Operation header inside a command buffer (4 bytes), followed by
//! `payload_len` bytes of tagged arguments:
//! ```text
//! ┌──────────┬─────────────┐
//! │ Opcode   │ Payload len │
//! │ uint16 BE│ uint16 BE   │
//! └──────────┴─────────────┘
//! ```
//!
//! Reply record header (7 bytes), followed by `value_len` bytes of value:
//! ```text
//! ┌──────────┬───────────┬───────────┐
//! │ Status   │ Value tag │ Value len │
//! │ int32 BE │ 1 byte    │ uint16 BE │
//! └──────────┴───────────┴───────────┘
//! ```
//!
//! Transport frame header (10 bytes), followed by `length` bytes of envelope:
//! ```text
//! ┌─────────┬───────┬──────────┬──────────┐
//! │ Version │ Kind  │ Batch ID │ Length   │
//! │ 1 byte  │ 1 byte│ uint32 BE│ uint32 BE│
//! └─────────┴───────┴──────────┴──────────┘
//! ```

use bytes::BufMut;

use super::types::{Fence, NativeHandle};
use crate::error::{ComposerError, Result};

/// Operation header size in bytes.
pub const OP_HEADER_SIZE: usize = 4;

/// Reply record header size in bytes.
pub const RECORD_HEADER_SIZE: usize = 7;

/// Transport frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 10;

/// Frame layout version written into every transport frame.
pub const FRAME_VERSION: u8 = 1;

/// Largest argument payload a single operation may carry.
pub const MAX_OP_PAYLOAD: usize = u16::MAX as usize;

/// Wire status for a successful operation.
pub const STATUS_OK: i32 = 0;

/// Argument tags inside an operation payload.
pub mod arg_tags {
    pub const U32: u8 = 0x01;
    pub const I32: u8 = 0x02;
    pub const U64: u8 = 0x03;
    pub const F32: u8 = 0x04;
    pub const BOOL: u8 = 0x05;
    /// Index into the handle list, naming a buffer.
    pub const BUFFER: u8 = 0x06;
    /// Index into the handle list, naming a fence.
    pub const FENCE: u8 = 0x07;
    /// Absent fence, no body.
    pub const NO_FENCE: u8 = 0x08;
}

/// Value tags inside a reply record.
pub mod value_tags {
    pub const EMPTY: u8 = 0x00;
    pub const U32: u8 = 0x01;
    pub const U64: u8 = 0x02;
    pub const READBACK_ATTRIBUTES: u8 = 0x03;
    pub const METADATA_KEYS: u8 = 0x04;
    /// Index into the reply handle list.
    pub const FENCE: u8 = 0x05;

    /// Fixed body length for a tag, `None` for variable-length tags.
    pub fn fixed_len(tag: u8) -> Option<usize> {
        match tag {
            EMPTY => Some(0),
            U32 | FENCE => Some(4),
            U64 | READBACK_ATTRIBUTES => Some(8),
            _ => None,
        }
    }
}

/// Transport frame kinds.
pub mod frame_kind {
    /// Client → service: highest version the client speaks.
    pub const HELLO: u8 = 1;
    /// Service → client: highest version the service speaks.
    pub const HELLO_ACK: u8 = 2;
    /// Client → service: one command batch.
    pub const EXECUTE: u8 = 3;
    /// Service → client: the reply to one batch.
    pub const REPLY: u8 = 4;

    /// Check a kind byte against the known set.
    #[inline]
    pub fn is_known(kind: u8) -> bool {
        (HELLO..=REPLY).contains(&kind)
    }
}

/// One argument of an operation payload.
///
/// Handle-bearing variants are never inlined: the writer moves the token to
/// the parallel handle list and encodes its index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
    Bool(bool),
    Buffer(NativeHandle),
    Fence(Option<Fence>),
}

impl Arg {
    /// Encoded size of this argument including its tag.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Arg::U32(_) | Arg::I32(_) | Arg::F32(_) => 4,
            Arg::U64(_) => 8,
            Arg::Bool(_) => 1,
            Arg::Buffer(_) | Arg::Fence(Some(_)) => 4,
            Arg::Fence(None) => 0,
        }
    }

    /// Whether this argument occupies a slot in the handle list.
    #[inline]
    pub fn uses_handle(&self) -> bool {
        matches!(self, Arg::Buffer(_) | Arg::Fence(Some(_)))
    }
}

/// Header of one operation in a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    /// Raw opcode value.
    pub opcode: u16,
    /// Length of the tagged argument payload.
    pub payload_len: u16,
}

impl OpHeader {
    /// Create a new operation header.
    pub fn new(opcode: u16, payload_len: u16) -> Self {
        Self {
            opcode,
            payload_len,
        }
    }

    /// Append the header to a buffer.
    pub fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.opcode);
        buf.put_u16(self.payload_len);
    }

    /// Decode a header, `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < OP_HEADER_SIZE {
            return None;
        }
        Some(Self {
            opcode: u16::from_be_bytes([buf[0], buf[1]]),
            payload_len: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }
}

/// Header of one record in a reply buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Operation status, [`STATUS_OK`] on success.
    pub status: i32,
    /// Value tag (see [`value_tags`]).
    pub value_tag: u8,
    /// Length of the value body.
    pub value_len: u16,
}

impl RecordHeader {
    /// Create a new record header.
    pub fn new(status: i32, value_tag: u8, value_len: u16) -> Self {
        Self {
            status,
            value_tag,
            value_len,
        }
    }

    /// Append the header to a buffer.
    pub fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.status);
        buf.put_u8(self.value_tag);
        buf.put_u16(self.value_len);
    }

    /// Decode a header, `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < RECORD_HEADER_SIZE {
            return None;
        }
        Some(Self {
            status: i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            value_tag: buf[4],
            value_len: u16::from_be_bytes([buf[5], buf[6]]),
        })
    }

    /// Check tag/length/status consistency.
    ///
    /// Checks:
    /// - The value tag is known
    /// - Fixed-size tags carry exactly their size, metadata keys a multiple of 4
    /// - Error statuses carry no value
    pub fn validate(&self) -> Result<()> {
        let len = self.value_len as usize;
        match value_tags::fixed_len(self.value_tag) {
            Some(expected) if expected != len => {
                return Err(ComposerError::MalformedReply(format!(
                    "value tag {:#04x} expects {} bytes, length prefix says {}",
                    self.value_tag, expected, len
                )));
            }
            Some(_) => {}
            None if self.value_tag == value_tags::METADATA_KEYS => {
                if len % 4 != 0 {
                    return Err(ComposerError::MalformedReply(format!(
                        "metadata key list length {} is not a multiple of 4",
                        len
                    )));
                }
            }
            None => {
                return Err(ComposerError::MalformedReply(format!(
                    "unknown value tag {:#04x}",
                    self.value_tag
                )));
            }
        }

        if self.status != STATUS_OK && self.value_tag != value_tags::EMPTY {
            return Err(ComposerError::MalformedReply(format!(
                "error status {} carries a value",
                self.status
            )));
        }

        Ok(())
    }
}

/// Header of a transport frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame layout version.
    pub version: u8,
    /// Frame kind (see [`frame_kind`]).
    pub kind: u8,
    /// Batch sequence number, echoed by the reply.
    pub batch_id: u32,
    /// Payload length in bytes.
    pub length: u32,
}

impl FrameHeader {
    /// Create a header for the current frame layout version.
    pub fn new(kind: u8, batch_id: u32, length: u32) -> Self {
        Self {
            version: FRAME_VERSION,
            kind,
            batch_id,
            length,
        }
    }

    /// Encode header to bytes.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0] = self.version;
        buf[1] = self.kind;
        buf[2..6].copy_from_slice(&self.batch_id.to_be_bytes());
        buf[6..10].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode header from bytes, `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: buf[0],
            kind: buf[1],
            batch_id: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            length: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        })
    }

    /// Validate the header of a received frame.
    ///
    /// Checks:
    /// - The layout version matches
    /// - The kind is known
    /// - The payload doesn't exceed `max_payload`
    pub fn validate(&self, max_payload: u32) -> Result<()> {
        if self.version != FRAME_VERSION {
            return Err(ComposerError::MalformedReply(format!(
                "frame version {} (expected {})",
                self.version, FRAME_VERSION
            )));
        }
        if !frame_kind::is_known(self.kind) {
            return Err(ComposerError::MalformedReply(format!(
                "unknown frame kind {}",
                self.kind
            )));
        }
        if self.length > max_payload {
            return Err(ComposerError::MalformedReply(format!(
                "Payload size {} exceeds maximum {}",
                self.length, max_payload
            )));
        }
        Ok(())
    }
}
