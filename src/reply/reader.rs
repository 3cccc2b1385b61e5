//! Reply stream decoder.
//!
//! A reply is a positional sequence of records, one per operation that
//! produces output, in enqueue order. Records carry no operation tag: the
//! executor pairs the Nth record with the Nth output-producing operation.
//!
//! [`ReplyReader`] takes ownership of the reply, so each reply can be walked
//! exactly once.
//!
//! # Example
//!
//! ```
//! use composer_client::protocol::{ErrorCode, Fence};
//! use composer_client::reply::{ReplyReader, ReplyRecord, ReplyValue, ReplyWriter};
//!
//! let mut writer = ReplyWriter::new();
//! writer.ok();
//! writer.failure(ErrorCode::BadDisplay).unwrap();
//! writer.value(&ReplyValue::Fence(Fence(3))).unwrap();
//!
//! let records: Vec<ReplyRecord> = ReplyReader::new(writer.finish())
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(records[1], ReplyRecord::Failure(ErrorCode::BadDisplay));
//! assert_eq!(records[2], ReplyRecord::Success(ReplyValue::Fence(Fence(3))));
//! ```

use bytes::{Buf, Bytes};

use crate::error::{ComposerError, Result};
use crate::protocol::{
    value_tags, Dataspace, ErrorCode, Fence, HandleToken, PerFrameMetadataKey, PixelFormat,
    ReadbackAttributes, RecordHeader, ReplyKind, RECORD_HEADER_SIZE, STATUS_OK,
};

/// Reply bytes plus the handles the service sent alongside them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReply {
    /// Encoded records.
    pub bytes: Bytes,
    /// Handle list referenced by index from `bytes`.
    pub handles: Vec<HandleToken>,
}

impl RawReply {
    /// Create a reply from its parts.
    pub fn new(bytes: Bytes, handles: Vec<HandleToken>) -> Self {
        Self { bytes, handles }
    }
}

/// Value carried by a successful record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyValue {
    /// Status-only success.
    Empty,
    U32(u32),
    U64(u64),
    ReadbackAttributes(ReadbackAttributes),
    MetadataKeys(Vec<PerFrameMetadataKey>),
    Fence(Fence),
}

impl ReplyValue {
    /// The reply kind an operation must declare to accept this value.
    pub fn kind(&self) -> ReplyKind {
        match self {
            ReplyValue::Empty => ReplyKind::Status,
            ReplyValue::U32(_) => ReplyKind::U32,
            ReplyValue::U64(_) => ReplyKind::U64,
            ReplyValue::ReadbackAttributes(_) => ReplyKind::ReadbackAttributes,
            ReplyValue::MetadataKeys(_) => ReplyKind::MetadataKeys,
            ReplyValue::Fence(_) => ReplyKind::Fence,
        }
    }
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyRecord {
    /// The operation succeeded.
    Success(ReplyValue),
    /// The operation failed with a service status.
    Failure(ErrorCode),
}

/// Single-pass iterator over the records of a reply.
///
/// Yields `Err(MalformedReply)` once and then stops.
#[derive(Debug)]
pub struct ReplyReader {
    buf: Bytes,
    handles: Vec<HandleToken>,
    failed: bool,
}

impl ReplyReader {
    /// Take ownership of a reply for decoding.
    pub fn new(reply: RawReply) -> Self {
        Self {
            buf: reply.bytes,
            handles: reply.handles,
            failed: false,
        }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn read_record(&mut self) -> Result<ReplyRecord> {
        let header = RecordHeader::decode(&self.buf).ok_or_else(|| {
            ComposerError::MalformedReply(format!(
                "stream ends mid-record ({} of {} header bytes)",
                self.buf.len(),
                RECORD_HEADER_SIZE
            ))
        })?;
        header.validate()?;

        let len = header.value_len as usize;
        if self.buf.len() - RECORD_HEADER_SIZE < len {
            return Err(ComposerError::MalformedReply(format!(
                "length prefix {} exceeds the {} remaining bytes",
                len,
                self.buf.len() - RECORD_HEADER_SIZE
            )));
        }

        self.buf.advance(RECORD_HEADER_SIZE);
        let mut body = self.buf.split_to(len);

        if header.status != STATUS_OK {
            return Ok(ReplyRecord::Failure(ErrorCode::from_i32(header.status)));
        }

        let value = match header.value_tag {
            value_tags::EMPTY => ReplyValue::Empty,
            value_tags::U32 => ReplyValue::U32(body.get_u32()),
            value_tags::U64 => ReplyValue::U64(body.get_u64()),
            value_tags::READBACK_ATTRIBUTES => {
                let format = PixelFormat(body.get_i32());
                let dataspace = Dataspace(body.get_i32());
                ReplyValue::ReadbackAttributes(ReadbackAttributes { format, dataspace })
            }
            value_tags::METADATA_KEYS => {
                let mut keys = Vec::with_capacity(len / 4);
                while body.has_remaining() {
                    keys.push(PerFrameMetadataKey::from_i32(body.get_i32()));
                }
                ReplyValue::MetadataKeys(keys)
            }
            value_tags::FENCE => {
                let index = body.get_u32();
                match self.handles.get(index as usize) {
                    Some(HandleToken::Fence(fence)) => ReplyValue::Fence(*fence),
                    Some(HandleToken::Buffer(_)) => {
                        return Err(ComposerError::MalformedReply(format!(
                            "handle {} is a buffer, expected a fence",
                            index
                        )));
                    }
                    None => {
                        return Err(ComposerError::MalformedReply(format!(
                            "handle index {} outside reply handle list of {}",
                            index,
                            self.handles.len()
                        )));
                    }
                }
            }
            // validate() rejects every other tag
            other => {
                return Err(ComposerError::MalformedReply(format!(
                    "unknown value tag {:#04x}",
                    other
                )));
            }
        };

        Ok(ReplyRecord::Success(value))
    }
}

impl Iterator for ReplyReader {
    type Item = Result<ReplyRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        let result = self.read_record();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

impl std::iter::FusedIterator for ReplyReader {}
