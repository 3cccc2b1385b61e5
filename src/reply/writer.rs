//! Reply stream encoder, used by services answering a batch.

use bytes::{BufMut, BytesMut};

use crate::error::{ComposerError, Result};
use crate::protocol::{value_tags, ErrorCode, HandleToken, RecordHeader, STATUS_OK};

use super::reader::{RawReply, ReplyRecord, ReplyValue};

/// Builds the records and handle list of one reply.
#[derive(Debug, Default)]
pub struct ReplyWriter {
    buffer: BytesMut,
    handles: Vec<HandleToken>,
}

impl ReplyWriter {
    /// Create an empty reply.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a status-only success.
    pub fn ok(&mut self) {
        RecordHeader::new(STATUS_OK, value_tags::EMPTY, 0).put(&mut self.buffer);
    }

    /// Append a failure record.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for `ErrorCode::Other(0)`, which would read back as
    /// a success.
    pub fn failure(&mut self, code: ErrorCode) -> Result<()> {
        let status = code.as_i32();
        if status == STATUS_OK {
            return Err(ComposerError::InvalidArgument(
                "failure status must be non-zero".to_string(),
            ));
        }
        RecordHeader::new(status, value_tags::EMPTY, 0).put(&mut self.buffer);
        Ok(())
    }

    /// Append a success carrying `value`.
    ///
    /// # Errors
    ///
    /// `EncodingOverflow` if a metadata key list does not fit a record.
    pub fn value(&mut self, value: &ReplyValue) -> Result<()> {
        match value {
            ReplyValue::Empty => self.ok(),
            ReplyValue::U32(v) => {
                RecordHeader::new(STATUS_OK, value_tags::U32, 4).put(&mut self.buffer);
                self.buffer.put_u32(*v);
            }
            ReplyValue::U64(v) => {
                RecordHeader::new(STATUS_OK, value_tags::U64, 8).put(&mut self.buffer);
                self.buffer.put_u64(*v);
            }
            ReplyValue::ReadbackAttributes(attrs) => {
                RecordHeader::new(STATUS_OK, value_tags::READBACK_ATTRIBUTES, 8)
                    .put(&mut self.buffer);
                self.buffer.put_i32(attrs.format.0);
                self.buffer.put_i32(attrs.dataspace.0);
            }
            ReplyValue::MetadataKeys(keys) => {
                let len = u16::try_from(keys.len() * 4).map_err(|_| {
                    ComposerError::EncodingOverflow(format!(
                        "{} metadata keys do not fit one record",
                        keys.len()
                    ))
                })?;
                RecordHeader::new(STATUS_OK, value_tags::METADATA_KEYS, len)
                    .put(&mut self.buffer);
                for key in keys {
                    self.buffer.put_i32(key.as_i32());
                }
            }
            ReplyValue::Fence(fence) => {
                let index = self.handles.len() as u32;
                self.handles.push(HandleToken::Fence(*fence));
                RecordHeader::new(STATUS_OK, value_tags::FENCE, 4).put(&mut self.buffer);
                self.buffer.put_u32(index);
            }
        }
        Ok(())
    }

    /// Append a decoded record as-is.
    pub fn record(&mut self, record: &ReplyRecord) -> Result<()> {
        match record {
            ReplyRecord::Success(value) => self.value(value),
            ReplyRecord::Failure(code) => self.failure(*code),
        }
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no record has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Finish the reply.
    pub fn finish(self) -> RawReply {
        RawReply::new(self.buffer.freeze(), self.handles)
    }
}
