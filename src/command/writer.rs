//! Command stream encoder.
//!
//! Operations are appended into a single `BytesMut` in the layout described
//! in [`crate::protocol`]. Buffer and fence arguments are moved to a parallel
//! handle list and only their index is written into the byte stream, since
//! native resources cannot travel as scalars.
//!
//! # Example
//!
//! ```
//! use composer_client::command::{BatchLimits, CommandWriter};
//! use composer_client::protocol::{Arg, Fence, NativeHandle, Opcode};
//!
//! let mut writer = CommandWriter::new(BatchLimits::default());
//! writer
//!     .append(
//!         Opcode::SetReadbackBuffer,
//!         &[Arg::U64(1), Arg::Buffer(NativeHandle(40)), Arg::Fence(Some(Fence(41)))],
//!     )
//!     .unwrap();
//!
//! assert_eq!(writer.len(), 1);
//! assert_eq!(writer.handles().len(), 2);
//!
//! let batch = writer.flush();
//! assert!(writer.is_empty());
//! assert_eq!(batch.opcodes, vec![Opcode::SetReadbackBuffer]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ComposerError, Result};
use crate::protocol::{
    arg_tags, Arg, HandleToken, OpHeader, Opcode, MAX_OP_PAYLOAD, OP_HEADER_SIZE,
};

use super::reader::CommandReader;

/// Default maximum operations per batch.
pub const DEFAULT_MAX_OPERATIONS: usize = 256;

/// Default maximum encoded bytes per batch (64KB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 64 * 1024;

/// Bounds applied to every batch.
///
/// Bounded batches keep a single round trip short enough to fit the
/// display refresh pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum operations in one batch.
    pub max_operations: usize,
    /// Maximum encoded bytes in one batch.
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

/// A flushed batch: encoded operations plus their out-of-band handles.
///
/// Moved from the writer to the executor; never copied.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBuffer {
    /// Encoded operations.
    pub bytes: Bytes,
    /// Handle list referenced by index from `bytes`.
    pub handles: Vec<HandleToken>,
    /// Opcode of each operation, in enqueue order.
    pub opcodes: Vec<Opcode>,
}

impl CommandBuffer {
    /// Number of operations in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    /// Whether the batch holds no operations.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Number of operations that will produce a reply record.
    pub fn expected_records(&self) -> usize {
        self.opcodes
            .iter()
            .filter(|op| op.reply_kind().produces_record())
            .count()
    }

    /// Decode the operations back out of the buffer.
    pub fn reader(&self) -> CommandReader<'_> {
        CommandReader::new(&self.bytes, &self.handles)
    }
}

/// Encoder for one batch of operations.
#[derive(Debug)]
pub struct CommandWriter {
    /// Encoded operations.
    buffer: BytesMut,
    /// Parallel handle list.
    handles: Vec<HandleToken>,
    /// Opcode per appended operation.
    opcodes: Vec<Opcode>,
    /// Batch bounds.
    limits: BatchLimits,
}

impl CommandWriter {
    /// Create an empty writer with the given bounds.
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(limits.max_bytes.min(DEFAULT_MAX_BATCH_BYTES)),
            handles: Vec::new(),
            opcodes: Vec::new(),
            limits,
        }
    }

    /// Append one operation.
    ///
    /// Returns the position of the operation within the batch. On error the
    /// writer is left exactly as it was.
    ///
    /// # Errors
    ///
    /// `EncodingOverflow` if the operation count, the batch byte size or the
    /// per-operation payload size would exceed its bound.
    pub fn append(&mut self, opcode: Opcode, args: &[Arg]) -> Result<usize> {
        if self.opcodes.len() >= self.limits.max_operations {
            return Err(ComposerError::EncodingOverflow(format!(
                "batch already holds {} operations (max {})",
                self.opcodes.len(),
                self.limits.max_operations
            )));
        }

        let payload_len: usize = args.iter().map(Arg::encoded_len).sum();
        if payload_len > MAX_OP_PAYLOAD {
            return Err(ComposerError::EncodingOverflow(format!(
                "{:?} payload of {} bytes exceeds {}",
                opcode, payload_len, MAX_OP_PAYLOAD
            )));
        }

        let total = OP_HEADER_SIZE + payload_len;
        if self.buffer.len() + total > self.limits.max_bytes {
            return Err(ComposerError::EncodingOverflow(format!(
                "batch of {} bytes cannot take {} more (max {})",
                self.buffer.len(),
                total,
                self.limits.max_bytes
            )));
        }

        self.buffer.reserve(total);
        OpHeader::new(opcode.code(), payload_len as u16).put(&mut self.buffer);
        for arg in args {
            self.put_arg(*arg);
        }
        self.opcodes.push(opcode);

        Ok(self.opcodes.len() - 1)
    }

    fn put_arg(&mut self, arg: Arg) {
        match arg {
            Arg::U32(v) => {
                self.buffer.put_u8(arg_tags::U32);
                self.buffer.put_u32(v);
            }
            Arg::I32(v) => {
                self.buffer.put_u8(arg_tags::I32);
                self.buffer.put_i32(v);
            }
            Arg::U64(v) => {
                self.buffer.put_u8(arg_tags::U64);
                self.buffer.put_u64(v);
            }
            Arg::F32(v) => {
                self.buffer.put_u8(arg_tags::F32);
                self.buffer.put_f32(v);
            }
            Arg::Bool(v) => {
                self.buffer.put_u8(arg_tags::BOOL);
                self.buffer.put_u8(u8::from(v));
            }
            Arg::Buffer(handle) => {
                let index = self.push_handle(HandleToken::Buffer(handle));
                self.buffer.put_u8(arg_tags::BUFFER);
                self.buffer.put_u32(index);
            }
            Arg::Fence(Some(fence)) => {
                let index = self.push_handle(HandleToken::Fence(fence));
                self.buffer.put_u8(arg_tags::FENCE);
                self.buffer.put_u32(index);
            }
            Arg::Fence(None) => self.buffer.put_u8(arg_tags::NO_FENCE),
        }
    }

    fn push_handle(&mut self, token: HandleToken) -> u32 {
        // Every handle costs 5 encoded bytes, so max_bytes bounds the index well below u32::MAX.
        let index = self.handles.len() as u32;
        self.handles.push(token);
        index
    }

    /// Move the current batch out, leaving the writer empty.
    pub fn flush(&mut self) -> CommandBuffer {
        CommandBuffer {
            bytes: self.buffer.split().freeze(),
            handles: std::mem::take(&mut self.handles),
            opcodes: std::mem::take(&mut self.opcodes),
        }
    }

    /// Discard the current batch, keeping allocated capacity.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.handles.clear();
        self.opcodes.clear();
    }

    /// Number of operations appended since the last flush/reset.
    #[inline]
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    /// Whether no operation is pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Encoded bytes of the pending batch.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Handle list of the pending batch.
    #[inline]
    pub fn handles(&self) -> &[HandleToken] {
        &self.handles
    }

    /// Opcodes of the pending batch.
    #[inline]
    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }

    /// Configured bounds.
    #[inline]
    pub fn limits(&self) -> BatchLimits {
        self.limits
    }
}

impl Default for CommandWriter {
    fn default() -> Self {
        Self::new(BatchLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Fence, NativeHandle};

    fn limits(max_operations: usize, max_bytes: usize) -> BatchLimits {
        BatchLimits {
            max_operations,
            max_bytes,
        }
    }

    #[test]
    fn test_append_layout() {
        let mut writer = CommandWriter::default();
        writer
            .append(Opcode::SetActiveConfig, &[Arg::U64(1), Arg::U32(7)])
            .unwrap();

        let bytes = writer.as_bytes();
        // header: opcode 0x0104, payload 9 + 5
        assert_eq!(&bytes[..4], &[0x01, 0x04, 0x00, 14]);
        assert_eq!(bytes[4], arg_tags::U64);
        assert_eq!(&bytes[5..13], &1u64.to_be_bytes());
        assert_eq!(bytes[13], arg_tags::U32);
        assert_eq!(&bytes[14..18], &7u32.to_be_bytes());
        assert_eq!(bytes.len(), 18);
    }

    #[test]
    fn test_handles_are_indexed_not_inlined() {
        let mut writer = CommandWriter::default();
        writer
            .append(
                Opcode::SetReadbackBuffer,
                &[
                    Arg::U64(1),
                    Arg::Buffer(NativeHandle(0xAAAA_BBBB_CCCC_DDDD)),
                    Arg::Fence(Some(Fence(0x1234))),
                ],
            )
            .unwrap();
        writer
            .append(
                Opcode::SetLayerBuffer,
                &[
                    Arg::U64(1),
                    Arg::U64(2),
                    Arg::U32(0),
                    Arg::Buffer(NativeHandle(9)),
                    Arg::Fence(None),
                ],
            )
            .unwrap();

        assert_eq!(
            writer.handles(),
            &[
                HandleToken::Buffer(NativeHandle(0xAAAA_BBBB_CCCC_DDDD)),
                HandleToken::Fence(Fence(0x1234)),
                HandleToken::Buffer(NativeHandle(9)),
            ]
        );

        let bytes = writer.as_bytes();
        // First op: header(4) + u64 arg(9), then buffer index 0 and fence index 1
        assert_eq!(bytes[13], arg_tags::BUFFER);
        assert_eq!(&bytes[14..18], &0u32.to_be_bytes());
        assert_eq!(bytes[18], arg_tags::FENCE);
        assert_eq!(&bytes[19..23], &1u32.to_be_bytes());
        // The raw handle value never appears in the scalar stream
        let needle = 0xAAAA_BBBB_CCCC_DDDDu64.to_be_bytes();
        assert!(!bytes.windows(8).any(|w| w == needle));
    }

    #[test]
    fn test_overflow_boundary_on_operation_count() {
        let mut writer = CommandWriter::new(limits(3, DEFAULT_MAX_BATCH_BYTES));
        for _ in 0..3 {
            writer.append(Opcode::ValidateDisplay, &[Arg::U64(1)]).unwrap();
        }
        let before = writer.as_bytes().to_vec();

        let err = writer
            .append(Opcode::ValidateDisplay, &[Arg::U64(1)])
            .unwrap_err();
        assert!(matches!(err, ComposerError::EncodingOverflow(_)));
        assert_eq!(writer.len(), 3);
        assert_eq!(writer.as_bytes(), &before[..]);
    }

    #[test]
    fn test_overflow_on_byte_limit_leaves_handles_untouched() {
        // Exactly one SetReadbackBuffer: 4 + 9 + 5 + 5 = 23 bytes
        let mut writer = CommandWriter::new(limits(10, 23));
        let args = [
            Arg::U64(1),
            Arg::Buffer(NativeHandle(1)),
            Arg::Fence(Some(Fence(2))),
        ];
        writer.append(Opcode::SetReadbackBuffer, &args).unwrap();

        let err = writer.append(Opcode::SetReadbackBuffer, &args).unwrap_err();
        assert!(matches!(err, ComposerError::EncodingOverflow(_)));
        assert_eq!(writer.handles().len(), 2);
        assert_eq!(writer.as_bytes().len(), 23);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut writer = CommandWriter::default();
        writer
            .append(
                Opcode::SetReadbackBuffer,
                &[Arg::U64(1), Arg::Buffer(NativeHandle(3)), Arg::Fence(None)],
            )
            .unwrap();

        writer.reset();
        assert!(writer.is_empty());
        assert!(writer.as_bytes().is_empty());
        assert!(writer.handles().is_empty());

        writer.reset();
        assert!(writer.is_empty());
        assert!(writer.as_bytes().is_empty());
        assert!(writer.handles().is_empty());
        assert!(writer.opcodes().is_empty());
    }

    #[test]
    fn test_flush_moves_batch_and_empties_writer() {
        let mut writer = CommandWriter::default();
        writer.append(Opcode::GetActiveConfig, &[Arg::U64(5)]).unwrap();
        writer.append(Opcode::SetLayerZOrder, &[Arg::U64(5), Arg::U64(1), Arg::U32(2)]).unwrap();
        let encoded = writer.as_bytes().to_vec();

        let batch = writer.flush();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.expected_records(), 1);
        assert_eq!(&batch.bytes[..], &encoded[..]);
        assert!(writer.is_empty());
        assert!(writer.as_bytes().is_empty());

        // Writer is reusable after flush
        assert_eq!(writer.append(Opcode::GetActiveConfig, &[Arg::U64(5)]).unwrap(), 0);
    }

    #[test]
    fn test_append_returns_position() {
        let mut writer = CommandWriter::default();
        assert_eq!(writer.append(Opcode::ValidateDisplay, &[Arg::U64(1)]).unwrap(), 0);
        assert_eq!(writer.append(Opcode::PresentDisplay, &[Arg::U64(1)]).unwrap(), 1);
    }
}
