//! Command stream decoder, used on the service side of the boundary.
//!
//! Walks a command buffer operation by operation. Handle indices are resolved
//! against the handle list that travelled with the buffer, so a decoded
//! [`Operation`] carries the same handle tokens the caller appended.

use crate::error::{ComposerError, Result};
use crate::protocol::{arg_tags, Arg, HandleToken, OpHeader, Opcode, OP_HEADER_SIZE};

/// One decoded operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Operation code.
    pub opcode: Opcode,
    /// Arguments with handles resolved.
    pub args: Vec<Arg>,
}

impl Operation {
    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<Arg> {
        self.args.get(index).copied()
    }
}

/// Iterator over the operations of a command buffer.
///
/// Stops after the first error.
pub struct CommandReader<'a> {
    buf: &'a [u8],
    handles: &'a [HandleToken],
    failed: bool,
}

impl<'a> CommandReader<'a> {
    /// Create a reader over an encoded batch and its handle list.
    pub fn new(buf: &'a [u8], handles: &'a [HandleToken]) -> Self {
        Self {
            buf,
            handles,
            failed: false,
        }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn read_operation(&mut self) -> Result<Operation> {
        let header = OpHeader::decode(self.buf).ok_or_else(|| {
            ComposerError::MalformedCommand(format!(
                "truncated operation header ({} bytes left)",
                self.buf.len()
            ))
        })?;
        let opcode = Opcode::from_code(header.opcode).ok_or_else(|| {
            ComposerError::MalformedCommand(format!("unknown opcode {:#06x}", header.opcode))
        })?;

        let end = OP_HEADER_SIZE + header.payload_len as usize;
        if self.buf.len() < end {
            return Err(ComposerError::MalformedCommand(format!(
                "{:?} claims {} payload bytes, {} available",
                opcode,
                header.payload_len,
                self.buf.len() - OP_HEADER_SIZE
            )));
        }

        let mut payload = &self.buf[OP_HEADER_SIZE..end];
        let mut args = Vec::new();
        while !payload.is_empty() {
            let (arg, rest) = self.read_arg(payload)?;
            args.push(arg);
            payload = rest;
        }

        self.buf = &self.buf[end..];
        Ok(Operation { opcode, args })
    }

    fn read_arg<'p>(&self, payload: &'p [u8]) -> Result<(Arg, &'p [u8])> {
        let (&tag, body) = payload
            .split_first()
            .ok_or_else(|| ComposerError::MalformedCommand("empty argument".to_string()))?;

        let take = move |n: usize| -> Result<(&'p [u8], &'p [u8])> {
            if body.len() < n {
                return Err(ComposerError::MalformedCommand(format!(
                    "argument tag {:#04x} needs {} bytes, {} left",
                    tag,
                    n,
                    body.len()
                )));
            }
            Ok(body.split_at(n))
        };

        match tag {
            arg_tags::U32 => {
                let (v, rest) = take(4)?;
                Ok((Arg::U32(u32::from_be_bytes([v[0], v[1], v[2], v[3]])), rest))
            }
            arg_tags::I32 => {
                let (v, rest) = take(4)?;
                Ok((Arg::I32(i32::from_be_bytes([v[0], v[1], v[2], v[3]])), rest))
            }
            arg_tags::F32 => {
                let (v, rest) = take(4)?;
                Ok((Arg::F32(f32::from_be_bytes([v[0], v[1], v[2], v[3]])), rest))
            }
            arg_tags::U64 => {
                let (v, rest) = take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(v);
                Ok((Arg::U64(u64::from_be_bytes(raw)), rest))
            }
            arg_tags::BOOL => {
                let (v, rest) = take(1)?;
                Ok((Arg::Bool(v[0] != 0), rest))
            }
            arg_tags::BUFFER => {
                let (v, rest) = take(4)?;
                match self.handle(v)? {
                    HandleToken::Buffer(handle) => Ok((Arg::Buffer(handle), rest)),
                    HandleToken::Fence(_) => Err(ComposerError::MalformedCommand(
                        "buffer argument references a fence".to_string(),
                    )),
                }
            }
            arg_tags::FENCE => {
                let (v, rest) = take(4)?;
                match self.handle(v)? {
                    HandleToken::Fence(fence) => Ok((Arg::Fence(Some(fence)), rest)),
                    HandleToken::Buffer(_) => Err(ComposerError::MalformedCommand(
                        "fence argument references a buffer".to_string(),
                    )),
                }
            }
            arg_tags::NO_FENCE => Ok((Arg::Fence(None), body)),
            other => Err(ComposerError::MalformedCommand(format!(
                "unknown argument tag {:#04x}",
                other
            ))),
        }
    }

    fn handle(&self, raw_index: &[u8]) -> Result<HandleToken> {
        let index = u32::from_be_bytes([raw_index[0], raw_index[1], raw_index[2], raw_index[3]]);
        self.handles.get(index as usize).copied().ok_or_else(|| {
            ComposerError::MalformedCommand(format!(
                "handle index {} outside list of {}",
                index,
                self.handles.len()
            ))
        })
    }
}

impl Iterator for CommandReader<'_> {
    type Item = Result<Operation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        let result = self.read_operation();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}
