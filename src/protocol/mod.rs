//! Protocol module - opcodes, value types and wire layouts.
//!
//! This module defines everything both sides of the service boundary agree on:
//! - The closed opcode enumeration and the version each opcode belongs to
//! - Opaque identifier and handle types
//! - Operation, reply record and transport frame headers

mod opcode;
mod types;
mod wire_format;

pub use opcode::{capabilities_up_to, capability_set, Opcode, ProtocolVersion, ReplyKind};
pub use types::{
    ColorMode, Config, Dataspace, Display, ErrorCode, Fence, HandleToken, Layer, NativeHandle,
    PerFrameMetadataKey, PixelFormat, PowerMode, ReadbackAttributes,
};
pub use wire_format::{
    arg_tags, frame_kind, value_tags, Arg, FrameHeader, OpHeader, RecordHeader, FRAME_HEADER_SIZE,
    FRAME_VERSION, MAX_OP_PAYLOAD, OP_HEADER_SIZE, RECORD_HEADER_SIZE, STATUS_OK,
};
