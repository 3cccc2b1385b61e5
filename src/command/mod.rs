//! Command module - batch encoding and its service-side decoder.
//!
//! - [`CommandWriter`] appends operations and flushes them as a [`CommandBuffer`]
//! - [`CommandReader`] turns a command buffer back into [`Operation`]s

mod reader;
mod writer;

pub use reader::{CommandReader, Operation};
pub use writer::{
    BatchLimits, CommandBuffer, CommandWriter, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_OPERATIONS,
};
