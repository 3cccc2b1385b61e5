//! Reply module - positional result records.
//!
//! - [`ReplyReader`] decodes a [`RawReply`] into [`ReplyRecord`]s
//! - [`ReplyWriter`] builds replies on the service side

mod reader;
mod writer;

pub use reader::{RawReply, ReplyReader, ReplyRecord, ReplyValue};
pub use writer::ReplyWriter;
