//! Codec module - MsgPack envelopes for the transport.
//!
//! The command and reply streams use their own compact binary layouts (see
//! [`crate::protocol`]); this module only wraps a stream and its handle list
//! for the trip across the connection:
//!
//! - [`OutboundEnvelope`] - borrowed, for sending without copying the stream
//! - [`Envelope`] - owned, as received
//! - [`Hello`] - version advertisement used during negotiation

mod msgpack;

pub use msgpack::{Envelope, Hello, MsgPackCodec, OutboundEnvelope};
