//! MsgPack codec using `rmp-serde`, and the envelopes it carries.
//!
//! Always uses `to_vec_named`, so envelopes are maps keyed by field name and a
//! service written against another MsgPack implementation can read them.
//!
//! # Example
//!
//! ```
//! use composer_client::codec::{Envelope, MsgPackCodec, OutboundEnvelope};
//! use composer_client::protocol::{Fence, HandleToken};
//!
//! let handles = [HandleToken::Fence(Fence(9))];
//! let encoded = MsgPackCodec::encode(&OutboundEnvelope::new(b"\x01\x02", &handles)).unwrap();
//! let decoded: Envelope = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded.payload.as_ref(), b"\x01\x02");
//! assert_eq!(decoded.handles, handles);
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::command::CommandBuffer;
use crate::error::Result;
use crate::protocol::HandleToken;
use crate::reply::RawReply;

/// MessagePack codec for transport envelopes.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Borrowed envelope for sending: byte stream plus handle list.
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope<'a> {
    #[serde(with = "serde_bytes")]
    pub payload: &'a [u8],
    pub handles: &'a [HandleToken],
}

impl<'a> OutboundEnvelope<'a> {
    /// Wrap a payload and its handles without copying.
    pub fn new(payload: &'a [u8], handles: &'a [HandleToken]) -> Self {
        Self { payload, handles }
    }

    /// Envelope for a command batch.
    pub fn from_batch(batch: &'a CommandBuffer) -> Self {
        Self::new(&batch.bytes, &batch.handles)
    }

    /// Envelope for a reply.
    pub fn from_reply(reply: &'a RawReply) -> Self {
        Self::new(&reply.bytes, &reply.handles)
    }
}

/// Owned envelope as received.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    pub payload: ByteBuf,
    pub handles: Vec<HandleToken>,
}

impl Envelope {
    /// Split into a reply ready for decoding.
    pub fn into_reply(self) -> RawReply {
        RawReply::new(Bytes::from(self.payload.into_vec()), self.handles)
    }

    /// Split into payload bytes and handle list.
    pub fn into_parts(self) -> (Bytes, Vec<HandleToken>) {
        (Bytes::from(self.payload.into_vec()), self.handles)
    }
}

/// Version advertisement exchanged during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Highest protocol version the sender speaks.
    pub version: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandWriter;
    use crate::protocol::{Arg, Fence, NativeHandle, Opcode};

    #[test]
    fn test_batch_envelope_roundtrip() {
        let mut writer = CommandWriter::default();
        writer
            .append(
                Opcode::SetReadbackBuffer,
                &[Arg::U64(1), Arg::Buffer(NativeHandle(5)), Arg::Fence(Some(Fence(6)))],
            )
            .unwrap();
        let batch = writer.flush();

        let encoded = MsgPackCodec::encode(&OutboundEnvelope::from_batch(&batch)).unwrap();
        let (bytes, handles) = MsgPackCodec::decode::<Envelope>(&encoded)
            .unwrap()
            .into_parts();

        assert_eq!(bytes, batch.bytes);
        assert_eq!(handles, batch.handles);
    }

    #[test]
    fn test_envelope_is_map_format() {
        let encoded = MsgPackCodec::encode(&OutboundEnvelope::new(b"", &[])).unwrap();
        // fixmap with 2 entries, not fixarray
        assert_eq!(encoded[0], 0x82);
    }

    #[test]
    fn test_payload_is_msgpack_binary() {
        let encoded = MsgPackCodec::encode(&OutboundEnvelope::new(&[1, 2, 3], &[])).unwrap();
        // "payload" key (fixstr 7) then bin8 marker
        let key_end = 1 + 1 + "payload".len();
        assert_eq!(encoded[key_end], 0xc4);
        assert_eq!(encoded[key_end + 1], 3);
    }

    #[test]
    fn test_hello_roundtrip() {
        let encoded = MsgPackCodec::encode(&Hello { version: 2 }).unwrap();
        let decoded: Hello = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.version, 2);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Envelope> = MsgPackCodec::decode(b"not an envelope");
        assert!(result.is_err());
    }
}
