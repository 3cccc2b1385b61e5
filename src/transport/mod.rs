//! Transport module - the connection to the composition service.
//!
//! The executor only needs [`ServiceConnection`]: send one batch with its
//! handle list, get one reply with its handle list back. [`FramedConnection`]
//! implements it over any tokio byte stream (Unix socket, duplex, ...).

mod framed;

use std::future::Future;
use std::pin::Pin;

use crate::command::CommandBuffer;
use crate::error::Result;
use crate::protocol::ProtocolVersion;
use crate::reply::RawReply;

pub use framed::{read_frame, write_frame, FramedConnection, DEFAULT_MAX_REPLY_SIZE};

/// Boxed future returned by connections.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A bidirectional channel to the composition service.
///
/// Implementations carry no request multiplexing: one `send` must complete
/// before the next starts, which `&mut self` enforces.
pub trait ServiceConnection: Send {
    /// Protocol version agreed with the service.
    fn version(&self) -> ProtocolVersion;

    /// Transmit a batch as one atomic message and wait for its reply.
    ///
    /// Failures of the channel itself are `TransportFailure`; replies that
    /// cannot be matched to the batch are `MalformedReply`.
    fn send(&mut self, batch_id: u32, batch: CommandBuffer) -> BoxFuture<'_, Result<RawReply>>;
}

impl<C: ServiceConnection + ?Sized> ServiceConnection for Box<C> {
    fn version(&self) -> ProtocolVersion {
        (**self).version()
    }

    fn send(&mut self, batch_id: u32, batch: CommandBuffer) -> BoxFuture<'_, Result<RawReply>> {
        (**self).send(batch_id, batch)
    }
}
