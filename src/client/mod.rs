//! Capability-versioned composer clients.
//!
//! [`ComposerClient`] carries the V1 operation set and owns the encoder, the
//! executor and the result slots. [`ComposerClientV2`] borrows a V1 client and
//! adds the operations introduced in V2; every V1 method stays reachable
//! through it unchanged.

mod config;
mod results;
mod v1;
mod v2;

pub use config::{ClientBuilder, ClientConfig};
pub use results::{Ticket, TicketState};
pub use v1::ComposerClient;
pub use v2::ComposerClientV2;
