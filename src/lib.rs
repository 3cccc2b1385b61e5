//! # composer-client
//!
//! Client library for a display-composition service built around a
//! command-batching protocol.
//!
//! Composition operations are appended to an in-memory batch, sent to the
//! service in a single round trip, and the reply is bound back to the
//! [`Ticket`] each operation returned.
//!
//! ## Architecture
//!
//! - **Encoder** ([`command`]): tagged binary operations plus an out-of-band
//!   handle list for native buffers and fences
//! - **Decoder** ([`reply`]): positional result records
//! - **Executor** ([`executor`]): flush, send, await reply or timeout, bind
//! - **Clients** ([`client`]): operations grouped by the protocol version
//!   that introduced them; V2 composes a reference to V1
//!
//! ## Example
//!
//! ```ignore
//! use composer_client::protocol::{Display, PowerMode, ProtocolVersion};
//! use composer_client::transport::FramedConnection;
//! use composer_client::ComposerClient;
//!
//! #[tokio::main]
//! async fn main() -> composer_client::Result<()> {
//!     let stream = tokio::net::UnixStream::connect("/run/composer.sock")
//!         .await
//!         .map_err(|e| composer_client::ComposerError::TransportFailure(e.to_string()))?;
//!     let connection = FramedConnection::negotiate(stream, ProtocolVersion::LATEST).await?;
//!     let mut client = ComposerClient::new(connection);
//!
//!     let display = Display(1);
//!     let power = client.set_power_mode(display, PowerMode::On)?;
//!     let mut v2 = client.v2()?;
//!     let keys = v2.get_per_frame_metadata_keys(display)?;
//!
//!     let report = v2.execute().await?;
//!     assert!(report.is_clean());
//!     v2.status(&power)?;
//!     println!("{:?}", v2.per_frame_metadata_keys(&keys)?);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod command;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod reply;
pub mod transport;

pub use client::{ClientBuilder, ClientConfig, ComposerClient, ComposerClientV2, Ticket};
pub use error::{ComposerError, Result};
pub use executor::{BatchReport, Outcome};
