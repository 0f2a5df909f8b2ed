//! # ddhcp
//!
//! The core of a DHCP server (RFC 2131, options per RFC 2132): wire codec,
//! option handling, an in-memory lease pool, and the message dispatcher
//! that turns client requests into replies.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ddhcp::{Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> ddhcp::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let server = DhcpServer::new(config).await?;
//!     server.run().await
//! }
//! ```
//!
//! The dispatcher can also be driven without a socket:
//!
//! ```no_run
//! use ddhcp::{Config, Dispatcher};
//!
//! # async fn example(datagram: &[u8]) -> ddhcp::Result<()> {
//! let dispatcher = Dispatcher::from_config(Config::default())?;
//! if let Some(reply) = dispatcher.handle_datagram(datagram).await? {
//!     println!("{} -> {:?}", reply.message_type, reply.destination);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Message`] - BOOTP/DHCP fixed header decoding and encoding
//! - [`Options`] - option TLV map with typed accessors
//! - [`LeasePool`] - address allocation, offers, bindings and reclamation
//! - [`Dispatcher`] - DISCOVER/REQUEST/DECLINE/RELEASE/INFORM handling
//! - [`DhcpServer`] - UDP transport that feeds the dispatcher
//! - [`Config`] - JSON server configuration

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lease;
pub mod message;
pub mod options;
pub mod server;

pub use config::Config;
pub use dispatcher::{Dispatcher, Reply, ReplyDestination};
pub use error::{DecodeError, Error, Result};
pub use lease::{HardwareAddr, Lease, LeasePool, LeaseState};
pub use message::Message;
pub use options::{MessageType, OptionCode, Options};
pub use server::DhcpServer;
