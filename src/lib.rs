//! # gamenet
//!
//! Secure transport and packet dispatch core for client/server game
//! networking.
//!
//! The crate sits between a message transport and game code: it negotiates
//! a per-connection session key at approval time, seals every message as
//! one encrypted envelope, decodes arriving envelopes through a registry of
//! packet groups, and hands the typed packets to handler callbacks on a
//! pool of worker tasks. Each connection is permanently assigned one
//! worker, so its packets are always handled in arrival order.
//!
//! ## Architecture
//! - [`core`]: envelope wire format, packet traits, group registry
//! - [`protocol`]: handler dispatch and the x25519 handshake
//! - [`service`]: connection registry, worker pool, the network instance
//! - [`transport`]: the transport abstraction and an in-process transport
//! - [`utils`]: session cipher, key loading, replay cache, metrics, diagnostics
//!
//! ## Example
//! ```no_run
//! use gamenet::config::NetworkConfig;
//! use gamenet::service::NetworkBuilder;
//! use gamenet::transport::MemoryTransport;
//! use gamenet::utils::StaticKeypair;
//!
//! # fn main() -> gamenet::error::Result<()> {
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let server = NetworkBuilder::new(NetworkConfig::default())
//!     .transport(MemoryTransport::server())
//!     .server_keys(StaticKeypair::generate())
//!     .build()?;
//! server.start()?;
//! # Ok(())
//! # })
//! # }
//! ```
//!
//! ## Security
//! - XChaCha20-Poly1305 for every application message
//! - Session keys from ephemeral x25519 agreement bound to the server's
//!   static key
//! - Handshake timestamps and a replay cache reject captured hails

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use core::{ConnectionId, Envelope, GroupTag, Packet, PacketContext, PacketGroup};
pub use error::{NetError, Result};
pub use protocol::{DispatchOutcome, Dispatcher};
pub use service::{Network, NetworkBuilder};
pub use transport::{MemoryTransport, Transport};
