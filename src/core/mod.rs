//! # Core Wire Machinery
//!
//! Low-level packet traits, the envelope format, and the group registry.
//!
//! ## Components
//! - **Envelope**: the encrypted wire unit carrying connection identity,
//!   packet-group tag, and payload
//! - **Packet / PacketGroup**: the codec contract every wire packet family
//!   implements
//! - **PacketRegistry**: tag-indexed catalog of registered groups
//! - **Ping**: the built-in liveness group on the reserved tag
//!
//! ## Wire Format
//! ```text
//! [Identity(16)] [GroupTag(1)] [Payload(N)]
//! ```
//! The whole envelope is encrypted as a unit before it reaches the transport
//! and decrypted as a unit before parsing.

pub mod envelope;
pub mod packet;
pub mod ping;
pub mod registry;

pub use envelope::{ConnectionId, Envelope};
pub use packet::{GroupTag, Packet, PacketContext, PacketGroup};
pub use registry::PacketRegistry;
