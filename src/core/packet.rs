//! Packet and packet-group traits.
//!
//! A *packet group* is a registered family of wire packet types sharing a
//! tag-based decode entry point: the envelope's group tag selects the group,
//! the group constructs a typed packet from the remaining buffer, and the
//! packet's own decode routine consumes the rest. Dispatch keys on a stable
//! type tag rather than runtime reflection.

use crate::core::envelope::ConnectionId;
use crate::error::{NetError, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::any::Any;
use std::fmt;

/// Small integer tag identifying a packet group on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GroupTag(pub u8);

impl fmt::Display for GroupTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Connection context handed to a group factory when constructing a packet.
///
/// Deliberately minimal: groups get the identity, never the registry or
/// cipher internals.
#[derive(Debug, Clone, Copy)]
pub struct PacketContext {
    pub id: ConnectionId,
}

/// A decoded application packet.
///
/// Implementations expose a stable `type_tag` used as the dispatch key and
/// an `as_any` hook so handlers can downcast to the concrete type.
pub trait Packet: Any + Send {
    /// Group this packet belongs to.
    fn group(&self) -> GroupTag;

    /// Stable dispatch key, unique per packet type.
    fn type_tag(&self) -> &'static str;

    /// Serialize the group payload (everything after the envelope header).
    fn encode(&self, buf: &mut BytesMut) -> Result<()>;

    /// Populate fields from the remaining buffer.
    fn decode(&mut self, buf: &mut Bytes) -> Result<()>;

    /// Typed access for handlers.
    fn as_any(&self) -> &dyn Any;
}

/// A registered wire-format descriptor for one packet family.
pub trait PacketGroup: Send + Sync {
    /// The tag this group registers under.
    fn tag(&self) -> GroupTag;

    /// Construct a packet instance for the given connection context,
    /// consuming any group-level discriminator from the buffer. The caller
    /// follows up with [`Packet::decode`] on the remaining bytes.
    fn create(&self, ctx: &PacketContext, buf: &mut Bytes) -> Result<Box<dyn Packet>>;
}

/// Checked read of a single byte.
pub fn take_u8(buf: &mut Bytes) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(NetError::Decode("buffer exhausted reading u8".into()));
    }
    Ok(buf.get_u8())
}

/// Checked read of a big-endian u32.
pub fn take_u32(buf: &mut Bytes) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(NetError::Decode("buffer exhausted reading u32".into()));
    }
    Ok(buf.get_u32())
}

/// Checked read of a big-endian u64.
pub fn take_u64(buf: &mut Bytes) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(NetError::Decode("buffer exhausted reading u64".into()));
    }
    Ok(buf.get_u64())
}

/// Checked read of a big-endian i32.
pub fn take_i32(buf: &mut Bytes) -> Result<i32> {
    if buf.remaining() < 4 {
        return Err(NetError::Decode("buffer exhausted reading i32".into()));
    }
    Ok(buf.get_i32())
}
