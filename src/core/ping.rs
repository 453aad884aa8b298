//! Built-in liveness ping group on the reserved tag.
//!
//! The group carries two packet types distinguished by a one-byte
//! discriminator: `Ping` (a liveness probe) and `Pong` (its echo). Both
//! carry the sender's millisecond timestamp so round-trip time can be read
//! off at the handler.

use crate::config::PING_GROUP_TAG;
use crate::core::packet::{take_u64, take_u8, GroupTag, Packet, PacketContext, PacketGroup};
use crate::error::{NetError, Result};
use crate::protocol::dispatcher::Dispatcher;
use bytes::{BufMut, Bytes, BytesMut};
use std::any::Any;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Dispatch key for [`Ping`].
pub const TYPE_PING: &str = "gamenet.ping";
/// Dispatch key for [`Pong`].
pub const TYPE_PONG: &str = "gamenet.pong";

const SUB_PING: u8 = 0;
const SUB_PONG: u8 = 1;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Liveness probe.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ping {
    pub timestamp_ms: u64,
}

impl Ping {
    pub fn now() -> Self {
        Self {
            timestamp_ms: now_ms(),
        }
    }
}

impl Packet for Ping {
    fn group(&self) -> GroupTag {
        GroupTag(PING_GROUP_TAG)
    }

    fn type_tag(&self) -> &'static str {
        TYPE_PING
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(SUB_PING);
        buf.put_u64(self.timestamp_ms);
        Ok(())
    }

    fn decode(&mut self, buf: &mut Bytes) -> Result<()> {
        self.timestamp_ms = take_u64(buf)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Echo of a [`Ping`], carrying the probe's original timestamp.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Pong {
    pub timestamp_ms: u64,
}

impl Pong {
    pub fn echoing(ping: &Ping) -> Self {
        Self {
            timestamp_ms: ping.timestamp_ms,
        }
    }
}

impl Packet for Pong {
    fn group(&self) -> GroupTag {
        GroupTag(PING_GROUP_TAG)
    }

    fn type_tag(&self) -> &'static str {
        TYPE_PONG
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(SUB_PONG);
        buf.put_u64(self.timestamp_ms);
        Ok(())
    }

    fn decode(&mut self, buf: &mut Bytes) -> Result<()> {
        self.timestamp_ms = take_u64(buf)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The reserved liveness group.
pub struct PingGroup;

impl PacketGroup for PingGroup {
    fn tag(&self) -> GroupTag {
        GroupTag(PING_GROUP_TAG)
    }

    fn create(&self, _ctx: &PacketContext, buf: &mut Bytes) -> Result<Box<dyn Packet>> {
        match take_u8(buf)? {
            SUB_PING => Ok(Box::new(Ping::default())),
            SUB_PONG => Ok(Box::new(Pong::default())),
            other => Err(NetError::Decode(format!(
                "unknown ping sub-type 0x{other:02x}"
            ))),
        }
    }
}

/// Install the default ping/pong handlers. Mirrors the startup bootstrap
/// that registers the reserved group itself.
pub fn register_default_handlers(dispatcher: &Dispatcher) -> Result<()> {
    dispatcher.register(TYPE_PING, |conn, packet| {
        if let Some(ping) = packet.as_any().downcast_ref::<Ping>() {
            trace!(%conn, timestamp_ms = ping.timestamp_ms, "Ping received");
        }
        Ok(())
    })?;

    dispatcher.register(TYPE_PONG, |conn, packet| {
        if let Some(pong) = packet.as_any().downcast_ref::<Pong>() {
            trace!(%conn, timestamp_ms = pong.timestamp_ms, "Pong received");
        }
        Ok(())
    })
}
