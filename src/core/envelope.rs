//! Wire envelope: `[16-byte identity][1-byte group tag][payload]`.
//!
//! The envelope is only meaningful after decryption; it is built in the
//! clear, then sealed as a single unit by the connection's session cipher
//! before the transport ever sees it.

use crate::config::{GROUP_TAG_LEN, IDENTITY_LEN};
use crate::core::packet::GroupTag;
use crate::error::{constants, NetError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable 128-bit identity of a logical connection, assigned at approval
/// time and immutable for the connection's lifetime.
///
/// Application code references connections exclusively through this value,
/// never through the transport-level handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId([u8; IDENTITY_LEN]);

impl ConnectionId {
    /// Mint a fresh random identity.
    pub fn random() -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionId({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// A parsed (decrypted) wire envelope.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Identity of the connection this envelope belongs to.
    pub identity: ConnectionId,
    /// Tag selecting the packet group that decodes the payload.
    pub group: GroupTag,
    /// Group-specific payload, untouched by the envelope layer.
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(identity: ConnectionId, group: GroupTag, payload: Bytes) -> Self {
        Self {
            identity,
            group,
            payload,
        }
    }

    /// Serialize the envelope into its bit-exact wire layout.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(IDENTITY_LEN + GROUP_TAG_LEN + self.payload.len());
        buf.put_slice(self.identity.as_bytes());
        buf.put_u8(self.group.0);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse an envelope from a decrypted buffer.
    ///
    /// # Errors
    /// `NetError::Decode` if the buffer is shorter than the fixed header.
    pub fn parse(mut buf: Bytes) -> Result<Self> {
        if buf.remaining() < IDENTITY_LEN + GROUP_TAG_LEN {
            return Err(NetError::Decode(constants::ERR_ENVELOPE_SHORT.into()));
        }

        let mut identity = [0u8; IDENTITY_LEN];
        buf.copy_to_slice(&mut identity);
        let group = GroupTag(buf.get_u8());

        Ok(Self {
            identity: ConnectionId::from_bytes(identity),
            group,
            payload: buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_unique() {
        let a = ConnectionId::random();
        let b = ConnectionId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn envelope_roundtrip() {
        let id = ConnectionId::random();
        let env = Envelope::new(id, GroupTag(0x2a), Bytes::from_static(b"payload"));

        let wire = env.encode().freeze();
        assert_eq!(wire.len(), 16 + 1 + 7);

        let parsed = Envelope::parse(wire).unwrap();
        assert_eq!(parsed.identity, id);
        assert_eq!(parsed.group, GroupTag(0x2a));
        assert_eq!(&parsed.payload[..], b"payload");
    }

    #[test]
    fn envelope_layout_is_bit_exact() {
        let id = ConnectionId::from_bytes([7u8; 16]);
        let env = Envelope::new(id, GroupTag(0x01), Bytes::from_static(&[0xaa, 0xbb]));

        let wire = env.encode();
        assert_eq!(&wire[..16], &[7u8; 16]);
        assert_eq!(wire[16], 0x01);
        assert_eq!(&wire[17..], &[0xaa, 0xbb]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = Envelope::parse(Bytes::from_static(&[0u8; 10])).unwrap_err();
        assert!(matches!(err, NetError::Decode(_)));
    }

    #[test]
    fn empty_payload_is_allowed() {
        let env = Envelope::new(ConnectionId::random(), GroupTag(0x00), Bytes::new());
        let parsed = Envelope::parse(env.encode().freeze()).unwrap();
        assert!(parsed.payload.is_empty());
    }
}
