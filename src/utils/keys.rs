//! Static key material loading.
//!
//! Long-lived x25519 keys identify a network endpoint (the server pins its
//! keypair; clients pin the server's public key). Key material loads from
//! embedded bytes, a file path, or any `io::Read` stream, in a
//! length-prefixed component format that is validated before use:
//!
//! ```text
//! public:  [u16 BE bit length][public component]
//! private: [u16 BE bit length][public component][secret component]
//! ```
//!
//! A private key's stored public component must match the public key derived
//! from its secret, otherwise loading fails.

use crate::error::{constants, NetError, Result};
use rand_core::OsRng;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroize;

/// Bit length every component must declare.
pub const KEY_BITS: u16 = 256;

const COMPONENT_LEN: usize = (KEY_BITS as usize) / 8;

/// Public half of a static key, safe to embed and share.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StaticPublicKey(PublicKey);

impl StaticPublicKey {
    pub fn from_bytes(bytes: [u8; COMPONENT_LEN]) -> Self {
        Self(PublicKey::from(bytes))
    }

    pub fn to_bytes(&self) -> [u8; COMPONENT_LEN] {
        self.0.to_bytes()
    }

    /// Parse from a length-prefixed component stream.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let bits = read_bits(&mut reader)?;
        validate_bits(bits)?;
        let public = read_component(&mut reader)?;
        Ok(Self(PublicKey::from(public)))
    }

    /// Parse from an embedded byte slice (e.g. `include_bytes!`).
    pub fn from_embedded(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }

    /// Parse from a key file on disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_from(File::open(path)?)
    }

    /// Serialize to the length-prefixed component format.
    pub fn write_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + COMPONENT_LEN);
        out.extend_from_slice(&KEY_BITS.to_be_bytes());
        out.extend_from_slice(self.0.as_bytes());
        out
    }
}

impl std::fmt::Debug for StaticPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.as_bytes();
        write!(
            f,
            "StaticPublicKey({:02x}{:02x}{:02x}{:02x}..)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

/// A complete static keypair. The secret component never leaves this type
/// except through [`StaticKeypair::write_to_vec`].
pub struct StaticKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl StaticKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Parse from a length-prefixed component stream, validating that the
    /// stored public component matches the secret.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let bits = read_bits(&mut reader)?;
        validate_bits(bits)?;

        let stored_public = read_component(&mut reader)?;
        let mut secret_bytes = read_component(&mut reader)?;

        let secret = StaticSecret::from(secret_bytes);
        secret_bytes.zeroize();

        let public = PublicKey::from(&secret);
        if public.to_bytes() != stored_public {
            return Err(NetError::KeyFormat(constants::ERR_KEY_MISMATCH.into()));
        }

        Ok(Self { secret, public })
    }

    /// Parse from an embedded byte slice.
    pub fn from_embedded(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }

    /// Parse from a key file on disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_from(File::open(path)?)
    }

    pub fn public(&self) -> StaticPublicKey {
        StaticPublicKey(self.public)
    }

    /// Serialize to the length-prefixed component format. Handle the result
    /// with care; it contains the secret component.
    pub fn write_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 2 * COMPONENT_LEN);
        out.extend_from_slice(&KEY_BITS.to_be_bytes());
        out.extend_from_slice(self.public.as_bytes());
        out.extend_from_slice(&self.secret.to_bytes());
        out
    }

    pub(crate) fn diffie_hellman(&self, their_public: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(their_public)
    }
}

impl std::fmt::Debug for StaticKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret component
        f.debug_struct("StaticKeypair")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}

fn read_bits<R: Read>(reader: &mut R) -> Result<u16> {
    let mut prefix = [0u8; 2];
    reader
        .read_exact(&mut prefix)
        .map_err(|_| NetError::KeyFormat(constants::ERR_KEY_TRUNCATED.into()))?;
    Ok(u16::from_be_bytes(prefix))
}

fn validate_bits(bits: u16) -> Result<()> {
    if bits != KEY_BITS {
        return Err(NetError::KeyFormat(format!(
            "{}: declared {bits} bits, expected {KEY_BITS}",
            constants::ERR_KEY_BAD_LENGTH
        )));
    }
    Ok(())
}

fn read_component<R: Read>(reader: &mut R) -> Result<[u8; COMPONENT_LEN]> {
    let mut component = [0u8; COMPONENT_LEN];
    reader
        .read_exact(&mut component)
        .map_err(|_| NetError::KeyFormat(constants::ERR_KEY_TRUNCATED.into()))?;
    Ok(component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn public_key_roundtrip_via_embedded_bytes() {
        let pair = StaticKeypair::generate();
        let blob = pair.public().write_to_vec();

        let loaded = StaticPublicKey::from_embedded(&blob).unwrap();
        assert_eq!(loaded.to_bytes(), pair.public().to_bytes());
    }

    #[test]
    fn keypair_roundtrip_via_stream() {
        let pair = StaticKeypair::generate();
        let blob = pair.write_to_vec();

        let loaded = StaticKeypair::read_from(&blob[..]).unwrap();
        assert_eq!(loaded.public().to_bytes(), pair.public().to_bytes());
    }

    #[test]
    fn keypair_roundtrip_via_file() {
        let pair = StaticKeypair::generate();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&pair.write_to_vec()).unwrap();

        let loaded = StaticKeypair::from_file(file.path()).unwrap();
        assert_eq!(loaded.public().to_bytes(), pair.public().to_bytes());
    }

    #[test]
    fn wrong_bit_length_is_rejected() {
        let pair = StaticKeypair::generate();
        let mut blob = pair.public().write_to_vec();
        blob[0] = 0x04; // declare 1024 bits

        let err = StaticPublicKey::from_embedded(&blob).unwrap_err();
        assert!(matches!(err, NetError::KeyFormat(_)));
    }

    #[test]
    fn truncated_component_is_rejected() {
        let pair = StaticKeypair::generate();
        let blob = pair.write_to_vec();

        let err = StaticKeypair::read_from(&blob[..blob.len() - 4]).unwrap_err();
        assert!(matches!(err, NetError::KeyFormat(_)));
    }

    #[test]
    fn mismatched_public_component_is_rejected() {
        let pair = StaticKeypair::generate();
        let mut blob = pair.write_to_vec();
        blob[3] ^= 0xff; // corrupt the stored public component

        let err = StaticKeypair::read_from(&blob[..]).unwrap_err();
        assert!(matches!(err, NetError::KeyFormat(_)));
    }
}
