//! Connection handshake: x25519 key agreement authenticated by the
//! server's static key.
//!
//! Two messages, carried inside the transport's connect/approval hail:
//!
//! ```text
//! client -> server   HandshakeInit   { ephemeral, nonce, timestamp }
//! server -> client   HandshakeAccept { ephemeral, nonce, confirm }
//! ```
//!
//! The session key mixes two Diffie-Hellman terms (ephemeral/ephemeral and
//! client-ephemeral/server-static) plus both nonces. Only the holder of the
//! server's static secret can compute the second term, so a valid `confirm`
//! hash authenticates the server to the client. The server validates the
//! init timestamp against a freshness window and a replay cache before
//! committing any state.

use crate::error::{constants, NetError, Result};
use crate::utils::crypto::KEY_LEN;
use crate::utils::keys::{StaticKeypair, StaticPublicKey};
use crate::utils::replay::ReplayCache;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};

use tracing::{debug, instrument};

/// First handshake message, sent as the client's connect hail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeInit {
    pub ephemeral: [u8; 32],
    pub nonce: [u8; 16],
    pub timestamp: u64,
}

/// Second handshake message, returned as the server's approval hail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeAccept {
    pub ephemeral: [u8; 32],
    pub nonce: [u8; 16],
    pub confirm: [u8; 32],
}

impl HandshakeInit {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl HandshakeAccept {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Client-side handshake state, alive between `client_hello` and
/// `client_finish`. One per pending connection; never shared.
pub struct ClientHandshake {
    // Reused for both DH terms, so not an EphemeralSecret.
    secret: Option<StaticSecret>,
    server_static: PublicKey,
    nonce: [u8; 16],
}

impl std::fmt::Debug for ClientHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandshake")
            .field("consumed", &self.secret.is_none())
            .finish_non_exhaustive()
    }
}

/// Get the current timestamp in milliseconds.
pub(crate) fn current_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .map_err(|_| NetError::Custom(constants::ERR_SYSTEM_TIME.into()))
}

fn generate_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Verify that a timestamp is recent enough. Allows 2 seconds of forward
/// clock skew.
pub fn verify_timestamp(timestamp: u64, max_age_seconds: u64) -> bool {
    let current = match current_timestamp() {
        Ok(time) => time,
        Err(_) => return false,
    };

    const FUTURE_TOLERANCE_MS: u64 = 2000;
    let max_age_ms = max_age_seconds * 1000;

    if timestamp > current + FUTURE_TOLERANCE_MS {
        return false;
    }

    if current > timestamp && current - timestamp > max_age_ms {
        return false;
    }

    true
}

fn derive_session_key(
    ee: &SharedSecret,
    es: &SharedSecret,
    client_nonce: &[u8; 16],
    server_nonce: &[u8; 16],
) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(ee.as_bytes());
    hasher.update(es.as_bytes());
    // Nonce labels give domain separation between the two fields
    hasher.update(b"client-nonce");
    hasher.update(client_nonce);
    hasher.update(b"server-nonce");
    hasher.update(server_nonce);
    hasher.finalize().into()
}

fn confirm_tag(key: &[u8; KEY_LEN]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(b"confirm");
    hasher.finalize().into()
}

/// Start a handshake towards a server whose static public key is pinned.
#[instrument(skip(server_static))]
pub fn client_hello(server_static: &StaticPublicKey) -> Result<(ClientHandshake, HandshakeInit)> {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let nonce = generate_nonce();
    let timestamp = current_timestamp()?;

    debug!("Client initiating handshake");

    let state = ClientHandshake {
        secret: Some(secret),
        server_static: PublicKey::from(server_static.to_bytes()),
        nonce,
    };

    Ok((
        state,
        HandshakeInit {
            ephemeral: public.to_bytes(),
            nonce,
            timestamp,
        },
    ))
}

/// Server side: validate an init, derive the session key, and produce the
/// accept message.
///
/// # Errors
/// `NetError::Handshake` on a stale timestamp or a replayed nonce.
#[instrument(skip(keys, init, replay_cache))]
pub fn server_accept(
    keys: &StaticKeypair,
    init: &HandshakeInit,
    max_age_seconds: u64,
    peer: u64,
    replay_cache: &mut ReplayCache,
) -> Result<([u8; KEY_LEN], HandshakeAccept)> {
    if !verify_timestamp(init.timestamp, max_age_seconds) {
        return Err(NetError::Handshake(constants::ERR_INVALID_TIMESTAMP.into()));
    }

    if replay_cache.is_replay(peer, &init.nonce, init.timestamp) {
        return Err(NetError::Handshake(constants::ERR_REPLAY_ATTACK.into()));
    }

    let server_ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let server_public = PublicKey::from(&server_ephemeral);
    let server_nonce = generate_nonce();

    let client_ephemeral = PublicKey::from(init.ephemeral);
    let ee = server_ephemeral.diffie_hellman(&client_ephemeral);
    let es = keys.diffie_hellman(&client_ephemeral);

    let key = derive_session_key(&ee, &es, &init.nonce, &server_nonce);
    let confirm = confirm_tag(&key);

    debug!(peer, "Server accepted handshake");

    Ok((
        key,
        HandshakeAccept {
            ephemeral: server_public.to_bytes(),
            nonce: server_nonce,
            confirm,
        },
    ))
}

/// Client side: derive the session key from the server's accept and verify
/// the confirmation hash.
///
/// # Errors
/// `NetError::Handshake` if the confirmation does not verify (wrong or
/// impersonated server) or the state was already consumed.
#[instrument(skip(state, accept))]
pub fn client_finish(
    mut state: ClientHandshake,
    accept: &HandshakeAccept,
) -> Result<[u8; KEY_LEN]> {
    let secret = state
        .secret
        .take()
        .ok_or_else(|| NetError::Handshake(constants::ERR_HANDSHAKE_CONSUMED.into()))?;

    let server_ephemeral = PublicKey::from(accept.ephemeral);
    let ee = secret.diffie_hellman(&server_ephemeral);
    let es = secret.diffie_hellman(&state.server_static);

    let key = derive_session_key(&ee, &es, &state.nonce, &accept.nonce);

    if confirm_tag(&key) != accept.confirm {
        return Err(NetError::Handshake(constants::ERR_CONFIRM_MISMATCH.into()));
    }

    debug!("Client derived session key");

    Ok(key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fresh_cache() -> ReplayCache {
        ReplayCache::with_settings(Duration::from_secs(60), 100)
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let server_keys = StaticKeypair::generate();
        let mut cache = fresh_cache();

        let (state, init) = client_hello(&server_keys.public()).unwrap();
        let (server_key, accept) =
            server_accept(&server_keys, &init, 30, 1, &mut cache).unwrap();
        let client_key = client_finish(state, &accept).unwrap();

        assert_eq!(server_key, client_key);
    }

    #[test]
    fn concurrent_handshakes_stay_isolated() {
        let server_keys = StaticKeypair::generate();
        let mut cache = fresh_cache();

        let (state1, init1) = client_hello(&server_keys.public()).unwrap();
        let (state2, init2) = client_hello(&server_keys.public()).unwrap();
        assert_ne!(init1.ephemeral, init2.ephemeral);
        assert_ne!(init1.nonce, init2.nonce);

        let (key1_s, accept1) = server_accept(&server_keys, &init1, 30, 1, &mut cache).unwrap();
        let (key2_s, accept2) = server_accept(&server_keys, &init2, 30, 2, &mut cache).unwrap();

        let key1_c = client_finish(state1, &accept1).unwrap();
        let key2_c = client_finish(state2, &accept2).unwrap();

        assert_eq!(key1_s, key1_c);
        assert_eq!(key2_s, key2_c);
        assert_ne!(key1_s, key2_s);
    }

    #[test]
    fn impersonating_server_fails_confirmation() {
        let real_server = StaticKeypair::generate();
        let impostor = StaticKeypair::generate();
        let mut cache = fresh_cache();

        // Client pins the real server's key; an impostor answers.
        let (state, init) = client_hello(&real_server.public()).unwrap();
        let (_, accept) = server_accept(&impostor, &init, 30, 1, &mut cache).unwrap();

        let err = client_finish(state, &accept).unwrap_err();
        assert!(matches!(err, NetError::Handshake(_)));
    }

    #[test]
    fn tampered_confirm_is_rejected() {
        let server_keys = StaticKeypair::generate();
        let mut cache = fresh_cache();

        let (state, init) = client_hello(&server_keys.public()).unwrap();
        let (_, mut accept) = server_accept(&server_keys, &init, 30, 1, &mut cache).unwrap();
        accept.confirm[0] ^= 0xff;

        assert!(client_finish(state, &accept).is_err());
    }

    #[test]
    fn stale_init_is_rejected() {
        let server_keys = StaticKeypair::generate();
        let mut cache = fresh_cache();

        let (_, mut init) = client_hello(&server_keys.public()).unwrap();
        init.timestamp -= 31_000;

        let err = server_accept(&server_keys, &init, 30, 1, &mut cache).unwrap_err();
        assert!(matches!(err, NetError::Handshake(_)));
    }

    #[test]
    fn replayed_init_is_rejected() {
        let server_keys = StaticKeypair::generate();
        let mut cache = fresh_cache();

        let (_, init) = client_hello(&server_keys.public()).unwrap();
        assert!(server_accept(&server_keys, &init, 30, 1, &mut cache).is_ok());

        let err = server_accept(&server_keys, &init, 30, 1, &mut cache).unwrap_err();
        assert!(matches!(err, NetError::Handshake(_)));
    }

    #[test]
    fn timestamp_window() {
        let now = current_timestamp().unwrap();
        assert!(verify_timestamp(now, 30));
        assert!(verify_timestamp(now - 10_000, 30));
        assert!(!verify_timestamp(now - 31_000, 30));
        assert!(verify_timestamp(now + 1_000, 30));
        assert!(!verify_timestamp(now + 3_000, 30));
    }

    #[test]
    fn init_bytes_roundtrip() {
        let server_keys = StaticKeypair::generate();
        let (_, init) = client_hello(&server_keys.public()).unwrap();

        let bytes = init.to_bytes().unwrap();
        let parsed = HandshakeInit::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.ephemeral, init.ephemeral);
        assert_eq!(parsed.nonce, init.nonce);
        assert_eq!(parsed.timestamp, init.timestamp);
    }
}
