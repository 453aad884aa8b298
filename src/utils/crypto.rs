//! Per-connection session cipher.
//!
//! Every envelope is sealed as one unit with XChaCha20-Poly1305 under the
//! session key negotiated at handshake time. Wire form of a sealed message:
//! `[24-byte nonce][ciphertext + tag]` with a fresh random nonce per message.
//! Sealing takes `&self`, so sends may originate from any caller thread while
//! the receive loop decrypts concurrently.

use crate::config::MAX_ENVELOPE_SIZE;
use crate::error::{constants, NetError, Result};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use zeroize::Zeroize;

/// Nonce length prepended to every sealed message.
pub const NONCE_LEN: usize = 24;

/// Session key length in bytes.
pub const KEY_LEN: usize = 32;

/// Symmetric cipher state for one connection.
pub struct SessionCipher {
    cipher: XChaCha20Poly1305,
}

impl SessionCipher {
    /// Install a freshly derived session key. The key bytes are zeroized
    /// once the cipher has consumed them.
    pub fn new(mut key: [u8; KEY_LEN]) -> Self {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        key.zeroize();
        Self { cipher }
    }

    /// Encrypt a plaintext envelope for transport.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| NetError::EncryptionFailure)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a sealed message back into the plaintext envelope.
    ///
    /// # Errors
    /// `NetError::DecryptionFailure` on a short buffer, an authentication
    /// failure, or an oversized plaintext.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(NetError::Decode(constants::ERR_CIPHERTEXT_SHORT.into()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| NetError::DecryptionFailure)?;

        if plaintext.len() > MAX_ENVELOPE_SIZE {
            return Err(NetError::DecryptionFailure);
        }

        Ok(plaintext)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        write!(f, "SessionCipher([REDACTED])")
    }
}
