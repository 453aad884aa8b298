//! # Utility Modules
//!
//! Supporting utilities for the network core.
//!
//! ## Components
//! - **Crypto**: XChaCha20-Poly1305 session cipher (one per connection)
//! - **Keys**: static key material loading from embedded/file/stream sources
//! - **Replay**: TTL-based nonce deduplication for handshake replay protection
//! - **Metrics**: thread-safe observability counters
//! - **Diag**: raw-buffer hex dumps for decode failures
//!
//! ## Security
//! - Cryptographically secure RNG throughout (`rand_core::OsRng`)
//! - Session keys zeroized once installed in the cipher (zeroize crate)
//! - Decrypted envelope size capped to prevent memory exhaustion

pub mod crypto;
pub mod diag;
pub mod keys;
pub mod metrics;
pub mod replay;

pub use crypto::SessionCipher;
pub use keys::{StaticKeypair, StaticPublicKey};
pub use replay::ReplayCache;
