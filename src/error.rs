//! # Error Types
//!
//! Error handling for the network core.
//!
//! This module defines all error variants that can occur during network
//! operations, from low-level I/O errors to packet registry and dispatch
//! violations.
//!
//! ## Error Categories
//! - **I/O Errors**: Network and file system failures
//! - **Registry Errors**: Duplicate group tags, duplicate handler types
//! - **Handshake Errors**: Stale timestamps, replays, failed confirmation
//! - **Cryptographic Errors**: Encryption/decryption failures
//! - **Codec Errors**: Malformed envelopes and packet payloads
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Handshake errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
    pub const ERR_INVALID_TIMESTAMP: &str = "Invalid or stale timestamp";
    pub const ERR_REPLAY_ATTACK: &str = "Replay attack detected - nonce/timestamp already seen";
    pub const ERR_CONFIRM_MISMATCH: &str = "Server confirmation hash did not verify";
    pub const ERR_HANDSHAKE_CONSUMED: &str = "Handshake state already consumed";

    /// Key format errors
    pub const ERR_KEY_TRUNCATED: &str = "Key material truncated";
    pub const ERR_KEY_BAD_LENGTH: &str = "Unexpected key bit length";
    pub const ERR_KEY_MISMATCH: &str = "Stored public component does not match secret";

    /// Codec errors
    pub const ERR_ENVELOPE_SHORT: &str = "Envelope shorter than identity and group tag";
    pub const ERR_CIPHERTEXT_SHORT: &str = "Ciphertext shorter than nonce prefix";
}

/// NetError is the primary error type for all network operations.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Key format error: {0}")]
    KeyFormat(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Packet group 0x{0:02x} already registered")]
    DuplicateGroup(u8),

    #[error("Handler already registered for packet type '{0}'")]
    DuplicateHandler(&'static str),

    #[error("No packet group registered for tag 0x{0:02x}")]
    UnknownGroup(u8),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Connection already registered")]
    DuplicateConnection,

    #[error("Unknown connection")]
    UnknownConnection,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Network is not running")]
    NotRunning,

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using NetError
pub type Result<T> = std::result::Result<T, NetError>;
