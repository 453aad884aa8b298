//! # Configuration Management
//!
//! Centralized configuration for the network core.
//!
//! This module provides structured configuration for worker scheduling,
//! handshake validation windows, and logging, plus the wire-format
//! constants the codec layer builds on.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Programmatic overrides via `default_with_overrides()`

use crate::error::{NetError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Length of the connection identity prefix on every envelope.
pub const IDENTITY_LEN: usize = 16;

/// Length of the packet group tag that follows the identity.
pub const GROUP_TAG_LEN: usize = 1;

/// Group tag reserved for the built-in ping group.
pub const PING_GROUP_TAG: u8 = 0x00;

/// Max allowed decrypted envelope size (16 MB).
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Worker pool configuration
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Handshake validation configuration
    #[serde(default)]
    pub handshake: HandshakeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| NetError::Config(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| NetError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| NetError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.workers.validate());
        errors.extend(self.handshake.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NetError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Number of worker tasks. Zero means one per available CPU core.
    pub count: usize,

    /// Upper bound on the worker count, applied after auto-detection.
    pub max_count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 0,
            max_count: 64,
        }
    }
}

impl WorkerConfig {
    /// Resolve the configured count to a concrete worker count.
    pub fn effective_count(&self) -> usize {
        let base = if self.count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.count
        };
        base.clamp(1, self.max_count.max(1))
    }

    /// Validate worker configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_count == 0 {
            errors.push("Worker max_count must be greater than 0".to_string());
        } else if self.max_count > 1024 {
            errors.push(format!(
                "Worker max_count too large: {} (max recommended: 1024)",
                self.max_count
            ));
        }

        if self.count > self.max_count {
            errors.push(format!(
                "Worker count {} exceeds max_count {}",
                self.count, self.max_count
            ));
        }

        errors
    }
}

/// Handshake validation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandshakeConfig {
    /// Maximum age of a handshake timestamp, in seconds.
    pub timestamp_max_age_secs: u64,

    /// How long replay cache entries live, in seconds.
    pub replay_ttl_secs: u64,

    /// Capacity bound on the replay cache.
    pub replay_max_entries: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timestamp_max_age_secs: 30,
            replay_ttl_secs: 300,
            replay_max_entries: 10_000,
        }
    }
}

impl HandshakeConfig {
    /// Validate handshake configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.timestamp_max_age_secs == 0 {
            errors.push("Handshake timestamp window must be greater than 0".to_string());
        } else if self.timestamp_max_age_secs > 300 {
            errors.push("Handshake timestamp window too long (maximum: 300s)".to_string());
        }

        if self.replay_ttl_secs < self.timestamp_max_age_secs {
            errors.push(format!(
                "Replay TTL ({}s) shorter than the timestamp window ({}s)",
                self.replay_ttl_secs, self.timestamp_max_age_secs
            ));
        }

        if self.replay_max_entries == 0 {
            errors.push("Replay cache capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter: "trace", "debug", "info", "warn" or "error".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => errors.push(format!(
                "Invalid log level: '{other}' (expected trace, debug, info, warn or error)"
            )),
        }

        errors
    }
}
