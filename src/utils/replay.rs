//! TTL-based replay cache for handshake nonces.
//!
//! Tracks seen nonce/timestamp pairs per transport peer so a captured
//! `HandshakeInit` cannot be replayed inside the timestamp window. Entries
//! expire on TTL and the cache is capacity-bounded with FIFO eviction.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CacheEntry {
    added_at: Instant,
    timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    peer: u64,
    nonce: [u8; 16],
}

/// Replay cache with TTL expiry and O(1) FIFO eviction.
#[derive(Debug)]
pub struct ReplayCache {
    entries: HashMap<CacheKey, CacheEntry>,
    insertion_order: VecDeque<CacheKey>,
    ttl: Duration,
    max_entries: usize,
}

impl ReplayCache {
    /// Default TTL: 5 minutes (longer than the handshake timestamp window).
    /// Default capacity: 10,000 entries.
    pub fn new() -> Self {
        Self::with_settings(Duration::from_secs(300), 10_000)
    }

    pub fn with_settings(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            ttl,
            max_entries,
        }
    }

    /// Check whether a nonce/timestamp pair has already been seen from this
    /// peer. New pairs are recorded; expired entries are cleaned on the way.
    pub fn is_replay(&mut self, peer: u64, nonce: &[u8; 16], timestamp: u64) -> bool {
        let key = CacheKey {
            peer,
            nonce: *nonce,
        };

        self.cleanup_expired();

        if let Some(entry) = self.entries.get(&key) {
            if entry.timestamp == timestamp {
                warn!(peer, timestamp, "Handshake replay detected");
                return true;
            }
            debug!(peer, "Nonce seen before with a different timestamp");
        }

        if self.entries.len() >= self.max_entries {
            let overflow = self.entries.len() - self.max_entries + 1;
            for _ in 0..overflow {
                if let Some(oldest) = self.insertion_order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                added_at: Instant::now(),
                timestamp,
            },
        );
        self.insertion_order.push_back(key);

        false
    }

    fn cleanup_expired(&mut self) {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.added_at) < self.ttl);

        while let Some(key) = self.insertion_order.front() {
            if !self.entries.contains_key(key) {
                self.insertion_order.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}
