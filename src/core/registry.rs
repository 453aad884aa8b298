//! Packet group registry.
//!
//! Groups are registered once at startup, before the receive loop runs, and
//! the registry is read-only from worker threads afterwards. A tag collision
//! is a configuration error and aborts initialization.

use crate::config::PING_GROUP_TAG;
use crate::core::packet::{GroupTag, PacketGroup};
use crate::core::ping::PingGroup;
use crate::error::{NetError, Result};
use std::collections::HashMap;
use tracing::debug;

/// Catalog of registered packet groups, indexed by wire tag.
#[derive(Default)]
pub struct PacketRegistry {
    groups: HashMap<u8, Box<dyn PacketGroup>>,
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }

    /// Register a packet group.
    ///
    /// # Errors
    /// `NetError::DuplicateGroup` if the tag is already taken. The existing
    /// registration is left untouched.
    pub fn register(&mut self, group: Box<dyn PacketGroup>) -> Result<()> {
        let tag = group.tag();
        if self.groups.contains_key(&tag.0) {
            return Err(NetError::DuplicateGroup(tag.0));
        }

        debug!(tag = %tag, "Registered packet group");
        self.groups.insert(tag.0, group);
        Ok(())
    }

    /// Register the built-in groups (currently the reserved ping group).
    pub fn register_defaults(&mut self) -> Result<()> {
        self.register(Box::new(PingGroup))
    }

    /// Look up a group by tag. Unknown tags return `None`; the receive loop
    /// drops such messages and keeps running.
    pub fn get(&self, tag: GroupTag) -> Option<&dyn PacketGroup> {
        self.groups.get(&tag.0).map(Box::as_ref)
    }

    pub fn contains(&self, tag: GroupTag) -> bool {
        self.groups.contains_key(&tag.0)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl std::fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<u8> = self.groups.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("PacketRegistry").field("tags", &tags).finish()
    }
}

/// The reserved tag the ping group occupies.
pub const RESERVED_PING_TAG: GroupTag = GroupTag(PING_GROUP_TAG);
