//! Connection registry.
//!
//! Tracks every established connection under a single lock, indexed both by
//! stable [`ConnectionId`] and by transport handle, so the receive loop and
//! outbound senders can translate between the two in either direction.
//!
//! Each connection is assigned a worker when it is added: the worker with
//! the lowest load at that moment wins, ties going to the lowest index.
//! The assignment is permanent; loads drift as connections come and go and
//! are never rebalanced. A connection's packets therefore always land on
//! the same worker, which keeps per-connection ordering without any
//! cross-worker coordination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::core::envelope::ConnectionId;
use crate::error::{NetError, Result};
use crate::transport::TransportHandle;
use crate::utils::crypto::SessionCipher;

/// Everything the core needs to know about one established connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub handle: TransportHandle,
    pub cipher: Arc<SessionCipher>,
    pub worker: usize,
}

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<ConnectionId, Arc<ConnectionInfo>>,
    by_handle: HashMap<TransportHandle, Arc<ConnectionInfo>>,
    loads: Vec<usize>,
}

/// Bidirectional connection table with load-based worker assignment.
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new(worker_count: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_id: HashMap::new(),
                by_handle: HashMap::new(),
                loads: vec![0; worker_count.max(1)],
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| NetError::Custom("connection registry lock poisoned".into()))
    }

    /// Register a connection and assign it the least-loaded worker.
    ///
    /// # Errors
    /// `NetError::DuplicateConnection` if the id or handle is already
    /// registered; the existing entry is untouched.
    pub fn add(
        &self,
        id: ConnectionId,
        handle: TransportHandle,
        cipher: Arc<SessionCipher>,
    ) -> Result<Arc<ConnectionInfo>> {
        let mut inner = self.lock()?;

        if inner.by_id.contains_key(&id) || inner.by_handle.contains_key(&handle) {
            warn!(%id, %handle, "Rejected duplicate connection registration");
            return Err(NetError::DuplicateConnection);
        }

        // Lowest load wins, ties resolved to the lowest index.
        let worker = inner
            .loads
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| **load)
            .map(|(index, _)| index)
            .unwrap_or(0);
        inner.loads[worker] += 1;

        let info = Arc::new(ConnectionInfo {
            id,
            handle,
            cipher,
            worker,
        });
        inner.by_id.insert(id, Arc::clone(&info));
        inner.by_handle.insert(handle, Arc::clone(&info));

        debug!(%id, %handle, worker, "Connection registered");
        Ok(info)
    }

    /// Remove a connection by id. Safe to call for ids that were never
    /// added or were already removed.
    pub fn remove_by_id(&self, id: &ConnectionId) -> Result<Option<Arc<ConnectionInfo>>> {
        let mut inner = self.lock()?;
        let Some(info) = inner.by_id.remove(id) else {
            return Ok(None);
        };
        inner.by_handle.remove(&info.handle);
        if let Some(load) = inner.loads.get_mut(info.worker) {
            *load = load.saturating_sub(1);
        }
        debug!(%id, handle = %info.handle, "Connection removed");
        Ok(Some(info))
    }

    /// Remove a connection by transport handle. Idempotent like
    /// [`remove_by_id`](Self::remove_by_id).
    pub fn remove_by_handle(
        &self,
        handle: &TransportHandle,
    ) -> Result<Option<Arc<ConnectionInfo>>> {
        let mut inner = self.lock()?;
        let Some(info) = inner.by_handle.remove(handle) else {
            return Ok(None);
        };
        inner.by_id.remove(&info.id);
        if let Some(load) = inner.loads.get_mut(info.worker) {
            *load = load.saturating_sub(1);
        }
        debug!(id = %info.id, %handle, "Connection removed");
        Ok(Some(info))
    }

    pub fn find_by_id(&self, id: &ConnectionId) -> Result<Option<Arc<ConnectionInfo>>> {
        Ok(self.lock()?.by_id.get(id).cloned())
    }

    pub fn find_by_handle(
        &self,
        handle: &TransportHandle,
    ) -> Result<Option<Arc<ConnectionInfo>>> {
        Ok(self.lock()?.by_handle.get(handle).cloned())
    }

    pub fn contains_id(&self, id: &ConnectionId) -> Result<bool> {
        Ok(self.lock()?.by_id.contains_key(id))
    }

    pub fn contains_handle(&self, handle: &TransportHandle) -> Result<bool> {
        Ok(self.lock()?.by_handle.contains_key(handle))
    }

    pub fn worker_of(&self, id: &ConnectionId) -> Result<Option<usize>> {
        Ok(self.lock()?.by_id.get(id).map(|info| info.worker))
    }

    /// Snapshot of every registered connection, for broadcast.
    pub fn all(&self) -> Result<Vec<Arc<ConnectionInfo>>> {
        Ok(self.lock()?.by_id.values().cloned().collect())
    }

    /// Remove every connection, returning the drained entries.
    pub fn drain(&self) -> Result<Vec<Arc<ConnectionInfo>>> {
        let mut inner = self.lock()?;
        let drained: Vec<_> = inner.by_id.drain().map(|(_, info)| info).collect();
        inner.by_handle.clear();
        for load in &mut inner.loads {
            *load = 0;
        }
        Ok(drained)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn loads(&self) -> Vec<usize> {
        self.inner
            .lock()
            .map(|inner| inner.loads.clone())
            .unwrap_or_default()
    }
}
