//! In-process transport backed by channels.
//!
//! Drives the full connection lifecycle (approval, status changes, data)
//! without touching a socket, which makes it the transport of choice for
//! integration tests and single-process tooling. A server endpoint is
//! created first; any number of client endpoints link to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{NetError, Result};

use super::{ConnectionStatus, DeliveryMode, Transport, TransportEvent, TransportHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Pending,
    Established,
}

struct Link {
    peer: Weak<Endpoint>,
    peer_handle: u64,
    state: LinkState,
}

struct Endpoint {
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    next_handle: AtomicU64,
    links: Mutex<HashMap<u64, Link>>,
}

impl Endpoint {
    fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            next_handle: AtomicU64::new(1),
            links: Mutex::new(HashMap::new()),
        })
    }

    fn allocate_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn push(&self, event: TransportEvent) {
        // Receiver dropped means the owning network stopped; drop the event.
        let _ = self.events_tx.send(event);
    }

    fn insert_link(&self, handle: u64, peer: &Arc<Endpoint>, peer_handle: u64, state: LinkState) {
        if let Ok(mut links) = self.links.lock() {
            links.insert(
                handle,
                Link {
                    peer: Arc::downgrade(peer),
                    peer_handle,
                    state,
                },
            );
        }
    }

    fn remove_link(&self, handle: u64) -> Option<(Weak<Endpoint>, u64)> {
        self.links
            .lock()
            .ok()
            .and_then(|mut links| links.remove(&handle))
            .map(|link| (link.peer, link.peer_handle))
    }

    fn establish(&self, handle: u64) -> Result<(Weak<Endpoint>, u64)> {
        let mut links = self
            .links
            .lock()
            .map_err(|_| NetError::Transport("endpoint link table poisoned".into()))?;
        let link = links
            .get_mut(&handle)
            .ok_or_else(|| NetError::Transport(format!("unknown handle {handle}")))?;
        link.state = LinkState::Established;
        Ok((link.peer.clone(), link.peer_handle))
    }

    fn established_peer(&self, handle: u64) -> Result<(Weak<Endpoint>, u64)> {
        let links = self
            .links
            .lock()
            .map_err(|_| NetError::Transport("endpoint link table poisoned".into()))?;
        let link = links
            .get(&handle)
            .ok_or_else(|| NetError::Transport(format!("unknown handle {handle}")))?;
        if link.state != LinkState::Established {
            return Err(NetError::Transport(format!(
                "handle {handle} is not established"
            )));
        }
        Ok((link.peer.clone(), link.peer_handle))
    }
}

/// Channel-backed transport endpoint.
pub struct MemoryTransport {
    endpoint: Arc<Endpoint>,
    remote: Option<Arc<Endpoint>>,
}

impl MemoryTransport {
    /// Create a listening endpoint.
    pub fn server() -> Self {
        Self {
            endpoint: Endpoint::new(),
            remote: None,
        }
    }

    /// Create a client endpoint linked to `server`.
    pub fn client(server: &MemoryTransport) -> Self {
        Self {
            endpoint: Endpoint::new(),
            remote: Some(Arc::clone(&server.endpoint)),
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("role", if self.remote.is_some() { &"client" } else { &"server" })
            .finish_non_exhaustive()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, hail: Bytes) -> Result<TransportHandle> {
        let server = self
            .remote
            .as_ref()
            .ok_or_else(|| NetError::Transport("server endpoints cannot connect".into()))?;

        let local_handle = self.endpoint.allocate_handle();
        let remote_handle = server.allocate_handle();

        self.endpoint
            .insert_link(local_handle, server, remote_handle, LinkState::Pending);
        server.insert_link(remote_handle, &self.endpoint, local_handle, LinkState::Pending);

        trace!(local_handle, remote_handle, "Memory transport connect");

        server.push(TransportEvent::ApprovalRequest {
            handle: TransportHandle(remote_handle),
            hail,
        });

        Ok(TransportHandle(local_handle))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.endpoint.events_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    fn send(&self, handle: TransportHandle, payload: Bytes, _mode: DeliveryMode) -> Result<()> {
        let (peer, peer_handle) = self.endpoint.established_peer(handle.0)?;
        let peer = peer
            .upgrade()
            .ok_or_else(|| NetError::Transport("peer endpoint is gone".into()))?;

        peer.push(TransportEvent::Data {
            handle: TransportHandle(peer_handle),
            payload,
        });
        Ok(())
    }

    fn approve(&self, handle: TransportHandle, hail: Bytes) -> Result<()> {
        let (peer, peer_handle) = self.endpoint.establish(handle.0)?;
        let peer = peer
            .upgrade()
            .ok_or_else(|| NetError::Transport("peer endpoint is gone".into()))?;

        peer.establish(peer_handle)?;
        peer.push(TransportEvent::StatusChanged {
            handle: TransportHandle(peer_handle),
            status: ConnectionStatus::Connected { hail },
        });
        Ok(())
    }

    fn deny(&self, handle: TransportHandle, reason: &str) -> Result<()> {
        let (peer, peer_handle) = self
            .endpoint
            .remove_link(handle.0)
            .ok_or_else(|| NetError::Transport(format!("unknown handle {handle}")))?;

        if let Some(peer) = peer.upgrade() {
            peer.remove_link(peer_handle);
            peer.push(TransportEvent::StatusChanged {
                handle: TransportHandle(peer_handle),
                status: ConnectionStatus::Disconnected {
                    reason: reason.to_string(),
                },
            });
        }
        Ok(())
    }

    fn disconnect(&self, handle: TransportHandle, reason: &str) -> Result<()> {
        let (peer, peer_handle) = self
            .endpoint
            .remove_link(handle.0)
            .ok_or_else(|| NetError::Transport(format!("unknown handle {handle}")))?;

        if let Some(peer) = peer.upgrade() {
            peer.remove_link(peer_handle);
            peer.push(TransportEvent::StatusChanged {
                handle: TransportHandle(peer_handle),
                status: ConnectionStatus::Disconnecting {
                    reason: reason.to_string(),
                },
            });
            peer.push(TransportEvent::StatusChanged {
                handle: TransportHandle(peer_handle),
                status: ConnectionStatus::Disconnected {
                    reason: reason.to_string(),
                },
            });
        }
        Ok(())
    }
}
