//! Transport abstraction.
//!
//! The network core is transport-agnostic: anything that can carry opaque
//! byte payloads between peers, raise approval requests for inbound
//! connections, and report status transitions can back a network instance.
//! Events flow out of a transport through a single channel handed over once
//! via [`Transport::take_events`]; the receive loop owns that channel for
//! the lifetime of the instance.

pub mod memory;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::MemoryTransport;

/// Opaque per-transport connection handle. Only meaningful to the transport
/// that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(pub u64);

impl std::fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Delivery guarantees a transport may offer. Game traffic defaults to
/// reliable ordered delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    ReliableOrdered,
    ReliableUnordered,
    Unreliable,
}

/// Connection status transitions reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The remote side accepted; the hail carries its approval payload.
    Connected { hail: Bytes },
    /// Teardown has begun.
    Disconnecting { reason: String },
    /// The connection is gone.
    Disconnected { reason: String },
}

/// Severity of a transport diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Debug,
    Warning,
    Error,
}

/// Events a transport surfaces to the receive loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound peer wants to connect; `hail` is its connect payload.
    /// The transport holds the connection until `approve` or `deny`.
    ApprovalRequest {
        handle: TransportHandle,
        hail: Bytes,
    },
    /// A connection changed state.
    StatusChanged {
        handle: TransportHandle,
        status: ConnectionStatus,
    },
    /// An application payload arrived.
    Data {
        handle: TransportHandle,
        payload: Bytes,
    },
    /// Transport-internal diagnostics, forwarded to the log.
    Diagnostic {
        level: DiagnosticLevel,
        message: String,
    },
}

/// A bidirectional message transport.
///
/// Implementations must be safe to share across tasks; the network core
/// wraps them in an `Arc` and calls `send`/`approve`/`deny`/`disconnect`
/// from the receive loop while user code calls `send` concurrently.
pub trait Transport: Send + Sync {
    /// Open an outbound connection, presenting `hail` to the remote side.
    /// The result is pending until a `StatusChanged` event reports the
    /// outcome.
    fn connect(&self, hail: Bytes) -> Result<TransportHandle>;

    /// Hand over the event stream. Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Send a payload on an established connection.
    fn send(&self, handle: TransportHandle, payload: Bytes, mode: DeliveryMode) -> Result<()>;

    /// Accept a pending inbound connection, presenting `hail` back to the
    /// connecting peer.
    fn approve(&self, handle: TransportHandle, hail: Bytes) -> Result<()>;

    /// Reject a pending inbound connection.
    fn deny(&self, handle: TransportHandle, reason: &str) -> Result<()>;

    /// Tear down an established connection.
    fn disconnect(&self, handle: TransportHandle, reason: &str) -> Result<()>;
}
