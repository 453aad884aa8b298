//! Network instance: the receive loop and its lifecycle.
//!
//! A [`Network`] owns one transport, one packet registry, one dispatcher
//! and one worker pool. A single receive-loop task drains the transport's
//! event stream: approval requests run the handshake, data events are
//! decrypted and decoded inline, and the resulting packets are queued on
//! the worker permanently assigned to their connection. Malformed or
//! undecryptable traffic is logged and dropped without ever taking the
//! loop down.
//!
//! The same type serves both roles. Built with a static keypair it answers
//! approval requests (server); built with a pinned server public key it
//! dials out with [`Network::connect`] (client).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::config::{NetworkConfig, IDENTITY_LEN};
use crate::core::envelope::{ConnectionId, Envelope};
use crate::core::packet::{Packet, PacketContext, PacketGroup};
use crate::core::registry::PacketRegistry;
use crate::error::{NetError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::{
    self, ClientHandshake, HandshakeAccept, HandshakeInit,
};
use crate::service::connections::ConnectionRegistry;
use crate::service::workers::WorkerPool;
use crate::transport::{
    ConnectionStatus, DeliveryMode, DiagnosticLevel, Transport, TransportEvent, TransportHandle,
};
use crate::utils::crypto::SessionCipher;
use crate::utils::diag::dump_raw_buffer;
use crate::utils::keys::{StaticKeypair, StaticPublicKey};
use crate::utils::metrics::{MetricsSnapshot, NetMetrics};
use crate::utils::replay::ReplayCache;

type ApprovalFn = Arc<dyn Fn(&HandshakeInit) -> bool + Send + Sync>;
type ConnectionFn = Arc<dyn Fn(ConnectionId) + Send + Sync>;

/// Approval hail returned to a connecting client: the handshake accept plus
/// the identity the server minted for the connection.
#[derive(Serialize, Deserialize)]
struct ApprovalPayload {
    accept: HandshakeAccept,
    identity: [u8; IDENTITY_LEN],
}

enum Lifecycle {
    Idle,
    Running { shutdown: watch::Sender<bool> },
    Stopped,
}

struct Shared {
    transport: Arc<dyn Transport>,
    registry: Arc<PacketRegistry>,
    dispatcher: Arc<Dispatcher>,
    connections: Arc<ConnectionRegistry>,
    metrics: Arc<NetMetrics>,
    approval: ApprovalFn,
    on_connected: Option<ConnectionFn>,
    on_disconnected: Option<ConnectionFn>,
    keypair: Option<StaticKeypair>,
    pinned: Option<StaticPublicKey>,
    pending: Mutex<HashMap<TransportHandle, ClientHandshake>>,
    replay: Mutex<ReplayCache>,
    timestamp_max_age_secs: u64,
    local_id: ConnectionId,
}

/// A running (or startable) network endpoint.
pub struct Network {
    shared: Arc<Shared>,
    state: Mutex<Lifecycle>,
    worker_count: usize,
}

/// Builder for [`Network`].
pub struct NetworkBuilder {
    config: NetworkConfig,
    transport: Option<Arc<dyn Transport>>,
    registry: PacketRegistry,
    dispatcher: Arc<Dispatcher>,
    approval: Option<ApprovalFn>,
    on_connected: Option<ConnectionFn>,
    on_disconnected: Option<ConnectionFn>,
    keypair: Option<StaticKeypair>,
    pinned: Option<StaticPublicKey>,
}

impl NetworkBuilder {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            transport: None,
            registry: PacketRegistry::new(),
            dispatcher: Arc::new(Dispatcher::new()),
            approval: None,
            on_connected: None,
            on_disconnected: None,
            keypair: None,
            pinned: None,
        }
    }

    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Register an application packet group.
    pub fn register_group(mut self, group: Box<dyn PacketGroup>) -> Result<Self> {
        self.registry.register(group)?;
        Ok(self)
    }

    /// Register a packet handler.
    pub fn register_handler<F>(self, type_tag: &'static str, handler: F) -> Result<Self>
    where
        F: Fn(ConnectionId, &dyn Packet) -> Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.register(type_tag, handler)?;
        Ok(self)
    }

    /// Install the server's long-lived keypair; enables the approval path.
    pub fn server_keys(mut self, keypair: StaticKeypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Pin the public key of the server this endpoint dials.
    pub fn pinned_server_key(mut self, key: StaticPublicKey) -> Self {
        self.pinned = Some(key);
        self
    }

    /// Override the approval policy. The default accepts every hail that
    /// carries a valid handshake init.
    pub fn on_approval<F>(mut self, policy: F) -> Self
    where
        F: Fn(&HandshakeInit) -> bool + Send + Sync + 'static,
    {
        self.approval = Some(Arc::new(policy));
        self
    }

    pub fn on_connected<F>(mut self, callback: F) -> Self
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(callback));
        self
    }

    pub fn on_disconnected<F>(mut self, callback: F) -> Self
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.on_disconnected = Some(Arc::new(callback));
        self
    }

    pub fn build(mut self) -> Result<Network> {
        self.config.validate_strict()?;

        let transport = self
            .transport
            .ok_or_else(|| NetError::Config("network requires a transport".into()))?;

        self.registry.register_defaults()?;

        let worker_count = self.config.workers.effective_count();
        let handshake_cfg = &self.config.handshake;

        let shared = Arc::new(Shared {
            transport,
            registry: Arc::new(self.registry),
            dispatcher: self.dispatcher,
            connections: Arc::new(ConnectionRegistry::new(worker_count)),
            metrics: Arc::new(NetMetrics::new()),
            approval: self.approval.unwrap_or_else(|| Arc::new(|_| true)),
            on_connected: self.on_connected,
            on_disconnected: self.on_disconnected,
            keypair: self.keypair,
            pinned: self.pinned,
            pending: Mutex::new(HashMap::new()),
            replay: Mutex::new(ReplayCache::with_settings(
                Duration::from_secs(handshake_cfg.replay_ttl_secs),
                handshake_cfg.replay_max_entries,
            )),
            timestamp_max_age_secs: handshake_cfg.timestamp_max_age_secs,
            local_id: ConnectionId::random(),
        });

        Ok(Network {
            shared,
            state: Mutex::new(Lifecycle::Idle),
            worker_count,
        })
    }
}

impl Network {
    /// Start the worker pool and the receive loop. Idempotent while the
    /// instance is running; a stopped instance cannot be restarted.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NetError::Custom("network state lock poisoned".into()))?;

        match &*state {
            Lifecycle::Running { .. } => return Ok(()),
            Lifecycle::Stopped => return Err(NetError::NotRunning),
            Lifecycle::Idle => {}
        }

        let events = self
            .shared
            .transport
            .take_events()
            .ok_or_else(|| NetError::Transport("transport event stream already taken".into()))?;

        let pool = WorkerPool::spawn(
            self.worker_count,
            Arc::clone(&self.shared.dispatcher),
            Arc::clone(&self.shared.metrics),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            pool,
            events,
            shutdown_rx,
        ));

        info!(
            local_id = %self.shared.local_id,
            workers = self.worker_count,
            "Network started"
        );
        *state = Lifecycle::Running {
            shutdown: shutdown_tx,
        };
        Ok(())
    }

    /// Disconnect everything and shut the receive loop and workers down.
    /// Idempotent.
    pub fn stop(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NetError::Custom("network state lock poisoned".into()))?;

        let Lifecycle::Running { shutdown } = &*state else {
            return Ok(());
        };
        let _ = shutdown.send(true);
        *state = Lifecycle::Stopped;
        drop(state);

        for info in self.shared.connections.drain()? {
            if let Err(e) = self.shared.transport.disconnect(info.handle, "shutting down") {
                debug!(id = %info.id, error = %e, "Disconnect during shutdown failed");
            }
            self.shared.metrics.record_connection_removed();
            if let Some(callback) = &self.shared.on_disconnected {
                callback(info.id);
            }
        }

        info!(local_id = %self.shared.local_id, "Network stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state.lock().as_deref(),
            Ok(Lifecycle::Running { .. })
        )
    }

    /// Dial the server this endpoint was built against. The connection is
    /// established asynchronously; `on_connected` fires once the handshake
    /// completes.
    pub fn connect(&self) -> Result<()> {
        if !self.is_running() {
            return Err(NetError::NotRunning);
        }
        let pinned = self
            .shared
            .pinned
            .as_ref()
            .ok_or_else(|| NetError::Config("no pinned server key; cannot dial".into()))?;

        let (pending, init) = handshake::client_hello(pinned)?;
        let hail = Bytes::from(init.to_bytes()?);

        let handle = self.shared.transport.connect(hail)?;
        self.shared
            .pending
            .lock()
            .map_err(|_| NetError::Custom("pending handshake lock poisoned".into()))?
            .insert(handle, pending);

        debug!(%handle, "Dialing server");
        Ok(())
    }

    /// Encrypt and send one packet to one connection.
    pub fn send(&self, id: &ConnectionId, packet: &dyn Packet) -> Result<()> {
        let info = self
            .shared
            .connections
            .find_by_id(id)?
            .ok_or(NetError::UnknownConnection)?;

        let mut payload = BytesMut::new();
        packet.encode(&mut payload)?;
        let envelope = Envelope::new(*id, packet.group(), payload.freeze());

        let sealed = info.cipher.seal(&envelope.encode())?;
        self.shared
            .transport
            .send(info.handle, Bytes::from(sealed), DeliveryMode::ReliableOrdered)
    }

    /// Send one packet to every connection. Returns how many sends
    /// succeeded; individual failures are logged and skipped.
    pub fn broadcast(&self, packet: &dyn Packet) -> Result<usize> {
        let mut payload = BytesMut::new();
        packet.encode(&mut payload)?;
        let payload = payload.freeze();
        let group = packet.group();

        let mut delivered = 0;
        for info in self.shared.connections.all()? {
            let envelope = Envelope::new(info.id, group, payload.clone());
            let sealed = match info.cipher.seal(&envelope.encode()) {
                Ok(sealed) => sealed,
                Err(e) => {
                    warn!(id = %info.id, error = %e, "Broadcast seal failed");
                    continue;
                }
            };
            match self.shared.transport.send(
                info.handle,
                Bytes::from(sealed),
                DeliveryMode::ReliableOrdered,
            ) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(id = %info.id, error = %e, "Broadcast send failed"),
            }
        }
        Ok(delivered)
    }

    /// Tear down one connection.
    pub fn disconnect(&self, id: &ConnectionId, reason: &str) -> Result<()> {
        let Some(info) = self.shared.connections.remove_by_id(id)? else {
            return Ok(());
        };
        self.shared.metrics.record_connection_removed();
        self.shared.transport.disconnect(info.handle, reason)?;
        if let Some(callback) = &self.shared.on_disconnected {
            callback(info.id);
        }
        Ok(())
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Identity minted for this endpoint at build time.
    pub fn local_id(&self) -> ConnectionId {
        self.shared.local_id
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("local_id", &self.shared.local_id)
            .field("workers", &self.worker_count)
            .field("connections", &self.shared.connections.len())
            .finish()
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    pool: WorkerPool,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                shared.handle_event(&pool, event);
            }
        }
    }
    debug!("Receive loop exiting");
    // Dropping the pool closes the worker queues; queued packets drain.
}

impl Shared {
    fn handle_event(&self, pool: &WorkerPool, event: TransportEvent) {
        match event {
            TransportEvent::ApprovalRequest { handle, hail } => {
                self.handle_approval(handle, &hail);
            }
            TransportEvent::StatusChanged { handle, status } => {
                self.handle_status(handle, status);
            }
            TransportEvent::Data { handle, payload } => {
                self.handle_data(pool, handle, payload);
            }
            TransportEvent::Diagnostic { level, message } => match level {
                DiagnosticLevel::Debug => debug!(target: "gamenet::transport", "{message}"),
                DiagnosticLevel::Warning => warn!(target: "gamenet::transport", "{message}"),
                DiagnosticLevel::Error => error!(target: "gamenet::transport", "{message}"),
            },
        }
    }

    fn handle_approval(&self, handle: TransportHandle, hail: &[u8]) {
        let Some(keypair) = &self.keypair else {
            warn!(%handle, "Approval request on an endpoint without server keys");
            let _ = self.transport.deny(handle, "not accepting connections");
            return;
        };

        let init = match HandshakeInit::from_bytes(hail) {
            Ok(init) => init,
            Err(e) => {
                warn!(%handle, error = %e, "Unreadable connect hail");
                dump_raw_buffer("connect hail", hail);
                let _ = self.transport.deny(handle, "malformed hail");
                return;
            }
        };

        if !(self.approval)(&init) {
            debug!(%handle, "Connection refused by approval policy");
            let _ = self.transport.deny(handle, "connection refused");
            return;
        }

        let accepted = {
            let mut replay = match self.replay.lock() {
                Ok(replay) => replay,
                Err(_) => {
                    error!(%handle, "Replay cache lock poisoned");
                    let _ = self.transport.deny(handle, "internal error");
                    return;
                }
            };
            handshake::server_accept(
                keypair,
                &init,
                self.timestamp_max_age_secs,
                handle.0,
                &mut replay,
            )
        };

        let (key, accept) = match accepted {
            Ok(result) => result,
            Err(e) => {
                warn!(%handle, error = %e, "Handshake rejected");
                let _ = self.transport.deny(handle, "handshake rejected");
                return;
            }
        };

        let id = ConnectionId::random();
        let cipher = Arc::new(SessionCipher::new(key));
        if let Err(e) = self.connections.add(id, handle, cipher) {
            warn!(%handle, error = %e, "Could not register approved connection");
            let _ = self.transport.deny(handle, "internal error");
            return;
        }

        let payload = ApprovalPayload {
            accept,
            identity: *id.as_bytes(),
        };
        let payload = match bincode::serialize(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(%handle, error = %e, "Could not serialize approval payload");
                let _ = self.connections.remove_by_handle(&handle);
                let _ = self.transport.deny(handle, "internal error");
                return;
            }
        };

        if let Err(e) = self.transport.approve(handle, Bytes::from(payload)) {
            warn!(%handle, error = %e, "Transport approve failed");
            let _ = self.connections.remove_by_handle(&handle);
            return;
        }

        info!(%id, %handle, "Connection approved");
        self.metrics.record_connection_added();
        if let Some(callback) = &self.on_connected {
            callback(id);
        }
    }

    fn handle_status(&self, handle: TransportHandle, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connected { hail } => self.finish_dial(handle, &hail),
            ConnectionStatus::Disconnecting { reason } => {
                debug!(%handle, reason, "Connection disconnecting");
            }
            ConnectionStatus::Disconnected { reason } => {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.remove(&handle);
                }
                match self.connections.remove_by_handle(&handle) {
                    Ok(Some(info)) => {
                        info!(id = %info.id, %handle, reason, "Connection closed");
                        self.metrics.record_connection_removed();
                        if let Some(callback) = &self.on_disconnected {
                            callback(info.id);
                        }
                    }
                    Ok(None) => debug!(%handle, reason, "Unknown connection closed"),
                    Err(e) => error!(%handle, error = %e, "Connection registry failure"),
                }
            }
        }
    }

    /// Complete an outbound handshake from the server's approval hail.
    fn finish_dial(&self, handle: TransportHandle, hail: &[u8]) {
        let pending = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&handle),
            Err(_) => {
                error!(%handle, "Pending handshake lock poisoned");
                return;
            }
        };
        let Some(state) = pending else {
            trace!(%handle, "Connected event without a pending dial, ignored");
            return;
        };

        let payload: ApprovalPayload = match bincode::deserialize(hail) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%handle, error = %e, "Unreadable approval hail");
                dump_raw_buffer("approval hail", hail);
                let _ = self.transport.disconnect(handle, "malformed approval");
                return;
            }
        };

        let key = match handshake::client_finish(state, &payload.accept) {
            Ok(key) => key,
            Err(e) => {
                warn!(%handle, error = %e, "Server failed authentication");
                let _ = self.transport.disconnect(handle, "handshake failed");
                return;
            }
        };

        let id = ConnectionId::from_bytes(payload.identity);
        let cipher = Arc::new(SessionCipher::new(key));
        if let Err(e) = self.connections.add(id, handle, cipher) {
            warn!(%id, %handle, error = %e, "Could not register dialed connection");
            let _ = self.transport.disconnect(handle, "internal error");
            return;
        }

        info!(%id, %handle, "Connected to server");
        self.metrics.record_connection_added();
        if let Some(callback) = &self.on_connected {
            callback(id);
        }
    }

    fn handle_data(&self, pool: &WorkerPool, handle: TransportHandle, payload: Bytes) {
        let info = match self.connections.find_by_handle(&handle) {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!(%handle, "Data from an unregistered connection, dropped");
                self.metrics.record_dropped_unknown_connection();
                return;
            }
            Err(e) => {
                error!(%handle, error = %e, "Connection registry failure");
                return;
            }
        };

        let plaintext = match info.cipher.open(&payload) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(id = %info.id, error = %e, "Message failed decryption, dropped");
                self.metrics.record_dropped_decrypt();
                return;
            }
        };

        let envelope = match Envelope::parse(Bytes::from(plaintext)) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id = %info.id, error = %e, "Malformed envelope, dropped");
                self.metrics.record_dropped_decode();
                return;
            }
        };

        if envelope.identity != info.id {
            warn!(
                id = %info.id,
                claimed = %envelope.identity,
                "Envelope identity does not match its connection, dropped"
            );
            self.metrics.record_dropped_decode();
            return;
        }

        let Some(group) = self.registry.get(envelope.group) else {
            warn!(id = %info.id, group = %envelope.group, "Unknown packet group, dropped");
            self.metrics.record_dropped_unknown_group();
            return;
        };

        let ctx = PacketContext { id: info.id };
        let mut buf = envelope.payload.clone();
        let packet = group.create(&ctx, &mut buf).and_then(|mut packet| {
            packet.decode(&mut buf)?;
            Ok(packet)
        });
        let packet = match packet {
            Ok(packet) => packet,
            Err(e) => {
                warn!(id = %info.id, group = %envelope.group, error = %e, "Packet decode failed");
                dump_raw_buffer("packet payload", &envelope.payload);
                self.metrics.record_dropped_decode();
                return;
            }
        };

        if let Err(e) = pool.enqueue(info.worker, info.id, packet) {
            warn!(id = %info.id, error = %e, "Worker queue unavailable, packet dropped");
        }
    }
}
