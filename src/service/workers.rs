//! Worker pool.
//!
//! Decoded packets are handed to one of N worker tasks, each with its own
//! unbounded queue. The receive loop picks the worker from the connection's
//! permanent assignment, so packets from one connection are always consumed
//! by the same worker in arrival order. Queues are independent: a slow or
//! panicking handler on one worker never stalls the others.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::envelope::ConnectionId;
use crate::core::packet::Packet;
use crate::error::{NetError, Result};
use crate::protocol::{DispatchOutcome, Dispatcher};
use crate::utils::metrics::NetMetrics;

type Job = (ConnectionId, Box<dyn Packet>);

/// Fixed-size pool of dispatch workers.
pub struct WorkerPool {
    senders: Vec<mpsc::UnboundedSender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers that drain their queues into the dispatcher.
    pub fn spawn(count: usize, dispatcher: Arc<Dispatcher>, metrics: Arc<NetMetrics>) -> Self {
        let count = count.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for index in 0..count {
            let (tx, rx) = mpsc::unbounded_channel::<Job>();
            senders.push(tx);
            handles.push(tokio::spawn(Self::run(
                index,
                rx,
                Arc::clone(&dispatcher),
                Arc::clone(&metrics),
            )));
        }

        Self { senders, handles }
    }

    async fn run(
        index: usize,
        mut rx: mpsc::UnboundedReceiver<Job>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<NetMetrics>,
    ) {
        debug!(worker = index, "Worker started");

        while let Some((conn, packet)) = rx.recv().await {
            match dispatcher.dispatch(conn, packet.as_ref()) {
                Ok(DispatchOutcome::Handled) => metrics.record_dispatched(),
                Ok(DispatchOutcome::NoHandler) => metrics.record_no_handler(),
                Ok(DispatchOutcome::HandlerError) | Ok(DispatchOutcome::HandlerPanic) => {
                    metrics.record_handler_failure();
                }
                Err(e) => {
                    warn!(worker = index, %conn, error = %e, "Dispatch failed");
                    metrics.record_handler_failure();
                }
            }
        }

        debug!(worker = index, "Worker stopped");
    }

    /// Queue a packet on a specific worker.
    ///
    /// # Errors
    /// `NetError::NotRunning` if the pool has been stopped or the index is
    /// out of range.
    pub fn enqueue(
        &self,
        worker: usize,
        conn: ConnectionId,
        packet: Box<dyn Packet>,
    ) -> Result<()> {
        let sender = self.senders.get(worker).ok_or(NetError::NotRunning)?;
        sender
            .send((conn, packet))
            .map_err(|_| NetError::NotRunning)
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Close the queues. Workers finish whatever is already queued and
    /// then exit; already-queued packets for other workers are unaffected.
    pub fn stop(&mut self) {
        self.senders.clear();
        // Workers exit when their channel drains; the join handles are
        // detached rather than awaited so stop can stay synchronous.
        self.handles.clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.senders.len())
            .finish()
    }
}
