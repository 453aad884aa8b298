//! Packet dispatcher with static type-tag routing.
//!
//! At most one handler per packet type; registering a duplicate is a
//! configuration error at startup. An unregistered type is not an error;
//! it is a packet this side does not care about. Handler failures (returned
//! errors and panics alike) are contained at the dispatch boundary so no
//! worker dies from a single bad handler.

use crate::core::envelope::ConnectionId;
use crate::core::packet::Packet;
use crate::error::{constants, NetError, Result};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;
use tracing::{error, trace, warn};

type HandlerFn = dyn Fn(ConnectionId, &dyn Packet) -> Result<()> + Send + Sync + 'static;

/// What happened to a single dispatched packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion.
    Handled,
    /// No handler is registered for this type; the packet was ignored.
    NoHandler,
    /// The handler returned an error (logged, swallowed).
    HandlerError,
    /// The handler panicked (caught, logged, swallowed).
    HandlerPanic,
}

/// Maps a packet's type tag to its single registered handler.
pub struct Dispatcher {
    handlers: RwLock<HashMap<&'static str, Box<HandlerFn>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a packet type.
    ///
    /// # Errors
    /// `NetError::DuplicateHandler` if the type already has one. The first
    /// registration stays active.
    pub fn register<F>(&self, type_tag: &'static str, handler: F) -> Result<()>
    where
        F: Fn(ConnectionId, &dyn Packet) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| NetError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        if handlers.contains_key(type_tag) {
            return Err(NetError::DuplicateHandler(type_tag));
        }

        handlers.insert(type_tag, Box::new(handler));
        Ok(())
    }

    /// Whether a handler is registered for the given type.
    pub fn has_handler(&self, type_tag: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(type_tag))
            .unwrap_or(false)
    }

    /// Invoke the handler for `packet` synchronously on the calling thread.
    ///
    /// Missing handlers are a silent success. Handler errors and panics are
    /// logged here and never escape to the caller.
    pub fn dispatch(&self, conn: ConnectionId, packet: &dyn Packet) -> Result<DispatchOutcome> {
        let type_tag = packet.type_tag();

        let handlers = self
            .handlers
            .read()
            .map_err(|_| NetError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;

        let Some(handler) = handlers.get(type_tag) else {
            trace!(%conn, type_tag, "No handler registered, packet ignored");
            return Ok(DispatchOutcome::NoHandler);
        };

        match catch_unwind(AssertUnwindSafe(|| handler(conn, packet))) {
            Ok(Ok(())) => Ok(DispatchOutcome::Handled),
            Ok(Err(e)) => {
                warn!(%conn, type_tag, error = %e, "Handler returned error");
                Ok(DispatchOutcome::HandlerError)
            }
            Err(_) => {
                error!(%conn, type_tag, "Handler panicked; worker continues");
                Ok(DispatchOutcome::HandlerPanic)
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("Dispatcher").field("handlers", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ping::{Ping, Pong};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_invokes_registered_handler() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        dispatcher
            .register("gamenet.ping", move |_, packet| {
                assert!(packet.as_any().downcast_ref::<Ping>().is_some());
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let outcome = dispatcher
            .dispatch(ConnectionId::random(), &Ping { timestamp_ms: 1 })
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_registration_fails_and_first_stays_active() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        dispatcher
            .register("gamenet.ping", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let err = dispatcher
            .register("gamenet.ping", |_, _| panic!("must never run"))
            .unwrap_err();
        assert!(matches!(err, NetError::DuplicateHandler("gamenet.ping")));

        let outcome = dispatcher
            .dispatch(ConnectionId::random(), &Ping { timestamp_ms: 2 })
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_type_is_silently_ignored() {
        let dispatcher = Dispatcher::new();
        let outcome = dispatcher
            .dispatch(ConnectionId::random(), &Pong { timestamp_ms: 3 })
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::NoHandler);
    }

    #[test]
    fn handler_error_is_contained() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register("gamenet.ping", |_, _| {
                Err(NetError::Handler("bad day".into()))
            })
            .unwrap();

        let outcome = dispatcher
            .dispatch(ConnectionId::random(), &Ping::default())
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::HandlerError);
    }

    #[test]
    fn handler_panic_is_contained() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register("gamenet.ping", |_, _| panic!("boom"))
            .unwrap();

        let outcome = dispatcher
            .dispatch(ConnectionId::random(), &Ping::default())
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::HandlerPanic);

        // The dispatcher still works afterwards
        let outcome = dispatcher
            .dispatch(ConnectionId::random(), &Pong::default())
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::NoHandler);
    }
}
