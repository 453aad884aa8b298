//! # Protocol Layer
//!
//! Handler dispatch and the connection handshake.
//!
//! ## Components
//! - **Dispatcher**: routes decoded packets to registered handlers by stable
//!   type tag, isolating handler failures from the worker loops
//! - **Handshake**: x25519 key agreement bound to the server's static key,
//!   producing the per-connection session key

pub mod dispatcher;
pub mod handshake;

pub use dispatcher::{DispatchOutcome, Dispatcher};
