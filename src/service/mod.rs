//! Service layer: connection tracking, the worker pool, and the network
//! instance that ties transport, crypto and dispatch together.

pub mod connections;
pub mod network;
pub mod workers;

pub use connections::{ConnectionInfo, ConnectionRegistry};
pub use network::{Network, NetworkBuilder};
pub use workers::WorkerPool;
