//! Worker pool shared by every connection.
//!
//! - [`manager`] - round-robin dispatch and phased shutdown (`WorkerPool`).
//! - [`worker`] - the per-worker request loop.
//! - [`request`] - messages sent from the pool to a worker.

pub mod manager;
pub mod request;
pub mod worker;
