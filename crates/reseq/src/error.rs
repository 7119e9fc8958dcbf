//! Error types for the re-sequencing coordinator.
//!
//! ## Error Cases
//! - `ProtocolViolation`: a producer submitted an identifier that is already
//!   pending on the same stream. Fatal to the coordinator instance.
//! - `Stopped`: a submission reached a coordinator that is no longer running.
//! - `TaskFailed`: the coordinator task panicked or was aborted.
//!
//! Send failures are not part of this enum; they are per-payload and reported
//! as [`crate::SendFailure`] while the coordinator keeps running.

use crate::OrderingToken;
use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// The input stream an entry arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Ordering tokens from the request-accepting side.
    Tokens,
    /// Completed payloads from the workers.
    Payloads,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tokens => f.write_str("token"),
            Self::Payloads => f.write_str("payload"),
        }
    }
}

/// Unified error type for the coordinator.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// An identifier was submitted twice while still pending.
    ///
    /// Left alone this would stall the stream forever, so the coordinator
    /// stops instead.
    #[error("duplicate {side} id {id} submitted while still pending")]
    ProtocolViolation { side: Side, id: OrderingToken },

    /// The coordinator has stopped and accepts no more submissions.
    #[error("coordinator is stopped")]
    Stopped,

    /// The coordinator task ended abnormally.
    #[error("coordinator task failed: {context}")]
    TaskFailed { context: String },
}
