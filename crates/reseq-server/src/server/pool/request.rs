use crate::server::service::{processor::Request, reply::Reply};
use reseq::{CoordinatorHandle, OrderingToken};
use tokio::sync::{OwnedSemaphorePermit, oneshot};

/// A message sent from the worker pool to an individual worker task.
///
/// [`WorkRequest`]s are sent over bounded asynchronous channels and are
/// consumed by the worker's main event loop.
pub enum WorkRequest {
    /// Execute one client request and hand the reply to its connection.
    ///
    /// - `id`: Ordering token. Ordered ids are already registered with
    ///   `replies`; the unordered id is registered by the worker.
    /// - `request`: The parsed request line.
    /// - `permit`: The connection's in-flight slot, carried by the reply.
    /// - `replies`: The connection's reply coordinator.
    Process {
        id: OrderingToken,
        request: Request,
        permit: OwnedSemaphorePermit,
        replies: CoordinatorHandle<Reply>,
    },

    /// Request the worker to shut down gracefully.
    ///
    /// - `response`: One-shot channel for acknowledging that the worker has
    ///   completed its shutdown routine.
    Shutdown { response: oneshot::Sender<()> },
}
