use crate::server::{
    pool::request::WorkRequest,
    service::{processor::process, reply::Reply},
};
use core::time::Duration;
use tokio::sync::mpsc;

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// Requests are handled one at a time in arrival order. Each reply is
/// submitted to the coordinator of the connection it belongs to, which puts
/// it back into request order; the worker itself never waits for earlier
/// replies.
///
/// This function is designed to be spawned as a Tokio task and runs until
/// explicitly shut down or until the pool drops its sender.
///
/// # Arguments
///
/// - `_worker_id`: Unique numeric identifier for this worker (used for
///   logs/tracing).
/// - `rx`: Receiver through which [`WorkRequest`]s are received.
/// - `max_sleep`: Upper bound for `SLEEP` requests.
pub async fn worker_loop(
    _worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    max_sleep: Duration,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Process {
                id,
                request,
                permit,
                replies,
            } => {
                let body = process(request, max_sleep).await;

                // The connection may have finished (or failed) while this
                // request was running. Its coordinator is gone then, which is
                // not the worker's problem.
                let mut submitted = Ok(());
                // Unordered replies bring their own token; registered early
                // it would gate every later reply.
                if id.is_unordered() {
                    submitted = replies.try_submit_token(id).await;
                }
                if submitted.is_ok() {
                    submitted = replies
                        .try_submit_payload(Reply::new(id, body, permit))
                        .await;
                }
                if submitted.is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {_worker_id} dropped reply {id}: connection closed");
                }
            }
            WorkRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {_worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {_worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_worker_id} stopped");
}
