//! Asynchronous worker pool shared by every connection.
//!
//! This module defines the [`WorkerPool`] struct, which manages a set of
//! asynchronous workers responsible for processing [`WorkRequest`]s. It
//! distributes work using round-robin scheduling and supports coordinated
//! shutdown via a shared [`CancellationToken`].
//!
//! Each worker listens on its own bounded [`mpsc::Receiver`] and executes
//! requests independently. Replies finish in whatever order the workers
//! happen to complete them; putting them back in request order is the job of
//! each connection's coordinator, not the pool's.

use crate::server::{
    error::{Error, Result},
    pool::request::WorkRequest,
    service::handler::ConnectionTracker,
};
use core::time::Duration;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// A cooperative pool of asynchronous workers that process [`WorkRequest`]s.
///
/// Workers receive requests over bounded MPSC channels. Work is distributed in
/// round-robin fashion and the pool supports graceful, cancellable shutdown.
pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    connections: Arc<ConnectionTracker>,
}

impl WorkerPool {
    /// Constructs a new [`WorkerPool`] from initialized worker channels and a
    /// shared cancellation token.
    pub const fn new(
        workers: Vec<mpsc::Sender<WorkRequest>>,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
        connections: Arc<ConnectionTracker>,
    ) -> Self {
        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            shutdown_token,
            shutdown_timeout,
            connections,
        }
    }

    /// Returns the index of the next worker to receive work (round-robin).
    ///
    /// Uses a relaxed atomic increment to minimize contention.
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Sends a [`WorkRequest`] to the next worker in the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The service is shutting down (`shutdown_token` was cancelled).
    /// - The worker's channel is closed.
    pub async fn send_to_next_worker(&self, request: WorkRequest) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        let worker = &self.workers[worker_idx];

        match worker.send(request).await {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::ChannelError {
                context: format!("Worker {worker_idx} channel closed"),
            }),
        }
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Stops connections from reading further requests.
    /// - Waits up to `shutdown_timeout` for open connections to flush their
    ///   outstanding replies.
    /// - Cancels the shared [`CancellationToken`] to refuse new work.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker and waits (up to 3
    ///   seconds per worker) for the acknowledgements.
    pub async fn shutdown(&self) -> Result<()> {
        // === Phase 0: Stop reading new requests ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.connections.start_draining();

        // === Phase 1: Wait for open connections to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining open connections ({} active)",
            self.connections.active()
        );
        let drain_result = timeout(self.shutdown_timeout, async {
            while self.connections.active() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All connections drained successfully");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} connections still active)",
                    self.connections.active()
                );
            }
        }

        // === Phase 2: Refuse any remaining work ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();

        // === Phase 3: Notify workers to shut down ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.workers.len());

        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if let Err(_e) = worker.send(WorkRequest::Shutdown { response: tx }).await {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to send shutdown to worker {i}: {_e}");
            } else {
                shutdown_handles.push((i, rx));
            }
        }

        let acks = shutdown_handles.into_iter().map(|(_i, rx)| async move {
            match timeout(Duration::from_secs(3), rx).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Worker {_i} shutdown acknowledged");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {_i} returned error: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} shutdown timed out");
                }
            }
        });

        futures::future::join_all(acks).await;

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::pool::worker::worker_loop;

    fn pool(num_workers: usize) -> (WorkerPool, Vec<mpsc::Receiver<WorkRequest>>) {
        let (workers, receivers): (Vec<_>, Vec<_>) =
            (0..num_workers).map(|_| mpsc::channel(1)).unzip();
        let pool = WorkerPool::new(
            workers,
            CancellationToken::new(),
            Duration::from_millis(200),
            Arc::new(ConnectionTracker::default()),
        );
        (pool, receivers)
    }

    #[test]
    fn workers_are_picked_round_robin() {
        let (pool, _receivers) = pool(3);
        let picked: Vec<_> = (0..7).map(|_| pool.next_worker_index()).collect();
        assert_eq!(picked, [0, 1, 2, 0, 1, 2, 0]);
    }

    #[tokio::test]
    async fn shutdown_stops_workers_and_refuses_work() {
        let (pool, receivers) = pool(2);
        let workers: Vec<_> = receivers
            .into_iter()
            .enumerate()
            .map(|(i, rx)| tokio::spawn(worker_loop(i, rx, Duration::from_millis(10))))
            .collect();

        pool.shutdown().await.unwrap();
        for worker in workers {
            worker.await.unwrap();
        }

        let (tx, _rx) = oneshot::channel();
        let err = pool
            .send_to_next_worker(WorkRequest::Shutdown { response: tx })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceShutdown));
    }

    #[tokio::test]
    async fn closed_worker_is_a_channel_error() {
        let (pool, receivers) = pool(1);
        drop(receivers);

        let (tx, _rx) = oneshot::channel();
        let err = pool
            .send_to_next_worker(WorkRequest::Shutdown { response: tx })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelError { .. }));
    }
}
