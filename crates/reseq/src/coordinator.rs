//! Asynchronous coordinator that owns a [`MergeJoin`] on a dedicated task.
//!
//! Producers never touch the pending lists. They hand tokens and payloads to
//! the loop task through two bounded [`mpsc`] queues, one per stream, via a
//! cloneable [`CoordinatorHandle`]. The loop is the single writer of all
//! pending state and the only caller of the [`Sender`].
//!
//! ## Lifecycle
//!
//! The coordinator is `Running` from [`Coordinator::spawn`] until either
//! [`Coordinator::shutdown`] is called, the [`Coordinator`] is dropped, or a
//! duplicate identifier is detected. It then discards whatever is pending and
//! closes both queues. Submissions that were still buffered at that moment
//! are dropped silently; submissions made afterwards panic (or return
//! [`Error::Stopped`] through the `try_` variants).

use crate::{
    CoordinatorConfig, CoordinatorMetrics, CoordinatorState, Error, MergeJoin, OrderingToken,
    Payload, Result, SendFailure, Sender, Side, metrics::SharedMetrics,
};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Producer-side handle to a running [`Coordinator`].
///
/// Cheap to clone; hand one to every task or thread that accepts requests or
/// completes work.
pub struct CoordinatorHandle<P> {
    tokens: mpsc::Sender<OrderingToken>,
    payloads: mpsc::Sender<P>,
    metrics: Arc<SharedMetrics>,
}

impl<P> Clone for CoordinatorHandle<P> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            payloads: self.payloads.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<P> CoordinatorHandle<P>
where
    P: Payload + Send + 'static,
{
    /// Registers the ordering token of a newly accepted request.
    ///
    /// Waits only while the token queue is full.
    ///
    /// # Panics
    ///
    /// Panics if the coordinator has stopped. Dropping a token would stall
    /// every higher-numbered response, so this is treated as a lifecycle bug
    /// in the caller.
    pub async fn submit_token(&self, id: impl Into<OrderingToken>) {
        let id = id.into();
        if self.tokens.send(id).await.is_err() {
            submitted_after_stop(Side::Tokens, id);
        }
    }

    /// Hands over a completed payload.
    ///
    /// Waits only while the payload queue is full.
    ///
    /// # Panics
    ///
    /// Panics if the coordinator has stopped.
    pub async fn submit_payload(&self, payload: P) {
        let id = payload.id();
        if self.payloads.send(payload).await.is_err() {
            submitted_after_stop(Side::Payloads, id);
        }
    }

    /// Like [`Self::submit_token`], but reports a stopped coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stopped`] if the coordinator no longer accepts input.
    pub async fn try_submit_token(&self, id: impl Into<OrderingToken>) -> Result<()> {
        self.tokens
            .send(id.into())
            .await
            .map_err(|_| Error::Stopped)
    }

    /// Like [`Self::submit_payload`], but reports a stopped coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stopped`] if the coordinator no longer accepts input.
    pub async fn try_submit_payload(&self, payload: P) -> Result<()> {
        self.payloads
            .send(payload)
            .await
            .map_err(|_| Error::Stopped)
    }

    /// Blocking variant of [`Self::submit_token`] for plain OS threads.
    ///
    /// # Panics
    ///
    /// Panics if the coordinator has stopped, or if called from within an
    /// asynchronous execution context.
    pub fn blocking_submit_token(&self, id: impl Into<OrderingToken>) {
        let id = id.into();
        if self.tokens.blocking_send(id).is_err() {
            submitted_after_stop(Side::Tokens, id);
        }
    }

    /// Blocking variant of [`Self::submit_payload`] for plain OS threads.
    ///
    /// # Panics
    ///
    /// Panics if the coordinator has stopped, or if called from within an
    /// asynchronous execution context.
    pub fn blocking_submit_payload(&self, payload: P) {
        let id = payload.id();
        if self.payloads.blocking_send(payload).is_err() {
            submitted_after_stop(Side::Payloads, id);
        }
    }

    pub fn metrics(&self) -> CoordinatorMetrics {
        self.metrics.snapshot()
    }

    pub fn state(&self) -> CoordinatorState {
        self.metrics.state()
    }
}

#[cold]
#[track_caller]
fn submitted_after_stop(side: Side, id: OrderingToken) -> ! {
    panic!("{side} {id} submitted after the coordinator stopped")
}

/// Re-sequencing coordinator running on its own Tokio task.
///
/// `P` is the payload type and `E` the [`Sender`]'s error type, which shows
/// up in the [`SendFailure`]s reported by [`Coordinator::take_failures`].
pub struct Coordinator<P, E>
where
    E: core::error::Error + 'static,
{
    handle: CoordinatorHandle<P>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
    failures: Mutex<Option<mpsc::Receiver<SendFailure<E>>>>,
}

impl<P, E> Coordinator<P, E>
where
    P: Payload + Send + 'static,
    E: core::error::Error + Send + Sync + 'static,
{
    /// Spawns the coordinator loop and returns its owner.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<S>(sender: S, config: CoordinatorConfig) -> Self
    where
        S: Sender<P, Error = E>,
    {
        let capacity = config.queue_capacity();
        let (token_tx, token_rx) = mpsc::channel(capacity);
        let (payload_tx, payload_rx) = mpsc::channel(capacity);
        let (failure_tx, failure_rx) = mpsc::channel(config.failure_queue_capacity());
        let metrics = Arc::new(SharedMetrics::default());
        let shutdown = CancellationToken::new();

        let worker = Worker {
            join: MergeJoin::new(sender, capacity),
            failure_tx,
            metrics: Arc::clone(&metrics),
            stall_timeout: config.stall_timeout,
            last_progress: Instant::now(),
            stalled: false,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            capacity,
            stall_timeout = ?config.stall_timeout,
            "Spawning coordinator"
        );

        let task = tokio::spawn(worker.run(
            token_rx,
            payload_rx,
            shutdown.clone(),
            config.stall_check_period(),
        ));

        Self {
            handle: CoordinatorHandle {
                tokens: token_tx,
                payloads: payload_tx,
                metrics,
            },
            shutdown,
            task: Mutex::new(Some(task)),
            failures: Mutex::new(Some(failure_rx)),
        }
    }

    /// Returns a producer handle.
    pub fn handle(&self) -> CoordinatorHandle<P> {
        self.handle.clone()
    }

    /// See [`CoordinatorHandle::submit_token`].
    pub async fn submit_token(&self, id: impl Into<OrderingToken>) {
        self.handle.submit_token(id).await;
    }

    /// See [`CoordinatorHandle::submit_payload`].
    pub async fn submit_payload(&self, payload: P) {
        self.handle.submit_payload(payload).await;
    }

    /// Takes the receiver of per-payload send failures.
    ///
    /// Returns `None` after the first call. Until it is taken, failures are
    /// buffered up to `CoordinatorConfig::failure_capacity`.
    pub fn take_failures(&self) -> Option<mpsc::Receiver<SendFailure<E>>> {
        self.failures.lock().take()
    }

    pub fn metrics(&self) -> CoordinatorMetrics {
        self.handle.metrics()
    }

    pub fn state(&self) -> CoordinatorState {
        self.handle.state()
    }

    /// Stops the loop and waits for it to exit. Pending entries are
    /// discarded.
    ///
    /// Calling it again, or concurrently, returns `Ok(())` without waiting.
    ///
    /// # Errors
    ///
    /// Returns the [`Error::ProtocolViolation`] that stopped the loop early,
    /// if any, or [`Error::TaskFailed`] if the loop panicked.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::TaskFailed {
                context: e.to_string(),
            }),
        }
    }
}

impl<P, E> Drop for Coordinator<P, E>
where
    E: core::error::Error + 'static,
{
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// State owned by the loop task.
struct Worker<P, S>
where
    S: Sender<P>,
{
    join: MergeJoin<P, S>,
    failure_tx: mpsc::Sender<SendFailure<S::Error>>,
    metrics: Arc<SharedMetrics>,
    stall_timeout: Option<Duration>,
    last_progress: Instant,
    stalled: bool,
}

impl<P, S> Worker<P, S>
where
    P: Payload + Send + 'static,
    S: Sender<P>,
{
    #[cfg_attr(feature = "tracing", tracing::instrument(name = "coordinator", skip_all))]
    async fn run(
        mut self,
        mut token_rx: mpsc::Receiver<OrderingToken>,
        mut payload_rx: mpsc::Receiver<P>,
        shutdown: CancellationToken,
        stall_check_period: Option<Duration>,
    ) -> Result<()> {
        let mut stall_check = stall_check_period.map(|period| {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let result = loop {
            // No `biased;`: select! polls ready branches in random order so
            // neither stream can starve the other.
            let pushed = tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                Some(token) = token_rx.recv() => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%token, "Incoming token");
                    self.mark_arrival();
                    self.join.push_token(token)
                }
                Some(payload) = payload_rx.recv() => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(id = %payload.id(), "Incoming payload");
                    self.mark_arrival();
                    self.join.push_payload(payload)
                }
                () = next_tick(&mut stall_check) => {
                    self.check_stall();
                    continue;
                }
                else => break Ok(()),
            };

            if let Err(e) = pushed {
                break Err(e);
            }
            self.release();
        };

        // Refuse further submissions before anything else so producers see
        // the stop as early as possible.
        token_rx.close();
        payload_rx.close();
        self.metrics.mark_stopped();

        let (_tokens, _payloads) = self.join.discard();
        self.metrics.set_pending(0, 0);

        match &result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    discarded_tokens = _tokens,
                    discarded_payloads = _payloads,
                    released = self.join.released(),
                    "Coordinator stopped"
                );
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    error = %_e,
                    discarded_tokens = _tokens,
                    discarded_payloads = _payloads,
                    "Coordinator stopped on protocol violation"
                );
            }
        }

        result
    }

    /// Restarts the stall clock when work arrives at an idle coordinator, so
    /// idle time is never counted as a stall.
    fn mark_arrival(&mut self) {
        if self.join.is_idle() {
            self.last_progress = Instant::now();
            self.stalled = false;
        }
    }

    fn release(&mut self) {
        let drain = self.join.drain();

        if drain.released > 0 {
            self.last_progress = Instant::now();
            self.stalled = false;
            self.metrics.add_released(drain.released);

            #[cfg(feature = "tracing")]
            tracing::trace!(released = drain.released, "Drained matched pairs");
        }

        if !drain.failures.is_empty() {
            self.metrics.add_send_failures(drain.failures.len());
        }

        for failure in drain.failures {
            #[cfg(feature = "tracing")]
            tracing::warn!(id = %failure.id, error = %failure.source, "Send failed");

            match self.failure_tx.try_send(failure) {
                Ok(()) => {}
                Err(TrySendError::Full(_failure)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(id = %_failure.id, "Failure queue full, dropping report");
                }
                // Nobody is listening for failures any more.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        self.metrics
            .set_pending(self.join.pending_tokens(), self.join.pending_payloads());
    }

    fn check_stall(&mut self) {
        let Some(timeout) = self.stall_timeout else {
            return;
        };

        if self.join.is_idle() || self.stalled || self.last_progress.elapsed() < timeout {
            return;
        }

        self.stalled = true;
        self.metrics.add_stall();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            token_head = ?self.join.token_head().map(OrderingToken::get),
            payload_head = ?self.join.payload_head().map(OrderingToken::get),
            pending_tokens = self.join.pending_tokens(),
            pending_payloads = self.join.pending_payloads(),
            waited = ?self.last_progress.elapsed(),
            "No release within stall timeout; lowest outstanding id may be missing"
        );
    }
}

async fn next_tick(interval: &mut Option<time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => core::future::pending().await,
    }
}
