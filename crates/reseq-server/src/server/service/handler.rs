//! Connection handling for the line protocol.
//!
//! This module defines [`ReplyService`], which owns the shared worker pool and
//! serves client connections. Each connection gets its own reply coordinator:
//! request lines are numbered as they are read, processed concurrently on the
//! pool, and the replies are written back strictly in request order.
//!
//! ## Responsibilities
//!
//! - Spawn and manage the background worker pool.
//! - Frame request lines and assign ordering tokens.
//! - Bound each connection's in-flight requests.
//! - Flush outstanding replies on EOF and during graceful shutdown.

use crate::server::{
    config::ServerConfig,
    error::{Error, Result},
    pool::{manager::WorkerPool, request::WorkRequest, worker::worker_loop},
    service::{
        processor::Request,
        reply::{Reply, ReplySender},
    },
    telemetry::{
        decrement_connections_inflight, increment_connections_inflight, increment_requests,
        increment_send_failures,
    },
};
use futures::{SinkExt, StreamExt};
use portable_atomic::{AtomicUsize, Ordering};
use reseq::{Coordinator, CoordinatorHandle, OrderingToken, SendFailure};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Semaphore, mpsc},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};

/// Tracks open connections so shutdown can wait for them to drain.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    draining: CancellationToken,
    active: AtomicUsize,
}

impl ConnectionTracker {
    /// Tells every connection to stop reading requests. Replies already owed
    /// are still written.
    pub fn start_draining(&self) {
        self.draining.cancel();
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn enter(&self) -> ConnectionGuard<'_> {
        self.active.fetch_add(1, Ordering::Relaxed);
        increment_connections_inflight();
        ConnectionGuard(self)
    }
}

struct ConnectionGuard<'a>(&'a ConnectionTracker);

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
        decrement_connections_inflight();
    }
}

/// Line-protocol service answering every connection in request order.
#[derive(Clone)]
pub struct ReplyService {
    config: ServerConfig,
    worker_pool: Arc<WorkerPool>,
    connections: Arc<ConnectionTracker>,
}

impl ReplyService {
    /// Creates a new `ReplyService` and spawns the pool of background worker
    /// tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let mut workers = Vec::with_capacity(config.num_workers);
        let shutdown_token = CancellationToken::new();
        let connections = Arc::new(ConnectionTracker::default());

        for worker_id in 0..config.num_workers {
            // A small buffer keeps requests spread across workers instead of
            // queueing behind a slow one.
            let (tx, rx) = mpsc::channel(config.work_buffer_size);
            workers.push(tx);
            tokio::spawn(worker_loop(worker_id, rx, config.max_sleep));
        }

        let worker_pool = WorkerPool::new(
            workers,
            shutdown_token,
            config.shutdown_timeout,
            Arc::clone(&connections),
        );

        Self {
            config,
            worker_pool: Arc::new(worker_pool),
            connections,
        }
    }

    /// Initiates a graceful shutdown: connections stop reading, owed replies
    /// are flushed (up to the shutdown timeout), then the workers stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.worker_pool.shutdown().await
    }

    /// Serves one client connection until EOF, a transport error, or service
    /// shutdown.
    ///
    /// # Errors
    ///
    /// Returns the first error that ended the connection. Replies owed for
    /// requests read before a transport error are still written.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn serve_connection<IO>(&self, io: IO) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let _guard = self.connections.enter();

        let (reader, writer) = tokio::io::split(io);
        let mut lines = FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(self.config.max_line_length),
        );

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_replies(writer, line_rx));

        let coordinator =
            Coordinator::spawn(ReplySender::new(line_tx), self.config.coordinator());
        if let Some(failures) = coordinator.take_failures() {
            tokio::spawn(report_failures(failures));
        }

        let replies = coordinator.handle();
        let inflight = Arc::new(Semaphore::new(self.config.max_inflight));

        let read = self.read_requests(&mut lines, &replies, &inflight).await;
        match &read {
            // Some ordered reply can never arrive; waiting would hang.
            Err(Error::ServiceShutdown | Error::ChannelError { .. } | Error::Coordinator(_)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Abandoning pending replies");
            }
            _ => self.flush(&inflight).await?,
        }

        // The loop owns the reply sender; stopping it closes the writer's
        // queue once the last reply has been handed over.
        let stopped = coordinator.shutdown().await;
        drop(replies);

        let written = match writer.await {
            Ok(result) => result,
            Err(e) => Err(Error::Io {
                context: e.to_string(),
            }),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(released = coordinator.metrics().released, "Connection closed");

        read.and(stopped.map_err(Error::from)).and(written)
    }

    async fn read_requests<R>(
        &self,
        lines: &mut FramedRead<R, LinesCodec>,
        replies: &CoordinatorHandle<Reply>,
        inflight: &Arc<Semaphore>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut next_id: u32 = 1;
        let mut ended = None;

        while ended.is_none() {
            let request = tokio::select! {
                () = self.connections.draining.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Draining, no further requests read");
                    return Ok(());
                }
                line = lines.next() => match line {
                    Some(Ok(line)) => Request::parse(&line),
                    // The framed stream ends after a decode error, so answer
                    // this one and stop reading.
                    Some(Err(e @ LinesCodecError::MaxLineLengthExceeded)) => {
                        ended = Some(Error::from(e));
                        Request::Invalid("request line exceeds maximum length".to_string())
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
            };

            increment_requests();

            let id = if request.is_unordered() {
                OrderingToken::UNORDERED
            } else {
                if next_id == 0 {
                    // Wrapped: every earlier id has to be released before
                    // numbering starts over.
                    self.flush(inflight).await?;
                    next_id = 1;
                }
                let id = OrderingToken::new(next_id);
                next_id = next_id.wrapping_add(1);
                id
            };

            let permit = Arc::clone(inflight)
                .acquire_owned()
                .await
                .map_err(|_| Error::ChannelError {
                    context: "in-flight limiter closed".to_string(),
                })?;

            // An unordered token is registered by the worker together with
            // its payload, so it never sits alone at the head of the list.
            if !id.is_unordered() {
                replies.try_submit_token(id).await?;
            }
            self.worker_pool
                .send_to_next_worker(WorkRequest::Process {
                    id,
                    request,
                    permit,
                    replies: replies.clone(),
                })
                .await?;
        }

        ended.map_or(Ok(()), Err)
    }

    /// Waits until every reply owed on this connection has been written (or
    /// discarded).
    async fn flush(&self, inflight: &Semaphore) -> Result<()> {
        // `ServerConfig` guarantees this fits.
        let all = self.config.max_inflight as u32;
        let _all = inflight
            .acquire_many(all)
            .await
            .map_err(|_| Error::ChannelError {
                context: "in-flight limiter closed".to_string(),
            })?;
        Ok(())
    }
}

async fn write_replies<W>(writer: W, mut lines: mpsc::UnboundedReceiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    while let Some(line) = lines.recv().await {
        sink.send(line).await?;
    }
    SinkExt::<String>::close(&mut sink).await?;
    Ok(())
}

async fn report_failures(mut failures: mpsc::Receiver<SendFailure<Error>>) {
    while let Some(_failure) = failures.recv().await {
        increment_send_failures();

        #[cfg(feature = "tracing")]
        tracing::debug!("{_failure}");
    }
}
