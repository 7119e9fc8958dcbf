use crate::server::{error::Error, telemetry::increment_replies};
use reseq::{OrderingToken, Payload, Sender};
use tokio::sync::{OwnedSemaphorePermit, mpsc};

/// A finished reply waiting to be written in request order.
///
/// Holds the connection's in-flight permit, so the slot is only freed once the
/// reply has actually been released (or discarded).
#[derive(Debug)]
pub struct Reply {
    id: OrderingToken,
    body: String,
    _permit: OwnedSemaphorePermit,
}

impl Reply {
    pub fn new(id: OrderingToken, body: String, permit: OwnedSemaphorePermit) -> Self {
        Self {
            id,
            body,
            _permit: permit,
        }
    }

    /// Wire form: `<id> <body>`.
    pub fn into_line(self) -> String {
        format!("{} {}", self.id, self.body)
    }
}

impl Payload for Reply {
    fn id(&self) -> OrderingToken {
        self.id
    }
}

/// Hands released replies to the connection's writer task.
///
/// Runs on the coordinator task, so it only enqueues; the socket write happens
/// on the writer.
pub struct ReplySender {
    lines: mpsc::UnboundedSender<String>,
}

impl ReplySender {
    pub const fn new(lines: mpsc::UnboundedSender<String>) -> Self {
        Self { lines }
    }
}

impl Sender<Reply> for ReplySender {
    type Error = Error;

    fn send(&mut self, reply: Reply) -> Result<(), Self::Error> {
        self.lines
            .send(reply.into_line())
            .map_err(|_| Error::ConnectionClosed)?;
        increment_replies();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn sending_frees_the_inflight_slot() {
        let slots = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&slots).acquire_owned().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sender = ReplySender::new(tx);

        assert_eq!(slots.available_permits(), 0);
        sender
            .send(Reply::new(OrderingToken::new(3), "done".into(), permit))
            .unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("3 done"));
        assert_eq!(slots.available_permits(), 1);
    }

    #[tokio::test]
    async fn closed_writer_is_a_send_failure() {
        let slots = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&slots).acquire_owned().await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let err = ReplySender::new(tx)
            .send(Reply::new(OrderingToken::new(1), "lost".into(), permit))
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
