use crate::OrderingToken;

/// Capability that transmits released payloads.
///
/// The coordinator calls [`Sender::send`] from its own loop only, once per
/// matched pair and in strictly increasing identifier order. Calls are never
/// concurrent, which is why `send` takes `&mut self`: implementations do not
/// need to be internally synchronized.
///
/// `send` runs inline on the coordinator task. Implementations should hand
/// the payload off quickly (e.g. into a writer channel) rather than block on
/// slow I/O.
pub trait Sender<P>: Send + 'static {
    /// Failure reported for a single payload.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Transmits one released payload.
    ///
    /// # Errors
    ///
    /// Returns the transport's error. The coordinator reports it as a
    /// [`SendFailure`] and does not retry the payload.
    fn send(&mut self, payload: P) -> Result<(), Self::Error>;
}

/// A send that failed after its payload was released.
///
/// The pair is consumed either way; this only records which identifier was
/// lost and why.
#[derive(Debug, thiserror::Error)]
#[error("failed to send payload {id}: {source}")]
pub struct SendFailure<E>
where
    E: core::error::Error + 'static,
{
    /// Identifier of the payload whose send failed.
    pub id: OrderingToken,
    /// Error reported by the [`Sender`].
    #[source]
    pub source: E,
}
