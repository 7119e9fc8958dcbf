//! Merge-join of the token and payload streams.
//!
//! [`MergeJoin`] is the whole ordering algorithm without any concurrency:
//! two ascending [`PendingList`]s and a [`Sender`]. Every push is followed by
//! a [`MergeJoin::drain`], which releases matched heads until the minima
//! disagree. After a drain at most one list has a head equal to the other's,
//! i.e. a matched pair is never left pending.
//!
//! The [`crate::Coordinator`] runs exactly this state machine inside its loop
//! task; it is public so that callers with their own event loop can embed it
//! directly.

use crate::{Error, OrderingToken, Payload, PendingList, SendFailure, Sender, Side};

/// Outcome of a single [`MergeJoin::drain`].
#[derive(Debug)]
pub struct Drain<E>
where
    E: core::error::Error + 'static,
{
    /// Pairs released by this drain, including ones whose send failed.
    pub released: usize,
    /// Sends that failed during this drain, in release order.
    pub failures: Vec<SendFailure<E>>,
}

impl<E> Default for Drain<E>
where
    E: core::error::Error + 'static,
{
    fn default() -> Self {
        Self {
            released: 0,
            failures: Vec::new(),
        }
    }
}

/// Synchronous two-stream merge-join with eager release.
pub struct MergeJoin<P, S> {
    tokens: PendingList<OrderingToken>,
    payloads: PendingList<P>,
    sender: S,
    released: u64,
}

impl<P, S> MergeJoin<P, S>
where
    P: Payload,
    S: Sender<P>,
{
    /// Creates an empty merge-join. `capacity` pre-sizes both pending lists
    /// and should match the expected number of requests in flight.
    pub fn new(sender: S, capacity: usize) -> Self {
        Self {
            tokens: PendingList::with_capacity(capacity),
            payloads: PendingList::with_capacity(capacity),
            sender,
            released: 0,
        }
    }

    /// Records an ordering token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the token is already pending.
    pub fn push_token(&mut self, token: OrderingToken) -> Result<(), Error> {
        self.tokens
            .insert(token)
            .map_err(|id| Error::ProtocolViolation {
                side: Side::Tokens,
                id,
            })
    }

    /// Records a completed payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if a payload with the same
    /// identifier is already pending.
    pub fn push_payload(&mut self, payload: P) -> Result<(), Error> {
        self.payloads
            .insert(payload)
            .map_err(|rejected| Error::ProtocolViolation {
                side: Side::Payloads,
                id: rejected.id(),
            })
    }

    /// Releases every matched pair at the head of both lists.
    ///
    /// A single arrival can unblock a long run of entries buffered on the
    /// other side, so this loops until the heads differ or a list runs dry.
    /// A failed send still consumes its pair and the loop carries on.
    pub fn drain(&mut self) -> Drain<S::Error> {
        let mut drain = Drain::default();

        while let (Some(token), Some(head)) = (self.tokens.head_id(), self.payloads.head_id()) {
            if token != head {
                break;
            }

            let (Some(_), Some(payload)) = (self.tokens.pop_head(), self.payloads.pop_head())
            else {
                break;
            };

            self.released += 1;
            drain.released += 1;

            if let Err(source) = self.sender.send(payload) {
                drain.failures.push(SendFailure { id: head, source });
            }
        }

        drain
    }

    /// Drops all pending entries. Returns `(tokens, payloads)` discarded.
    pub fn discard(&mut self) -> (usize, usize) {
        (self.tokens.clear(), self.payloads.clear())
    }

    pub fn pending_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn pending_payloads(&self) -> usize {
        self.payloads.len()
    }

    pub fn token_head(&self) -> Option<OrderingToken> {
        self.tokens.head_id()
    }

    pub fn payload_head(&self) -> Option<OrderingToken> {
        self.payloads.head_id()
    }

    /// Returns `true` when nothing is waiting on either side.
    pub fn is_idle(&self) -> bool {
        self.tokens.is_empty() && self.payloads.is_empty()
    }

    /// Total pairs released since creation.
    pub fn released(&self) -> u64 {
        self.released
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn into_sender(self) -> S {
        self.sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use core::fmt;

    #[derive(Default)]
    struct Collect(Vec<u32>);

    impl Sender<OrderingToken> for Collect {
        type Error = Infallible;

        fn send(&mut self, payload: OrderingToken) -> Result<(), Self::Error> {
            self.0.push(payload.get());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("refused")
        }
    }

    impl core::error::Error for Refused {}

    /// Refuses every even identifier.
    #[derive(Default)]
    struct RefuseEven(Vec<u32>);

    impl Sender<OrderingToken> for RefuseEven {
        type Error = Refused;

        fn send(&mut self, payload: OrderingToken) -> Result<(), Self::Error> {
            if payload.get() % 2 == 0 {
                return Err(Refused);
            }
            self.0.push(payload.get());
            Ok(())
        }
    }

    fn run(tokens: &[u32], payloads: &[u32]) -> Vec<u32> {
        let mut join = MergeJoin::<OrderingToken, _>::new(Collect::default(), 8);
        for &t in tokens {
            join.push_token(OrderingToken::new(t)).unwrap();
            join.drain();
        }
        for &p in payloads {
            join.push_payload(OrderingToken::new(p)).unwrap();
            join.drain();
        }
        assert!(join.is_idle());
        join.into_sender().0
    }

    #[test]
    fn already_ordered_passes_through() {
        assert_eq!(run(&[0, 1, 2, 3], &[0, 1, 2, 3]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn scrambled_payloads_are_reordered() {
        assert_eq!(run(&[0, 1, 2, 3, 4], &[0, 4, 1, 3, 2]), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn scrambled_tokens_are_reordered() {
        assert_eq!(run(&[2, 0, 1], &[0, 1, 2]), vec![0, 1, 2]);
    }

    #[test]
    fn partial_drain_waits_for_missing_payload() {
        let mut join = MergeJoin::<OrderingToken, _>::new(Collect::default(), 4);
        join.push_token(OrderingToken::new(0)).unwrap();
        join.push_token(OrderingToken::new(1)).unwrap();
        join.push_payload(OrderingToken::new(0)).unwrap();

        assert_eq!(join.drain().released, 1);
        assert_eq!(join.sender().0, vec![0]);
        assert_eq!(join.pending_tokens(), 1);
        assert_eq!(join.token_head(), Some(OrderingToken::new(1)));
        assert_eq!(join.pending_payloads(), 0);

        join.push_payload(OrderingToken::new(1)).unwrap();
        assert_eq!(join.drain().released, 1);
        assert_eq!(join.sender().0, vec![0, 1]);
        assert!(join.is_idle());
    }

    #[test]
    fn one_arrival_releases_a_buffered_chain() {
        let mut join = MergeJoin::<OrderingToken, _>::new(Collect::default(), 8);
        for p in [5, 3, 4, 2, 1] {
            join.push_payload(OrderingToken::new(p)).unwrap();
        }
        for t in [2, 3, 4, 5] {
            join.push_token(OrderingToken::new(t)).unwrap();
            assert_eq!(join.drain().released, 0);
        }

        join.push_token(OrderingToken::new(1)).unwrap();
        assert_eq!(join.drain().released, 5);
        assert_eq!(join.sender().0, vec![1, 2, 3, 4, 5]);
        assert_eq!(join.released(), 5);
    }

    #[test]
    fn heads_never_match_after_drain() {
        let mut join = MergeJoin::<OrderingToken, _>::new(Collect::default(), 8);
        for t in [1, 2, 3, 4] {
            join.push_token(OrderingToken::new(t)).unwrap();
        }
        for p in [4, 2, 3, 1] {
            join.push_payload(OrderingToken::new(p)).unwrap();
            join.drain();
            if let (Some(t), Some(p)) = (join.token_head(), join.payload_head()) {
                assert_ne!(t, p);
            }
        }
        assert!(join.is_idle());
    }

    #[test]
    fn unordered_pairs_skip_the_queue() {
        let mut join = MergeJoin::<OrderingToken, _>::new(Collect::default(), 8);
        join.push_token(OrderingToken::new(1)).unwrap();
        join.push_token(OrderingToken::new(2)).unwrap();
        join.push_payload(OrderingToken::new(2)).unwrap();
        join.drain();

        join.push_token(OrderingToken::UNORDERED).unwrap();
        join.push_payload(OrderingToken::UNORDERED).unwrap();
        assert_eq!(join.drain().released, 1);
        assert_eq!(join.sender().0, vec![0]);
        assert_eq!(join.token_head(), Some(OrderingToken::new(1)));
    }

    #[test]
    fn duplicate_ids_are_protocol_violations() {
        let mut join = MergeJoin::<OrderingToken, _>::new(Collect::default(), 4);
        join.push_token(OrderingToken::new(3)).unwrap();
        assert_eq!(
            join.push_token(OrderingToken::new(3)),
            Err(Error::ProtocolViolation {
                side: Side::Tokens,
                id: OrderingToken::new(3),
            })
        );

        join.push_payload(OrderingToken::new(5)).unwrap();
        assert_eq!(
            join.push_payload(OrderingToken::new(5)),
            Err(Error::ProtocolViolation {
                side: Side::Payloads,
                id: OrderingToken::new(5),
            })
        );
    }

    #[test]
    fn failed_send_consumes_pair_and_continues() {
        let mut join = MergeJoin::<OrderingToken, _>::new(RefuseEven::default(), 8);
        for id in 1..=4 {
            join.push_token(OrderingToken::new(id)).unwrap();
        }
        for id in [4, 3, 2, 1] {
            join.push_payload(OrderingToken::new(id)).unwrap();
        }

        let drain = join.drain();
        assert_eq!(drain.released, 4);
        let failed: Vec<u32> = drain.failures.iter().map(|f| f.id.get()).collect();
        assert_eq!(failed, vec![2, 4]);
        assert!(join.is_idle());
        assert_eq!(join.sender().0, vec![1, 3]);
    }

    #[test]
    fn discard_empties_both_sides() {
        let mut join = MergeJoin::<OrderingToken, _>::new(Collect::default(), 4);
        join.push_token(OrderingToken::new(1)).unwrap();
        join.push_token(OrderingToken::new(2)).unwrap();
        join.push_payload(OrderingToken::new(3)).unwrap();
        assert_eq!(join.discard(), (2, 1));
        assert!(join.is_idle());
    }
}
