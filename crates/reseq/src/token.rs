use core::fmt;

/// Position of a request in submission order.
///
/// Tokens are handed to the coordinator as requests are accepted and later
/// matched against the [`Payload`] carrying the same value. Producers assign
/// them monotonically; the coordinator only relies on the lowest outstanding
/// token eventually being submitted.
///
/// The value `0` is reserved as [`OrderingToken::UNORDERED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OrderingToken(u32);

impl OrderingToken {
    /// Sentinel for fire-and-forget payloads that need no ordering gate.
    ///
    /// It sorts before every ordered token, so a pending `UNORDERED` pair is
    /// always released ahead of ordered work. Several `UNORDERED` entries may
    /// be pending at once; they pair up first-in first-out.
    pub const UNORDERED: Self = Self(0);

    /// Wraps a raw identifier.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` for the [`OrderingToken::UNORDERED`] sentinel.
    pub const fn is_unordered(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for OrderingToken {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<OrderingToken> for u32 {
    fn from(token: OrderingToken) -> Self {
        token.0
    }
}

impl fmt::Display for OrderingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of completed work waiting to be released in order.
///
/// The identifier must equal the [`OrderingToken`] submitted for the request
/// that produced it.
pub trait Payload {
    /// Returns the identifier this payload is matched on.
    fn id(&self) -> OrderingToken;
}

impl Payload for OrderingToken {
    fn id(&self) -> OrderingToken {
        *self
    }
}

impl<P: Payload + ?Sized> Payload for Box<P> {
    fn id(&self) -> OrderingToken {
        (**self).id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unordered_sorts_first() {
        assert!(OrderingToken::UNORDERED < OrderingToken::new(1));
        assert!(OrderingToken::UNORDERED.is_unordered());
        assert!(!OrderingToken::from(7).is_unordered());
    }

    #[test]
    fn converts_to_and_from_raw() {
        let token = OrderingToken::from(42);
        assert_eq!(token.get(), 42);
        assert_eq!(u32::from(token), 42);
        assert_eq!(token.to_string(), "42");
    }
}
