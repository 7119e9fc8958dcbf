use crate::Payload;
use std::collections::VecDeque;

/// Entries waiting for their counterpart on the other stream, kept in
/// ascending identifier order.
///
/// Insertion is a binary search followed by an insert, so the common case of
/// nearly-sorted arrivals lands at or near the tail. The head is removed in
/// O(1). The working set is bounded by the number of requests in flight, so a
/// flat ring buffer beats a heap or tree here.
#[derive(Debug)]
pub struct PendingList<T> {
    entries: VecDeque<T>,
}

impl<T: Payload> PendingList<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Inserts `item` at its ordered position.
    ///
    /// Entries with equal identifiers keep arrival order, which only matters
    /// for [`crate::OrderingToken::UNORDERED`].
    ///
    /// # Errors
    ///
    /// Hands `item` back if an entry with the same ordered identifier is
    /// already pending.
    pub fn insert(&mut self, item: T) -> Result<(), T> {
        let id = item.id();
        let pos = self.entries.partition_point(|e| e.id() <= id);

        if !id.is_unordered() && pos > 0 && self.entries[pos - 1].id() == id {
            return Err(item);
        }

        self.entries.insert(pos, item);
        Ok(())
    }

    /// Identifier of the lowest pending entry.
    pub fn head_id(&self) -> Option<crate::OrderingToken> {
        self.entries.front().map(Payload::id)
    }

    /// Removes and returns the lowest pending entry.
    pub fn pop_head(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending identifiers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = crate::OrderingToken> + '_ {
        self.entries.iter().map(Payload::id)
    }

    /// Drops every pending entry, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OrderingToken;

    fn list_of(ids: &[u32]) -> PendingList<OrderingToken> {
        let mut list = PendingList::with_capacity(ids.len());
        for &id in ids {
            list.insert(OrderingToken::new(id)).unwrap();
        }
        list
    }

    fn raw(list: &PendingList<OrderingToken>) -> Vec<u32> {
        list.ids().map(OrderingToken::get).collect()
    }

    #[test]
    fn keeps_ascending_order_for_any_arrival() {
        let list = list_of(&[5, 1, 4, 2, 3]);
        assert_eq!(raw(&list), vec![1, 2, 3, 4, 5]);
        assert_eq!(list.head_id(), Some(OrderingToken::new(1)));
    }

    #[test]
    fn rejects_duplicate_ordered_id() {
        let mut list = list_of(&[1, 3]);
        let rejected = list.insert(OrderingToken::new(3)).unwrap_err();
        assert_eq!(rejected.get(), 3);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn allows_repeated_unordered_sentinel() {
        let mut list = list_of(&[2]);
        list.insert(OrderingToken::UNORDERED).unwrap();
        list.insert(OrderingToken::UNORDERED).unwrap();
        assert_eq!(raw(&list), vec![0, 0, 2]);
    }

    #[test]
    fn pop_head_drains_lowest_first() {
        let mut list = list_of(&[9, 7, 8]);
        assert_eq!(list.pop_head().map(OrderingToken::get), Some(7));
        assert_eq!(list.pop_head().map(OrderingToken::get), Some(8));
        assert_eq!(list.pop_head().map(OrderingToken::get), Some(9));
        assert!(list.pop_head().is_none());
        assert!(list.is_empty());
        assert_eq!(list.head_id(), None);
    }

    #[test]
    fn clear_reports_discarded_entries() {
        let mut list = list_of(&[1, 2, 3]);
        assert_eq!(list.clear(), 3);
        assert!(list.is_empty());
    }
}
