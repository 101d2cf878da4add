//! Slot-addressed pools of resumable range cursors.
//!
//! Every sequential scan-like operator node is assigned a stable slot id
//! when the tree is generated. Re-entering the node — once per fixpoint
//! pass, or across separate top-level evaluation calls — addresses the
//! same slot again, so a node either resumes its stored cursor or resets
//! it; the owning operator decides which, never the pool.

use crate::storage::index::RangeCursor;

/// A growable table of [RangeCursor] slots.
#[derive(Debug, Default)]
pub struct CursorPool {
    slots: Vec<RangeCursor>,
}

impl CursorPool {
    /// Return a mutable reference to the cursor at `slot`, growing the
    /// pool to at least `2 * (slot + 1)` entries first if the slot lies
    /// beyond the current size. Pools grow monotonically and never move
    /// existing slots, and since cursors own their state, growth cannot
    /// invalidate cursors held in other slots.
    pub fn slot(&mut self, slot: usize) -> &mut RangeCursor {
        if slot >= self.slots.len() {
            self.slots.resize_with(2 * (slot + 1), RangeCursor::default);
        }
        &mut self.slots[slot]
    }

    /// Current number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Return whether the pool has no slots yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// One [CursorPool] per scan-like operator kind.
///
/// The kinds are kept apart because their slots are numbered independently
/// at generation time; a scan and a choice may both own slot 0.
#[derive(Debug, Default)]
pub struct CursorPools {
    /// Slots of [Scan][crate::ram::operation::Operation::Scan] nodes.
    pub scan: CursorPool,
    /// Slots of [IndexScan][crate::ram::operation::Operation::IndexScan] nodes.
    pub index_scan: CursorPool,
    /// Slots of [Choice][crate::ram::operation::Operation::Choice] nodes.
    pub choice: CursorPool,
    /// Slots of [IndexChoice][crate::ram::operation::Operation::IndexChoice] nodes.
    pub index_choice: CursorPool,
}

#[cfg(test)]
mod test {
    use crate::{ram::relation::RelationDecl, storage::relation::Relation};

    use super::CursorPool;

    #[test]
    fn growth_follows_the_doubling_rule() {
        let mut pool = CursorPool::default();
        assert!(pool.is_empty());

        pool.slot(0);
        assert_eq!(pool.len(), 2);

        pool.slot(1);
        assert_eq!(pool.len(), 2);

        pool.slot(5);
        assert_eq!(pool.len(), 12);
    }

    #[test]
    fn growth_does_not_invalidate_other_slots() {
        let mut relation = Relation::new(&RelationDecl::new("numbers", 1));
        for value in 0..4 {
            relation.insert(vec![value]);
        }

        let mut pool = CursorPool::default();
        *pool.slot(1) = relation.index(0).full_cursor();

        // Partially consume the cursor in slot 1.
        assert_eq!(pool.slot(1).next(relation.index(0)), Some(vec![0]));
        assert_eq!(pool.slot(1).next(relation.index(0)), Some(vec![1]));

        // Touching a far slot grows the pool...
        pool.slot(40);
        assert!(pool.len() >= 82);

        // ...and slot 1 resumes exactly where it left off.
        assert_eq!(pool.slot(1).next(relation.index(0)), Some(vec![2]));
        assert_eq!(pool.slot(1).next(relation.index(0)), Some(vec![3]));
        assert_eq!(pool.slot(1).next(relation.index(0)), None);
    }
}
