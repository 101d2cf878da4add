//! Ordered indices over attribute projections, and the resumable cursors
//! that enumerate their ranges.

use std::{collections::BTreeSet, ops::Bound};

use crate::{
    datavalues::{StorageValue, Tuple},
    ram::relation::IndexOrder,
};

/// An ordered index over a relation.
///
/// Tuples are stored reordered so that the declared key attributes occupy
/// the most significant positions; the remaining attributes are appended in
/// ascending position so the stored key always determines the full tuple.
/// Lexicographic order over the reordered tuples then makes every prefix
/// constraint on the key an inclusive range of the underlying set.
#[derive(Debug, Clone)]
pub struct Index {
    /// Maps stored-key position to original attribute position; a full
    /// permutation of `0..arity`.
    order: Vec<usize>,
    data: BTreeSet<Tuple>,
}

impl Index {
    /// Create an index over `arity`-tuples with the given declared key
    /// order.
    pub(crate) fn new(declared: &IndexOrder, arity: usize) -> Self {
        debug_assert!(declared.key().iter().all(|&position| position < arity));

        let mut order = declared.key().to_vec();
        order.extend((0..arity).filter(|position| !declared.key().contains(position)));

        Self {
            order,
            data: BTreeSet::new(),
        }
    }

    /// Create the primary index: identity attribute order.
    pub(crate) fn identity(arity: usize) -> Self {
        Self {
            order: (0..arity).collect(),
            data: BTreeSet::new(),
        }
    }

    fn permute(&self, tuple: &[StorageValue]) -> Tuple {
        self.order.iter().map(|&position| tuple[position]).collect()
    }

    fn restore(&self, stored: &[StorageValue]) -> Tuple {
        let mut tuple = vec![0; stored.len()];
        for (key_position, &position) in self.order.iter().enumerate() {
            tuple[position] = stored[key_position];
        }
        tuple
    }

    /// Add a tuple (given in attribute order); returns whether it was new.
    pub(crate) fn insert(&mut self, tuple: &[StorageValue]) -> bool {
        self.data.insert(self.permute(tuple))
    }

    /// Point lookup for a fully bound tuple (given in attribute order).
    pub(crate) fn contains(&self, tuple: &[StorageValue]) -> bool {
        self.data.contains(&self.permute(tuple))
    }

    /// Number of stored tuples.
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }

    /// Enumerate all tuples in key order, restored to attribute order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = Tuple> + '_ {
        self.data.iter().map(|stored| self.restore(stored))
    }

    /// Translate per-attribute bounds (`None` = unconstrained) into
    /// inclusive stored-key bounds. Constrained attributes must form a
    /// prefix of this index's key order for the range to be exact; the
    /// external index analysis guarantees that for every generated scan.
    fn stored_bounds(
        &self,
        lower: &[Option<StorageValue>],
        upper: &[Option<StorageValue>],
    ) -> (Tuple, Tuple) {
        debug_assert_eq!(lower.len(), self.order.len());
        debug_assert_eq!(upper.len(), self.order.len());

        let mut stored_lower = Vec::with_capacity(self.order.len());
        let mut stored_upper = Vec::with_capacity(self.order.len());

        for &position in &self.order {
            stored_lower.push(lower[position].unwrap_or(StorageValue::MIN));
            stored_upper.push(upper[position].unwrap_or(StorageValue::MAX));
        }

        (stored_lower, stored_upper)
    }

    /// A cursor over the whole index.
    pub(crate) fn full_cursor(&self) -> RangeCursor {
        RangeCursor::new(
            vec![StorageValue::MIN; self.order.len()],
            vec![StorageValue::MAX; self.order.len()],
        )
    }

    /// A cursor over the tuples matching the given per-attribute bounds.
    pub(crate) fn range_cursor(
        &self,
        lower: &[Option<StorageValue>],
        upper: &[Option<StorageValue>],
    ) -> RangeCursor {
        let (stored_lower, stored_upper) = self.stored_bounds(lower, upper);
        RangeCursor::new(stored_lower, stored_upper)
    }

    /// Materialize the tuples matching the given per-attribute bounds, in
    /// key order; used by aggregates and the parallel operator variants to
    /// take a snapshot that can be partitioned outside the store's locks.
    pub(crate) fn collect_range(
        &self,
        lower: &[Option<StorageValue>],
        upper: &[Option<StorageValue>],
    ) -> Vec<Tuple> {
        let (stored_lower, stored_upper) = self.stored_bounds(lower, upper);
        self.data
            .range((Bound::Included(stored_lower), Bound::Included(stored_upper)))
            .map(|stored| self.restore(stored))
            .collect()
    }

    /// Does any tuple match the given per-attribute pattern?
    pub(crate) fn matches(&self, pattern: &[Option<StorageValue>]) -> bool {
        if pattern.iter().all(Option::is_some) {
            let tuple: Tuple = pattern.iter().copied().map(|value| value.unwrap_or(0)).collect();
            return self.contains(&tuple);
        }

        let (stored_lower, stored_upper) = self.stored_bounds(pattern, pattern);
        self.data
            .range((Bound::Included(stored_lower), Bound::Included(stored_upper)))
            .next()
            .is_some()
    }

    fn first_in(&self, start: Bound<&Tuple>, upper: &Tuple) -> Option<&Tuple> {
        self.data.range::<Tuple, _>((start, Bound::Included(upper))).next()
    }
}

/// A resumable cursor over an inclusive stored-key range of one [Index].
///
/// The cursor owns its resumption state — the range bounds and the last
/// yielded key — instead of borrowing a range iterator. Every call to
/// [next][RangeCursor::next] re-enters the index just past the last key, so
/// pool growth, interleaved insertions, and separate top-level evaluation
/// calls can never invalidate it.
#[derive(Debug, Clone, Default)]
pub struct RangeCursor {
    lower: Tuple,
    upper: Tuple,
    last: Option<Tuple>,
    exhausted: bool,
}

impl RangeCursor {
    fn new(lower: Tuple, upper: Tuple) -> Self {
        Self {
            lower,
            upper,
            last: None,
            exhausted: false,
        }
    }

    /// Advance the cursor and return the next tuple in attribute order.
    ///
    /// The cursor must be used with the index it was created from; the
    /// owning operator's pool slot guarantees that.
    pub(crate) fn next(&mut self, index: &Index) -> Option<Tuple> {
        if self.exhausted {
            return None;
        }

        let stored = {
            let start = match self.last.as_ref() {
                Some(key) => Bound::Excluded(key),
                None => Bound::Included(&self.lower),
            };
            index.first_in(start, &self.upper).cloned()
        };

        match stored {
            Some(key) => {
                let tuple = index.restore(&key);
                self.last = Some(key);
                Some(tuple)
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}
