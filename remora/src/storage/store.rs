//! This module defines [RelationStore], which owns the collection of
//! relations addressed by [RelationId].

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    datavalues::{StorageValue, Tuple},
    ram::relation::{RelationDecl, RelationId},
};

use super::relation::Relation;

/// The owned collection of relations of one execution.
///
/// Every relation sits behind its own `RwLock`, so parallel operator
/// variants can insert into different relations (or read the same one)
/// concurrently without a global lock. `swap`, `clear`, and `merge` are
/// only issued at single-threaded synchronization points between parallel
/// regions.
#[derive(Debug)]
pub struct RelationStore {
    relations: Vec<RwLock<Relation>>,
}

impl RelationStore {
    /// Build the store for the given declarations; relations are created
    /// eagerly and start empty.
    pub fn new(declarations: &[RelationDecl]) -> Self {
        Self {
            relations: declarations
                .iter()
                .map(|declaration| RwLock::new(Relation::new(declaration)))
                .collect(),
        }
    }

    fn slot(&self, id: RelationId) -> &RwLock<Relation> {
        self.relations
            .get(id.index())
            .unwrap_or_else(|| panic!("No relation with the id {id} exists."))
    }

    /// Read access to a relation.
    ///
    /// # Panics
    /// Panics if the id is unknown; the operator tree is assumed
    /// well-formed by construction.
    pub fn relation(&self, id: RelationId) -> RwLockReadGuard<'_, Relation> {
        self.slot(id).read().expect("relation lock poisoned")
    }

    /// Write access to a relation.
    ///
    /// # Panics
    /// Panics if the id is unknown.
    pub fn relation_mut(&self, id: RelationId) -> RwLockWriteGuard<'_, Relation> {
        self.slot(id).write().expect("relation lock poisoned")
    }

    /// Add a tuple; returns whether it was newly added. Safe to call from
    /// parallel workers, synchronized per relation.
    pub fn insert(&self, id: RelationId, tuple: Tuple) -> bool {
        self.relation_mut(id).insert(tuple)
    }

    /// Point lookup through the relation's primary index.
    pub fn contains(&self, id: RelationId, tuple: &[StorageValue]) -> bool {
        self.relation(id).contains(tuple)
    }

    /// Number of tuples in the relation.
    pub fn size(&self, id: RelationId) -> usize {
        self.relation(id).len()
    }

    /// Remove all tuples of the relation.
    pub fn clear(&self, id: RelationId) {
        self.relation_mut(id).clear();
    }

    /// Exchange the contents of two relations in O(1) by exchanging index
    /// ownership. Locks are taken in id order, so concurrent swaps cannot
    /// deadlock.
    pub fn swap(&self, a: RelationId, b: RelationId) {
        if a == b {
            return;
        }

        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let mut first = self.relation_mut(first);
        let mut second = self.relation_mut(second);

        first.swap_contents(&mut second);
    }

    /// Insert every tuple of `source` into `target`; returns the number of
    /// newly added tuples.
    pub fn merge(&self, source: RelationId, target: RelationId) -> usize {
        if source == target {
            return 0;
        }

        let tuples: Vec<Tuple> = self.relation(source).iter().collect();
        let mut target = self.relation_mut(target);

        tuples
            .into_iter()
            .filter(|tuple| target.insert(tuple.clone()))
            .count()
    }

    /// Snapshot of all tuples of the relation, in primary-index order.
    pub fn contents(&self, id: RelationId) -> Vec<Tuple> {
        self.relation(id).iter().collect()
    }

    /// Number of relations in the store.
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }
}

#[cfg(test)]
mod test {
    use quickcheck_macros::quickcheck;

    use crate::ram::relation::{IndexOrder, RelationDecl, RelationId};

    use super::RelationStore;

    fn pair_store() -> (RelationStore, RelationId, RelationId) {
        let store = RelationStore::new(&[
            RelationDecl::new("a", 2),
            RelationDecl::new("b", 2),
        ]);
        (store, RelationId::new(0), RelationId::new(1))
    }

    #[test]
    fn swap_exchanges_contents() {
        let (store, a, b) = pair_store();
        store.insert(a, vec![1, 1]);
        store.insert(a, vec![2, 2]);
        store.insert(b, vec![3, 3]);

        store.swap(a, b);

        assert_eq!(store.contents(a), vec![vec![3, 3]]);
        assert_eq!(store.contents(b), vec![vec![1, 1], vec![2, 2]]);

        // Mutating one side afterwards must not affect the other.
        store.insert(a, vec![4, 4]);
        assert_eq!(store.size(a), 2);
        assert_eq!(store.size(b), 2);
    }

    #[test]
    fn merge_counts_new_tuples_and_is_idempotent() {
        let (store, a, b) = pair_store();
        store.insert(a, vec![1, 2]);
        store.insert(a, vec![2, 3]);
        store.insert(b, vec![2, 3]);

        assert_eq!(store.merge(a, b), 1);
        assert_eq!(store.size(b), 2);
        assert_eq!(store.merge(a, b), 0);
    }

    #[test]
    #[should_panic(expected = "No relation with the id")]
    fn unknown_relation_id_panics() {
        let (store, _, _) = pair_store();
        store.size(RelationId::new(7));
    }

    #[quickcheck]
    fn insert_twice_leaves_size_unchanged(tuples: Vec<(i64, i64)>) -> bool {
        let (store, a, _) = pair_store();

        for &(x, y) in &tuples {
            store.insert(a, vec![x, y]);
        }
        let size = store.size(a);

        for &(x, y) in &tuples {
            assert!(!store.insert(a, vec![x, y]));
            assert!(store.contains(a, &[x, y]));
        }

        store.size(a) == size
    }

    #[quickcheck]
    fn indices_agree_with_filtered_scan(tuples: Vec<(i64, i64)>, needle: i64) -> bool {
        let store = RelationStore::new(&[
            RelationDecl::new("edge", 2).with_index(IndexOrder::new(vec![1]))
        ]);
        let id = RelationId::new(0);

        for &(x, y) in &tuples {
            store.insert(id, vec![x, y]);
        }

        // Range query against the second-attribute index...
        let relation = store.relation(id);
        let mut indexed: Vec<_> = relation
            .index(1)
            .collect_range(&[None, Some(needle)], &[None, Some(needle)]);
        indexed.sort();

        // ...must return the same tuple set as a filtered full scan.
        let mut scanned: Vec<_> = relation.iter().filter(|tuple| tuple[1] == needle).collect();
        scanned.sort();

        indexed == scanned
    }
}
