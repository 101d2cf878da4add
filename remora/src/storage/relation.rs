//! A single relation: a set of fixed-arity tuples plus its owned indices.

use crate::{
    datavalues::{StorageValue, Tuple},
    ram::relation::RelationDecl,
};

use super::index::Index;

/// An unordered set of fixed-arity tuples, maintained in one or more
/// ordered indices.
///
/// Index `0` is always the primary index in identity attribute order; the
/// declared index orders follow in declaration order. The primary index
/// decides membership, the others mirror it.
#[derive(Debug, Clone)]
pub struct Relation {
    name: String,
    arity: usize,
    indices: Vec<Index>,
}

impl Relation {
    /// Create an empty relation from its declaration.
    pub(crate) fn new(declaration: &RelationDecl) -> Self {
        let mut indices = vec![Index::identity(declaration.arity())];
        indices.extend(
            declaration
                .index_orders()
                .iter()
                .map(|order| Index::new(order, declaration.arity())),
        );

        Self {
            name: declaration.name().to_string(),
            arity: declaration.arity(),
            indices,
        }
    }

    /// The relation's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fixed arity of every tuple.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Number of tuples.
    pub fn len(&self) -> usize {
        self.indices[0].len()
    }

    /// Return whether the relation holds no tuples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The index at `index`.
    ///
    /// # Panics
    /// Panics if no such index was declared, which indicates a defect in
    /// the upstream index analysis.
    pub(crate) fn index(&self, index: usize) -> &Index {
        self.indices.get(index).unwrap_or_else(|| {
            panic!("Relation \"{}\" has no index {index}.", self.name)
        })
    }

    /// Add a tuple; returns whether it was newly added.
    ///
    /// # Panics
    /// Panics if the tuple's arity does not match the relation's.
    pub fn insert(&mut self, tuple: Tuple) -> bool {
        assert_eq!(
            tuple.len(),
            self.arity,
            "Relation \"{}\" has arity {} but received a tuple of arity {}.",
            self.name,
            self.arity,
            tuple.len()
        );

        if !self.indices[0].insert(&tuple) {
            return false;
        }

        for index in &mut self.indices[1..] {
            index.insert(&tuple);
        }

        true
    }

    /// Point lookup through the primary index.
    pub fn contains(&self, tuple: &[StorageValue]) -> bool {
        self.indices[0].contains(tuple)
    }

    /// Remove all tuples from every index.
    pub fn clear(&mut self) {
        for index in &mut self.indices {
            index.clear();
        }
    }

    /// Enumerate all tuples in primary-index order.
    pub fn iter(&self) -> impl Iterator<Item = Tuple> + '_ {
        self.indices[0].iter()
    }

    /// Exchange the full tuple and index contents of two relations of
    /// equal arity in O(1).
    pub(crate) fn swap_contents(&mut self, other: &mut Relation) {
        debug_assert_eq!(
            self.arity, other.arity,
            "swapped relations must have equal arity"
        );

        std::mem::swap(&mut self.indices, &mut other.indices);
    }
}

#[cfg(test)]
mod test {
    use crate::ram::relation::{IndexOrder, RelationDecl};

    use super::Relation;

    #[test]
    fn set_semantics() {
        let mut relation = Relation::new(&RelationDecl::new("edge", 2));

        assert!(relation.insert(vec![1, 2]));
        assert!(!relation.insert(vec![1, 2]));
        assert!(relation.contains(&[1, 2]));
        assert_eq!(relation.len(), 1);

        relation.clear();
        assert!(relation.is_empty());
        assert!(!relation.contains(&[1, 2]));
    }

    #[test]
    fn secondary_indices_mirror_the_primary() {
        let declaration =
            RelationDecl::new("edge", 2).with_index(IndexOrder::new(vec![1]));
        let mut relation = Relation::new(&declaration);

        relation.insert(vec![1, 2]);
        relation.insert(vec![3, 2]);
        relation.insert(vec![1, 4]);

        // Same tuple set through both indices, order may differ.
        let mut primary: Vec<_> = relation.index(0).iter().collect();
        let mut secondary: Vec<_> = relation.index(1).iter().collect();
        primary.sort();
        secondary.sort();

        assert_eq!(primary, secondary);
    }

    #[test]
    #[should_panic(expected = "arity")]
    fn arity_mismatch_panics() {
        let mut relation = Relation::new(&RelationDecl::new("edge", 2));
        relation.insert(vec![1, 2, 3]);
    }
}
