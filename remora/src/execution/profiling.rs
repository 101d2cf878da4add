//! Execution-frequency and relation-read counters.
//!
//! The counters are owned by the engine and live exactly as long as one
//! execution; they are observational side effects with no influence on
//! evaluation results, and an external reporting tool consumes them after
//! the run.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use hashbrown::HashMap;
use itertools::Itertools;

use crate::ram::relation::RelationId;

/// Profiling counters of one execution.
#[derive(Debug)]
pub struct Profile {
    enabled: bool,
    /// Rule applications keyed by rule identity and fixpoint iteration.
    frequencies: Mutex<HashMap<(String, usize), usize>>,
    /// Existence checks per relation; atomics because parallel workers
    /// evaluate conditions concurrently.
    reads: Vec<AtomicUsize>,
}

impl Profile {
    /// Create counters for `relation_count` relations; a disabled profile
    /// counts nothing.
    pub(crate) fn new(enabled: bool, relation_count: usize) -> Self {
        Self {
            enabled,
            frequencies: Mutex::new(HashMap::new()),
            reads: (0..relation_count).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Return whether profiling is enabled for this execution.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Count one application of `rule` in fixpoint iteration `iteration`.
    pub(crate) fn count_rule(&self, rule: &str, iteration: usize) {
        if !self.enabled {
            return;
        }

        *self
            .frequencies
            .lock()
            .expect("frequency counter lock poisoned")
            .entry((rule.to_string(), iteration))
            .or_insert(0) += 1;
    }

    /// Count one existence check against `relation`.
    pub(crate) fn count_read(&self, relation: RelationId) {
        if !self.enabled {
            return;
        }

        self.reads
            .get(relation.index())
            .unwrap_or_else(|| panic!("No relation with the id {relation} exists."))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Rule application counts keyed by rule identity and iteration,
    /// most frequent first.
    pub fn rule_frequencies(&self) -> Vec<((String, usize), usize)> {
        self.frequencies
            .lock()
            .expect("frequency counter lock poisoned")
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .sorted_by_key(|(_, count)| std::cmp::Reverse(*count))
            .collect()
    }

    /// Number of existence checks evaluated against `relation`.
    pub fn relation_reads(&self, relation: RelationId) -> usize {
        self.reads
            .get(relation.index())
            .unwrap_or_else(|| panic!("No relation with the id {relation} exists."))
            .load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use crate::ram::relation::RelationId;

    use super::Profile;

    #[test]
    fn disabled_profile_counts_nothing() {
        let profile = Profile::new(false, 1);

        profile.count_rule("path(x,y) :- edge(x,y).", 0);
        profile.count_read(RelationId::new(0));

        assert!(profile.rule_frequencies().is_empty());
        assert_eq!(profile.relation_reads(RelationId::new(0)), 0);
    }

    #[test]
    fn frequencies_are_keyed_by_iteration() {
        let profile = Profile::new(true, 1);

        profile.count_rule("rule", 0);
        profile.count_rule("rule", 1);
        profile.count_rule("rule", 1);

        let frequencies = profile.rule_frequencies();
        assert_eq!(frequencies.len(), 2);
        assert_eq!(frequencies[0], (("rule".to_string(), 1), 2));
        assert_eq!(frequencies[1], (("rule".to_string(), 0), 1));
    }
}
