//! The relational-algebra operations forming the body of a query.

use super::{
    aggregates::AggregateFunction, condition::Condition, expression::Expression,
    relation::RelationId,
};

/// One node of an operation tree.
///
/// Operation trees are immutable once built. Scan-like nodes carry the
/// binding position (`tuple_id`) at which they publish the current tuple
/// for their nested operation, and — for the sequential variants — the
/// stable cursor-pool `slot` assigned to them at generation time. Parallel
/// variants have no slot: every worker iterates its own contiguous
/// partition of the materialized range.
///
/// Range patterns (`lower`/`upper`) are given in attribute order with one
/// expression per attribute; [Expression::Undefined] entries leave the
/// attribute unconstrained. Bound attributes must form a prefix of the key
/// order of the addressed index. An equality scan uses identical lower and
/// upper patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Bind every tuple of `relation` in turn and run `nested` for each.
    Scan {
        /// The scanned relation.
        relation: RelationId,
        /// Binding position for the current tuple.
        tuple_id: usize,
        /// Cursor pool slot of this node.
        slot: usize,
        /// Operation executed once per tuple.
        nested: Box<Operation>,
    },
    /// [Operation::Scan] with the iteration partitioned across workers.
    ParallelScan {
        /// The scanned relation.
        relation: RelationId,
        /// Binding position for the current tuple.
        tuple_id: usize,
        /// Operation executed once per tuple, on the worker's own context.
        nested: Box<Operation>,
    },
    /// Bind every tuple of an index range in turn and run `nested` for each.
    IndexScan {
        /// The scanned relation.
        relation: RelationId,
        /// Index to scan through; `0` is the primary index.
        index: usize,
        /// Per-attribute lower bounds.
        lower: Vec<Expression>,
        /// Per-attribute upper bounds.
        upper: Vec<Expression>,
        /// Binding position for the current tuple.
        tuple_id: usize,
        /// Cursor pool slot of this node.
        slot: usize,
        /// Operation executed once per tuple.
        nested: Box<Operation>,
    },
    /// [Operation::IndexScan] with the range partitioned across workers.
    ParallelIndexScan {
        /// The scanned relation.
        relation: RelationId,
        /// Index to scan through; `0` is the primary index.
        index: usize,
        /// Per-attribute lower bounds.
        lower: Vec<Expression>,
        /// Per-attribute upper bounds.
        upper: Vec<Expression>,
        /// Binding position for the current tuple.
        tuple_id: usize,
        /// Operation executed once per tuple, on the worker's own context.
        nested: Box<Operation>,
    },
    /// Bind the first tuple of `relation` satisfying `filter` and run
    /// `nested` once for it (existential semantics).
    Choice {
        /// The searched relation.
        relation: RelationId,
        /// Condition a tuple must satisfy to be chosen.
        filter: Condition,
        /// Binding position for the chosen tuple.
        tuple_id: usize,
        /// Cursor pool slot of this node.
        slot: usize,
        /// Operation executed once if a tuple was chosen.
        nested: Box<Operation>,
    },
    /// [Operation::Choice] with the search partitioned across workers.
    /// Which satisfying tuple wins is unspecified.
    ParallelChoice {
        /// The searched relation.
        relation: RelationId,
        /// Condition a tuple must satisfy to be chosen.
        filter: Condition,
        /// Binding position for the chosen tuple.
        tuple_id: usize,
        /// Operation executed once if a tuple was chosen.
        nested: Box<Operation>,
    },
    /// [Operation::Choice] restricted to an index range.
    IndexChoice {
        /// The searched relation.
        relation: RelationId,
        /// Index to search through; `0` is the primary index.
        index: usize,
        /// Per-attribute lower bounds.
        lower: Vec<Expression>,
        /// Per-attribute upper bounds.
        upper: Vec<Expression>,
        /// Condition a tuple must satisfy to be chosen.
        filter: Condition,
        /// Binding position for the chosen tuple.
        tuple_id: usize,
        /// Cursor pool slot of this node.
        slot: usize,
        /// Operation executed once if a tuple was chosen.
        nested: Box<Operation>,
    },
    /// [Operation::IndexChoice] with the search partitioned across workers.
    ParallelIndexChoice {
        /// The searched relation.
        relation: RelationId,
        /// Index to search through; `0` is the primary index.
        index: usize,
        /// Per-attribute lower bounds.
        lower: Vec<Expression>,
        /// Per-attribute upper bounds.
        upper: Vec<Expression>,
        /// Condition a tuple must satisfy to be chosen.
        filter: Condition,
        /// Binding position for the chosen tuple.
        tuple_id: usize,
        /// Operation executed once if a tuple was chosen.
        nested: Box<Operation>,
    },
    /// Fold `function` over the tuples of `relation` that satisfy `filter`.
    ///
    /// While iterating, the current tuple is bound at `tuple_id` so that
    /// `filter` and `expression` can refer to it; afterwards the same
    /// position is rebound to the unary result tuple and `nested` runs
    /// once. Min and max over an empty range bind nothing and skip
    /// `nested` entirely.
    Aggregate {
        /// The aggregated relation.
        relation: RelationId,
        /// The reduction to apply.
        function: AggregateFunction,
        /// Value expression folded per tuple; `None` for plain counting.
        expression: Option<Expression>,
        /// Condition a tuple must satisfy to contribute.
        filter: Condition,
        /// Binding position, used for both iteration and the result.
        tuple_id: usize,
        /// Operation executed once on the bound result.
        nested: Box<Operation>,
    },
    /// [Operation::Aggregate] with the fold partitioned across workers and
    /// combined by a deterministic reduction.
    ParallelAggregate {
        /// The aggregated relation.
        relation: RelationId,
        /// The reduction to apply.
        function: AggregateFunction,
        /// Value expression folded per tuple; `None` for plain counting.
        expression: Option<Expression>,
        /// Condition a tuple must satisfy to contribute.
        filter: Condition,
        /// Binding position, used for both iteration and the result.
        tuple_id: usize,
        /// Operation executed once on the bound result.
        nested: Box<Operation>,
    },
    /// [Operation::Aggregate] restricted to an index range.
    IndexAggregate {
        /// The aggregated relation.
        relation: RelationId,
        /// Index providing the range; `0` is the primary index.
        index: usize,
        /// Per-attribute lower bounds.
        lower: Vec<Expression>,
        /// Per-attribute upper bounds.
        upper: Vec<Expression>,
        /// The reduction to apply.
        function: AggregateFunction,
        /// Value expression folded per tuple; `None` for plain counting.
        expression: Option<Expression>,
        /// Condition a tuple must satisfy to contribute.
        filter: Condition,
        /// Binding position, used for both iteration and the result.
        tuple_id: usize,
        /// Operation executed once on the bound result.
        nested: Box<Operation>,
    },
    /// [Operation::IndexAggregate] with the fold partitioned across workers.
    ParallelIndexAggregate {
        /// The aggregated relation.
        relation: RelationId,
        /// Index providing the range; `0` is the primary index.
        index: usize,
        /// Per-attribute lower bounds.
        lower: Vec<Expression>,
        /// Per-attribute upper bounds.
        upper: Vec<Expression>,
        /// The reduction to apply.
        function: AggregateFunction,
        /// Value expression folded per tuple; `None` for plain counting.
        expression: Option<Expression>,
        /// Condition a tuple must satisfy to contribute.
        filter: Condition,
        /// Binding position, used for both iteration and the result.
        tuple_id: usize,
        /// Operation executed once on the bound result.
        nested: Box<Operation>,
    },
    /// Run `nested` only if `condition` holds under the current bindings.
    Filter {
        /// The guarding condition.
        condition: Condition,
        /// Operation executed when the condition holds.
        nested: Box<Operation>,
    },
    /// Evaluate `values` and insert the resulting tuple into `relation`.
    Project {
        /// The target relation.
        relation: RelationId,
        /// One expression per attribute of the target relation.
        values: Vec<Expression>,
    },
    /// Bind the fields of the record `expression` evaluates to at
    /// `tuple_id` and run `nested`; unpacking the nil record executes
    /// nothing.
    UnpackRecord {
        /// Expression producing the record handle.
        expression: Expression,
        /// Number of fields of the expected record.
        arity: usize,
        /// Binding position for the field tuple.
        tuple_id: usize,
        /// Operation executed on the bound fields.
        nested: Box<Operation>,
    },
    /// Count one execution of the wrapped rule body under the current
    /// fixpoint iteration, then run `nested`. Counts nothing while
    /// profiling is disabled.
    Frequency {
        /// Identity of the rule, as printed by the profiler.
        rule: String,
        /// The wrapped rule body.
        nested: Box<Operation>,
    },
    /// Append the evaluated `values` to the subroutine return accumulator.
    /// [Expression::Undefined] entries append a zero flagged as undefined.
    ReturnValue {
        /// Return value expressions, appended in order.
        values: Vec<Expression>,
    },
}
