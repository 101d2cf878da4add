//! The statement layer driving queries and fixpoint control.

use super::{condition::Condition, operation::Operation, relation::RelationId};

/// A statement of the compiled program.
///
/// Statements execute for their effect on the relation store; a statement
/// additionally reports whether the enclosing [Statement::Loop] should
/// continue, which is how [Statement::Exit] terminates a fixpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Execute children in declared order; later children observe all
    /// relation mutations made by earlier ones. Stops early when a child
    /// signals loop exit.
    Sequence(Vec<Statement>),
    /// Re-execute the body until it signals exit, incrementing the
    /// fixpoint iteration counter once per pass. The counter is reset on
    /// entry and after completion, so every stratum starts at iteration
    /// zero.
    Loop(Box<Statement>),
    /// Signal loop exit when the condition holds, e.g. "the delta relation
    /// is empty".
    Exit(Condition),
    /// Execute one operation tree (a rule body).
    Query(Operation),
    /// Remove all tuples of the relation.
    Clear(RelationId),
    /// Exchange the contents of two relations of equal arity in O(1);
    /// used for double-buffered fixpoint evaluation.
    Swap(RelationId, RelationId),
    /// Insert every tuple of `source` into `target`; used to fold delta
    /// relations into their full counterparts between fixpoint passes.
    Merge {
        /// Relation whose tuples are copied.
        source: RelationId,
        /// Relation receiving the tuples.
        target: RelationId,
    },
}
