//! The compiled relational-algebra program model.
//!
//! A [Program][program::Program] is produced by the external compilation
//! stage and is immutable once built, which allows the evaluator to share
//! it read-only across parallel workers. Tuple position ids and cursor pool
//! slots are assigned by the compiler during tree construction.

pub mod aggregates;
pub mod condition;
pub mod expression;
pub mod operation;
pub mod program;
pub mod relation;
pub mod statement;
