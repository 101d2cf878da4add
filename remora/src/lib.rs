//! Remora is the execution layer of a Datalog compiler: an interpreter for
//! compiled relational-algebra programs. It runs an operator tree against
//! an in-memory set of indexed relations until a fixpoint is reached, and
//! evaluates isolated subroutines (e.g. provenance queries) on demand.
//!
//! Parsing, type checking, index selection, and the compilation of rules
//! into operator trees are external collaborators; this crate starts where
//! they stop, at the [Program][ram::program::Program] handed to the
//! [ExecutionEngine][execution::engine::ExecutionEngine].

#![deny(missing_debug_implementations, trivial_casts, trivial_numeric_casts)]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates
)]

pub mod datavalues;
pub mod dictionary;
pub mod error;
pub mod execution;
pub mod functors;
pub mod ram;
pub mod storage;
