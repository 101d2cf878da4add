//! Execution of compiled programs: the driver, the recursive operator
//! evaluator, and their supporting runtime state.

pub mod context;
pub mod cursor_pool;
pub mod engine;
pub mod execution_parameters;
pub mod profiling;
