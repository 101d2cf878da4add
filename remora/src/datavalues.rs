//! Basic value types stored inside relations.
//!
//! All tuple entries are fixed-width signed integers. Strings and compound
//! values are represented by handles that are resolved through the
//! [dictionary][crate::dictionary] tables.

/// The value type stored in relations.
///
/// Arithmetic on [StorageValue]s wraps around on overflow.
pub type StorageValue = i64;

/// A fixed-arity row of [StorageValue]s.
pub type Tuple = Vec<StorageValue>;
