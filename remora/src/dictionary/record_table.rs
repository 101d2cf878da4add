//! An interning table for compound (record) values.

use std::{collections::HashMap, sync::Mutex};

use crate::datavalues::{StorageValue, Tuple};

/// Handle of the nil record.
pub const NIL_RECORD: StorageValue = 0;

/// Associates tuples of field values with stable [StorageValue] handles,
/// so that compound values can be stored inside flat integer tuples.
///
/// Handle [NIL_RECORD] is reserved for the nil record; real handles start
/// at one. Packing may happen concurrently from parallel workers.
#[derive(Debug, Default)]
pub struct RecordTable {
    inner: Mutex<RecordTableInner>,
}

#[derive(Debug, Default)]
struct RecordTableInner {
    store: Vec<Tuple>,
    mapping: HashMap<Tuple, usize>,
}

impl RecordTable {
    /// Create an empty [RecordTable].
    pub fn new() -> Self {
        Default::default()
    }

    /// Intern `fields` and return the record's handle.
    pub fn pack(&self, fields: &[StorageValue]) -> StorageValue {
        let mut inner = self.inner.lock().expect("record table lock poisoned");

        if let Some(index) = inner.mapping.get(fields) {
            return (index + 1) as StorageValue;
        }

        let index = inner.store.len();
        inner.store.push(fields.to_vec());
        inner.mapping.insert(fields.to_vec(), index);

        (index + 1) as StorageValue
    }

    /// Resolve `handle` into its field values, or `None` for the nil record.
    ///
    /// # Panics
    /// Panics if the handle is unknown or the stored record does not have
    /// `arity` fields; both indicate a defect in the compiled program.
    pub fn unpack(&self, handle: StorageValue, arity: usize) -> Option<Tuple> {
        if handle == NIL_RECORD {
            return None;
        }

        let inner = self.inner.lock().expect("record table lock poisoned");
        let fields = usize::try_from(handle - 1)
            .ok()
            .and_then(|index| inner.store.get(index))
            .unwrap_or_else(|| panic!("No record with the handle {handle} exists."));

        assert_eq!(
            fields.len(),
            arity,
            "Record {handle} has {} fields but was unpacked with arity {arity}.",
            fields.len()
        );

        Some(fields.clone())
    }

    /// Return the number of interned records.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("record table lock poisoned").store.len()
    }

    /// Return whether the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
