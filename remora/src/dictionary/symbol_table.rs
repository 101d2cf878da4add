//! A table associating strings with stable integer handles.

use std::{collections::HashMap, sync::Mutex};

use crate::datavalues::StorageValue;

/// Offers a simple way to store multiple [String] objects and associate
/// them to a [StorageValue] handle.
///
/// Interning may happen concurrently from parallel workers (string
/// concatenation and conversion operators), so the table synchronizes
/// internally and is shared by reference.
#[derive(Debug, Default)]
pub struct SymbolTable {
    inner: Mutex<SymbolTableInner>,
}

#[derive(Debug, Default)]
struct SymbolTableInner {
    store: Vec<String>,
    mapping: HashMap<String, usize>,
}

impl SymbolTable {
    /// Create an empty [SymbolTable].
    pub fn new() -> Self {
        Default::default()
    }

    /// Return the handle associated with `entry`, interning it first if it
    /// is not known yet. Handles are dense and start at zero.
    pub fn intern(&self, entry: &str) -> StorageValue {
        let mut inner = self.inner.lock().expect("symbol table lock poisoned");

        if let Some(id) = inner.mapping.get(entry) {
            return *id as StorageValue;
        }

        let id = inner.store.len();
        inner.store.push(entry.to_string());
        inner.mapping.insert(entry.to_string(), id);

        id as StorageValue
    }

    /// Return the string associated with `handle`.
    ///
    /// # Panics
    /// Panics if the handle was never handed out by this table.
    pub fn resolve(&self, handle: StorageValue) -> String {
        let inner = self.inner.lock().expect("symbol table lock poisoned");

        usize::try_from(handle)
            .ok()
            .and_then(|index| inner.store.get(index))
            .unwrap_or_else(|| panic!("No symbol with the handle {handle} exists."))
            .clone()
    }

    /// Return the number of distinct symbols in the table.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("symbol table lock poisoned").store.len()
    }

    /// Return whether the table holds no symbols.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
