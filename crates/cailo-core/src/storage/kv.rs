//! Durable key-value store abstraction.
//!
//! The coordinator persists [`GlobalState`](crate::model::GlobalState) as a
//! handful of JSON values under fixed keys. Every save writes the full key
//! set in one call, so the last complete write wins.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::StoreError;

/// Keys of the persisted namespace.
pub mod keys {
    pub const RULES: &str = "rules";
    pub const ENABLED: &str = "enabled";
    pub const QUOTA_RECORDS: &str = "quotaRecords";
    pub const MODE: &str = "mode";
    pub const LOCKOUT_COUNTS: &str = "lockoutCounts";
    pub const REVISION: &str = "revision";
}

pub trait KvStore {
    /// Read a single key. A missing key is `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a set of keys together.
    fn set_many(&mut self, entries: Vec<(&'static str, Value)>) -> Result<(), StoreError>;
}

impl<T: KvStore + ?Sized> KvStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(key)
    }

    fn set_many(&mut self, entries: Vec<(&'static str, Value)>) -> Result<(), StoreError> {
        (**self).set_many(entries)
    }
}

/// In-memory store, used by tests and by contexts that must not touch disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, Value>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set_many` calls so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert_raw(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn set_many(&mut self, entries: Vec<(&'static str, Value)>) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.values.insert(key.to_string(), value);
        }
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        assert!(store.get(keys::ENABLED).unwrap().is_none());
        store
            .set_many(vec![(keys::ENABLED, json!(false)), (keys::MODE, json!("normal"))])
            .unwrap();
        assert_eq!(store.get(keys::ENABLED).unwrap(), Some(json!(false)));
        assert_eq!(store.get(keys::MODE).unwrap(), Some(json!("normal")));
        assert_eq!(store.writes(), 1);
    }
}
