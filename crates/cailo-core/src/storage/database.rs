//! SQLite-backed key-value store.
//!
//! Holds the persisted detox namespace in a single `kv` table whose values
//! are JSON documents. A save replaces every key inside one transaction.

use std::path::Path;

use rusqlite::{params, Connection};
use serde_json::Value;

use super::data_dir;
use super::kv::KvStore;
use crate::error::{CoreError, StoreError};

/// SQLite database for the persisted state.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `~/.config/cailo/cailo.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory is unavailable or the
    /// database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("cailo.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open (or create) a database file at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Get a raw value from the kv table.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Set a raw value in the kv table.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

impl KvStore for Database {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.kv_get(key)? {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StoreError::Malformed {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn set_many(&mut self, entries: Vec<(&'static str, Value)>) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")?;
            for (key, value) in entries {
                stmt.execute(params![key, value.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
    }

    #[test]
    fn set_many_writes_json_values() {
        let mut db = Database::open_memory().unwrap();
        db.set_many(vec![("enabled", json!(true)), ("lockoutCounts", json!({"2024-03-01": 2}))])
            .unwrap();
        assert_eq!(db.get("enabled").unwrap(), Some(json!(true)));
        assert_eq!(db.get("lockoutCounts").unwrap(), Some(json!({"2024-03-01": 2})));
    }

    #[test]
    fn malformed_json_is_reported_per_key() {
        let db = Database::open_memory().unwrap();
        db.kv_set("rules", "{not json").unwrap();
        match db.get("rules") {
            Err(StoreError::Malformed { key, .. }) => assert_eq!(key, "rules"),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cailo.db");
        {
            let mut db = Database::open_at(&path).unwrap();
            db.set_many(vec![("mode", json!("normal"))]).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.get("mode").unwrap(), Some(json!("normal")));
    }
}
