//! Small name/value store standing in for the browser's synchronized storage.
//!
//! Only the encryption key lives here. The SQLite flavour persists it across
//! runs; the in-memory flavour is for tests and throwaway sessions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};

/// Storage entry holding the exported encryption key.
pub const ENCRYPTION_KEY_NAME: &str = "encryption-key";

#[derive(Debug)]
pub enum KeyStorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for KeyStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            KeyStorageError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for KeyStorageError {}

impl From<rusqlite::Error> for KeyStorageError {
    fn from(e: rusqlite::Error) -> Self {
        KeyStorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for KeyStorageError {
    fn from(e: std::io::Error) -> Self {
        KeyStorageError::Io(e)
    }
}

pub trait KeyStorage: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, KeyStorageError>;
    fn set(&self, name: &str, value: &str) -> Result<(), KeyStorageError>;
}

impl<T: KeyStorage + ?Sized> KeyStorage for Arc<T> {
    fn get(&self, name: &str) -> Result<Option<String>, KeyStorageError> {
        (**self).get(name)
    }

    fn set(&self, name: &str, value: &str) -> Result<(), KeyStorageError> {
        (**self).set(name, value)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStorage for MemoryKeyStorage {
    fn get(&self, name: &str) -> Result<Option<String>, KeyStorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), KeyStorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// SQLite-backed storage. The connection sits behind a mutex so the handle
/// can be shared between threads.
pub struct SqliteKeyStorage {
    conn: Mutex<Connection>,
}

impl SqliteKeyStorage {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, KeyStorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, KeyStorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, KeyStorageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sync_storage (
                name  TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyStorage for SqliteKeyStorage {
    fn get(&self, name: &str) -> Result<Option<String>, KeyStorageError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let value = conn
            .query_row(
                "SELECT value FROM sync_storage WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, name: &str, value: &str) -> Result<(), KeyStorageError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO sync_storage (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_round_trips() {
        let storage = MemoryKeyStorage::new();
        assert_eq!(storage.get(ENCRYPTION_KEY_NAME).unwrap(), None);
        storage.set(ENCRYPTION_KEY_NAME, "k1").unwrap();
        storage.set(ENCRYPTION_KEY_NAME, "k2").unwrap();
        assert_eq!(storage.get(ENCRYPTION_KEY_NAME).unwrap().as_deref(), Some("k2"));
    }

    #[test]
    fn sqlite_storage_overwrites_value() {
        let storage = SqliteKeyStorage::open_in_memory().unwrap();
        assert_eq!(storage.get("missing").unwrap(), None);
        storage.set(ENCRYPTION_KEY_NAME, "first").unwrap();
        storage.set(ENCRYPTION_KEY_NAME, "second").unwrap();
        assert_eq!(
            storage.get(ENCRYPTION_KEY_NAME).unwrap().as_deref(),
            Some("second")
        );
    }

    #[test]
    fn sqlite_storage_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync-storage.db");
        {
            let storage = SqliteKeyStorage::open(&path).unwrap();
            storage.set(ENCRYPTION_KEY_NAME, "persisted").unwrap();
        }
        let reopened = SqliteKeyStorage::open(&path).unwrap();
        assert_eq!(
            reopened.get(ENCRYPTION_KEY_NAME).unwrap().as_deref(),
            Some("persisted")
        );
    }
}
