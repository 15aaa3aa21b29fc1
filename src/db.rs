use rusqlite::{Connection, OptionalExtension};
use std::fs::create_dir_all;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not create storage directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not serialize value: {0}")]
    Json(#[from] serde_json::Error),
}

/// String key/value storage, in the manner of a browser's local storage.
pub trait Storage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

pub type SharedConnection = Arc<Mutex<Connection>>;

fn create_table(conn: &Connection) -> Result<(), StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS local_storage (
            scope INTEGER NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (scope, key)
        )",
        (),
    )?;
    Ok(())
}

pub fn open_db(path: &Path) -> Result<SharedConnection, StorageError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.is_dir() {
            create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(path)?;
    create_table(&conn)?;
    log::info!("Opened storage at {:?}", path);
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
pub fn open_in_memory() -> Result<SharedConnection, StorageError> {
    let conn = Connection::open_in_memory()?;
    create_table(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// The slice of the storage table belonging to one chat.
#[derive(Clone)]
pub struct LocalStorage {
    conn: SharedConnection,
    scope: i64,
}

impl LocalStorage {
    pub fn new(conn: SharedConnection, scope: i64) -> Self {
        Self { conn, scope }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for LocalStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let db = self.lock();
        let value = db
            .query_row(
                "SELECT value FROM local_storage WHERE scope = ?1 AND key = ?2",
                (self.scope, key),
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock().execute(
            "INSERT INTO local_storage (scope, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (scope, key) DO UPDATE SET value = excluded.value",
            (self.scope, key, value),
        )?;
        log::debug!("Stored {} bytes under {:?} for scope {}", value.len(), key, self.scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_reads_as_none() {
        let storage = LocalStorage::new(open_in_memory().unwrap(), 1);
        assert_eq!(storage.get_item("favoriteRecipes").unwrap(), None);
    }

    #[test]
    fn set_overwrites_and_scopes_are_isolated() {
        let conn = open_in_memory().unwrap();
        let alice = LocalStorage::new(conn.clone(), 1);
        let bob = LocalStorage::new(conn, 2);

        alice.set_item("k", "first").unwrap();
        alice.set_item("k", "second").unwrap();
        bob.set_item("k", "other").unwrap();

        assert_eq!(alice.get_item("k").unwrap().as_deref(), Some("second"));
        assert_eq!(bob.get_item("k").unwrap().as_deref(), Some("other"));
    }

    #[test]
    fn values_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("favorites.db");

        let storage = LocalStorage::new(open_db(&path).unwrap(), 7);
        storage.set_item("favoriteRecipes", "[]").unwrap();
        drop(storage);

        let reopened = LocalStorage::new(open_db(&path).unwrap(), 7);
        assert_eq!(
            reopened.get_item("favoriteRecipes").unwrap().as_deref(),
            Some("[]")
        );
    }
}
