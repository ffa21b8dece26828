use std::collections::HashMap;
use std::fs;
use std::marker::PhantomData;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no entry for key {0}")]
    NotFound(String),
    #[error("failed to open store at {path}")]
    OpenDatabase {
        path: String,
        #[source]
        source: redb::DatabaseError,
    },
    #[error("failed to set permissions on store at {path}")]
    Permissions {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to begin store transaction")]
    BeginTransaction(#[source] redb::TransactionError),
    #[error("failed to open table")]
    OpenTable(#[source] redb::TableError),
    #[error("failed to commit store transaction")]
    Commit(#[source] redb::CommitError),
    #[error("store write failed for key {key}")]
    Write {
        key: String,
        #[source]
        source: redb::StorageError,
    },
    #[error("store read failed")]
    Read(#[source] redb::StorageError),
    #[error("failed to encode value for key {key}")]
    Encode {
        key: String,
        #[source]
        source: bincode::Error,
    },
    #[error("failed to decode stored value")]
    Decode(#[source] bincode::Error),
}

/// Keyed storage for one record type. Puts overwrite, list order is
/// unspecified, and entries are never removed, only overwritten.
pub trait Store<T>: Send + Sync {
    fn put(&mut self, key: &str, value: T) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<T, StoreError>;
    fn list(&self) -> Result<Vec<T>, StoreError>;
    fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore<T> {
    db: HashMap<String, T>,
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        InMemoryStore { db: HashMap::new() }
    }
}

impl<T: Clone + Send + Sync> Store<T> for InMemoryStore<T> {
    fn put(&mut self, key: &str, value: T) -> Result<(), StoreError> {
        self.db.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<T, StoreError> {
        self.db
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.db.values().cloned().collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.db.len())
    }
}

/// Durable variant backed by a single-file embedded database with one named
/// table. The file is forced to mode 0600 and every put commits in its own
/// write transaction.
pub struct PersistentStore<T> {
    db: Database,
    table: TableDefinition<'static, &'static str, &'static [u8]>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PersistentStore<T> {
    pub fn new(path: impl AsRef<Path>, bucket: &'static str) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let db = Database::create(path).map_err(|e| StoreError::OpenDatabase {
            path: display.clone(),
            source: e,
        })?;

        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
            StoreError::Permissions {
                path: display,
                source: e,
            }
        })?;

        let table = TableDefinition::new(bucket);

        // Create the table up front so an empty store is listable.
        let txn = db.begin_write().map_err(StoreError::BeginTransaction)?;
        txn.open_table(table).map_err(StoreError::OpenTable)?;
        txn.commit().map_err(StoreError::Commit)?;

        Ok(PersistentStore {
            db,
            table,
            _marker: PhantomData,
        })
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> Store<T> for PersistentStore<T> {
    fn put(&mut self, key: &str, value: T) -> Result<(), StoreError> {
        let bytes = bincode::serialize(&value).map_err(|e| StoreError::Encode {
            key: key.to_string(),
            source: e,
        })?;

        let txn = self.db.begin_write().map_err(StoreError::BeginTransaction)?;
        {
            let mut table = txn.open_table(self.table).map_err(StoreError::OpenTable)?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| StoreError::Write {
                    key: key.to_string(),
                    source: e,
                })?;
        }
        txn.commit().map_err(StoreError::Commit)
    }

    fn get(&self, key: &str) -> Result<T, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::BeginTransaction)?;
        let table = txn.open_table(self.table).map_err(StoreError::OpenTable)?;

        let guard = table
            .get(key)
            .map_err(StoreError::Read)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        bincode::deserialize(guard.value()).map_err(StoreError::Decode)
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::BeginTransaction)?;
        let table = txn.open_table(self.table).map_err(StoreError::OpenTable)?;

        let mut values = Vec::new();
        for entry in table.iter().map_err(StoreError::Read)? {
            let (_, value) = entry.map_err(StoreError::Read)?;
            values.push(bincode::deserialize(value.value()).map_err(StoreError::Decode)?);
        }
        Ok(values)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::BeginTransaction)?;
        let table = txn.open_table(self.table).map_err(StoreError::OpenTable)?;

        let mut count = 0;
        for entry in table.iter().map_err(StoreError::Read)? {
            entry.map_err(StoreError::Read)?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::types::{State, Task, TaskEvent};

    #[test]
    fn in_memory_put_get_list_count() {
        let mut store: InMemoryStore<Task> = InMemoryStore::new();
        let task = Task {
            name: "t1".to_string(),
            ..Default::default()
        };

        store.put(&task.id.to_string(), task.clone()).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(&task.id.to_string()).unwrap(), task);
        assert_eq!(store.list().unwrap().len(), 1);

        // overwrite semantics
        let mut updated = task.clone();
        updated.state = State::Scheduled;
        store.put(&task.id.to_string(), updated.clone()).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(&task.id.to_string()).unwrap().state, State::Scheduled);
    }

    #[test]
    fn in_memory_get_missing_is_not_found() {
        let store: InMemoryStore<Task> = InMemoryStore::new();
        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn persistent_round_trips_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let mut store: PersistentStore<Task> = PersistentStore::new(&path, "tasks").unwrap();

        let task = Task {
            name: "db-task".to_string(),
            state: State::Running,
            image: "nginx".to_string(),
            memory: 512,
            ..Default::default()
        };
        store.put(&task.id.to_string(), task.clone()).unwrap();

        assert_eq!(store.get(&task.id.to_string()).unwrap(), task);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn persistent_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        let event = TaskEvent::default();
        {
            let mut store: PersistentStore<TaskEvent> =
                PersistentStore::new(&path, "events").unwrap();
            store.put(&event.id.to_string(), event.clone()).unwrap();
        }

        let reopened: PersistentStore<TaskEvent> = PersistentStore::new(&path, "events").unwrap();
        assert_eq!(reopened.get(&event.id.to_string()).unwrap(), event);
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[test]
    fn persistent_file_mode_is_0600() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let _store: PersistentStore<Task> = PersistentStore::new(&path, "tasks").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
