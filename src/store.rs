//! Id-keyed record storage for runs and scheduled jobs.
//!
//! A [`RecordStore`] keeps its rows in memory and, when opened on a file,
//! treats that file as the source of truth. Several processes may share one
//! file (the daemon and one-off commands do): reads reload it, and every change
//! reloads, applies and rewrites it while holding an exclusive lock on a
//! sibling `.lock` file.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// A row that can live in a [`RecordStore`].
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync {
    /// Entity name used in not-found errors, e.g. `"run"`.
    const ENTITY: &'static str;

    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "T: Record")]
struct Table<T> {
    next_id: u64,
    rows: BTreeMap<u64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }
}

pub struct RecordStore<T> {
    path: Option<PathBuf>,
    table: RwLock<Table<T>>,
}

impl<T: Record> RecordStore<T> {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            table: RwLock::new(Table::default()),
        }
    }

    /// Opens a file-backed store, creating parent directories as needed. A
    /// missing file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let table = load(&path)?;

        Ok(Self {
            path: Some(path),
            table: RwLock::new(table),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Inserts a row, assigning it the next id.
    pub fn insert(&self, mut record: T) -> Result<T> {
        self.write(|table| {
            let id = table.next_id;
            record.set_id(id);
            table.next_id += 1;
            table.rows.insert(id, record.clone());
            Ok(record)
        })
    }

    pub fn get(&self, id: u64) -> Option<T> {
        self.refresh();
        self.table.read().rows.get(&id).cloned()
    }

    /// Like [`RecordStore::get`], but a missing row is an error.
    pub fn fetch(&self, id: u64) -> Result<T> {
        self.get(id).ok_or(Error::NotFound {
            entity: T::ENTITY,
            id,
        })
    }

    /// All rows in id order.
    pub fn list(&self) -> Vec<T> {
        self.refresh();
        self.table.read().rows.values().cloned().collect()
    }

    /// Replaces an existing row.
    pub fn update(&self, record: &T) -> Result<()> {
        self.write(|table| match table.rows.get_mut(&record.id()) {
            Some(row) => {
                *row = record.clone();
                Ok(())
            }
            None => Err(Error::NotFound {
                entity: T::ENTITY,
                id: record.id(),
            }),
        })
    }

    /// Loads, changes and writes back one row as a single locked step, so
    /// changes made by other processes in the meantime are kept.
    pub fn modify<F>(&self, id: u64, change: F) -> Result<T>
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        self.write(|table| {
            let row = table.rows.get_mut(&id).ok_or(Error::NotFound {
                entity: T::ENTITY,
                id,
            })?;
            let mut updated = row.clone();
            change(&mut updated)?;
            *row = updated.clone();
            Ok(updated)
        })
    }

    /// Removes a row. Returns false when it did not exist.
    pub fn delete(&self, id: u64) -> Result<bool> {
        self.write(|table| Ok(table.rows.remove(&id).is_some()))
    }

    /// Replaces the cached rows with the file's current contents. A file that
    /// cannot be read leaves the cache as it was.
    fn refresh(&self) {
        let Some(path) = &self.path else {
            return;
        };
        match load(path) {
            Ok(table) => *self.table.write() = table,
            Err(error) => tracing::warn!(
                path = %path.display(),
                error = %error,
                "could not reload store, using cached rows"
            ),
        }
    }

    /// Applies `change` to the latest table. For a file-backed store the file
    /// is locked, reloaded, changed and rewritten before the lock is released;
    /// a failed change writes nothing.
    fn write<R>(&self, change: impl FnOnce(&mut Table<T>) -> Result<R>) -> Result<R> {
        let mut table = self.table.write();
        let Some(path) = &self.path else {
            return change(&mut *table);
        };

        let lock_path = sibling(path, ".lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::io(&lock_path, e))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(|e| Error::io(&lock_path, e))?;

        *table = load(path)?;
        let result = change(&mut *table)?;
        persist(path, &*table)?;
        Ok(result)
    }
}

fn load<T: Record>(path: &Path) -> Result<Table<T>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).map_err(|e| {
            Error::Store(format!("{} is not a valid store: {}", path.display(), e))
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Table::default()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Writes the table to a temporary file and renames it over `path`, so
/// readers see either the old or the new contents.
fn persist<T: Record>(path: &Path, table: &Table<T>) -> Result<()> {
    let json = serde_json::to_string_pretty(table)
        .map_err(|e| Error::Store(format!("serialization failed: {}", e)))?;
    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, json).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

/// `runs.json` becomes `runs.json<suffix>`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
