//! Storage abstraction used by the pipeline.
//!
//! This module provides a single trait `Storage` and two concrete
//! implementations:
//!
//! - `MemoryStorage`: keeps every table in memory; used by tests and by
//!   callers that do not want anything persisted.
//! - `FileStorage`: stores a single JSON file containing a map of table
//!   names to maps of string keys to string values. The file is read once and
//!   replaced through a temporary sibling file on every commit.
//!
//! Writes always go through a [`Transaction`]: operations are staged and then
//! applied all at once by [`Storage::commit`]. Dropping a transaction without
//! committing it discards the staged operations.

use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Table holding transformer settings blobs
pub const SETTINGS_TABLE: &str = "settings";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Storage lock poisoned")]
    Poisoned,
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

type Tables = BTreeMap<String, BTreeMap<String, String>>;

enum StagedOp {
    Put {
        table: String,
        key: String,
        value: String,
    },
    Delete {
        table: String,
        predicate: Box<dyn Fn(&str) -> bool + Send>,
    },
}

/// Staged writes, applied atomically on commit
#[derive(Default)]
pub struct Transaction {
    ops: Vec<StagedOp>,
}

impl Transaction {
    pub fn put(&mut self, table: &str, key: &str, value: impl Into<String>) {
        self.ops.push(StagedOp::Put {
            table: table.to_string(),
            key: key.to_string(),
            value: value.into(),
        });
    }

    /// Delete every key of `table` matching `predicate`
    pub fn delete_where(&mut self, table: &str, predicate: impl Fn(&str) -> bool + Send + 'static) {
        self.ops.push(StagedOp::Delete {
            table: table.to_string(),
            predicate: Box::new(predicate),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply the staged operations in order
    fn apply(self, tables: &mut Tables) {
        for op in self.ops {
            match op {
                StagedOp::Put { table, key, value } => {
                    tables.entry(table).or_default().insert(key, value);
                }
                StagedOp::Delete { table, predicate } => {
                    if let Some(rows) = tables.get_mut(&table) {
                        rows.retain(|key, _| !predicate(key));
                    }
                }
            }
        }
    }
}

/// Named key/value tables of string blobs
pub trait Storage: Send + Sync {
    /// Read a value. Returns Ok(None) when the key is missing.
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<String>>;

    /// All keys of a table, sorted
    fn keys(&self, table: &str) -> StorageResult<Vec<String>>;

    /// Apply a transaction; either every operation lands or none does
    fn commit(&self, tx: Transaction) -> StorageResult<()>;

    fn begin(&self) -> Transaction {
        Transaction::default()
    }

    fn put(&self, table: &str, key: &str, value: &str) -> StorageResult<()> {
        let mut tx = self.begin();
        tx.put(table, key, value);
        self.commit(tx)
    }

    fn delete(&self, table: &str, predicate: Box<dyn Fn(&str) -> bool + Send>) -> StorageResult<()> {
        let mut tx = self.begin();
        tx.delete_where(table, predicate);
        self.commit(tx)
    }
}

/// Store a serializable value as a JSON blob
pub fn save_json<T: Serialize>(
    storage: &dyn Storage,
    table: &str,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let s = serde_json::to_string(value).map_err(|e| StorageError::Json(e.to_string()))?;
    storage.put(table, key, &s)
}

/// Load a JSON blob stored with [`save_json`]
pub fn load_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    table: &str,
    key: &str,
) -> StorageResult<Option<T>> {
    match storage.get(table, key)? {
        Some(s) => serde_json::from_str::<T>(&s)
            .map(Some)
            .map_err(|e| StorageError::Json(e.to_string())),
        None => Ok(None),
    }
}

/// In-memory storage
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<String>> {
        let guard = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(guard.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    fn keys(&self, table: &str) -> StorageResult<Vec<String>> {
        let guard = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(guard
            .get(table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn commit(&self, tx: Transaction) -> StorageResult<()> {
        let mut guard = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        tx.apply(&mut guard);
        Ok(())
    }
}

/// File-based storage: a single JSON file holding every table.
///
/// Implementation notes:
/// - On init, the file is read into memory.
/// - A commit applies the transaction to a copy, flushes the copy to disk and
///   only then replaces the in-memory tables, so a failed write leaves both
///   untouched.
pub struct FileStorage {
    /// Path to the backing JSON file.
    path: PathBuf,
    inner: Mutex<Tables>,
}

impl FileStorage {
    /// Determine a good default storage file path for the current user.
    /// - On Windows: %APPDATA%/GeocachePipeline/storage.json
    /// - Else: $HOME/.config/geocache-pipeline/storage.json
    pub fn default_path() -> PathBuf {
        if cfg!(windows)
            && let Ok(appdata) = std::env::var("APPDATA")
        {
            return Path::new(&appdata)
                .join("GeocachePipeline")
                .join("storage.json");
        }

        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home)
                .join(".config")
                .join("geocache-pipeline")
                .join("storage.json");
        }

        Path::new(".").join("geocache-pipeline-storage.json")
    }

    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::Io(format!("Failed to create storage parent directory: {}", e))
            })?;
        }

        let mut tables = Tables::new();
        if path.exists() {
            let s = fs::read_to_string(&path)
                .map_err(|e| StorageError::Io(format!("Failed to read storage file: {}", e)))?;
            if !s.trim().is_empty() {
                tables = serde_json::from_str(&s).map_err(|e| {
                    StorageError::Json(format!("Failed to parse storage JSON: {}", e))
                })?;
            }
        }

        tracing::debug!("Opened storage at {}", path.display());
        Ok(Self {
            path,
            inner: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file the tables are written to before replacing the storage file
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write all tables to a temporary file and rename it over the storage file
    fn flush(&self, tables: &Tables) -> StorageResult<()> {
        let s = serde_json::to_string_pretty(tables).map_err(|e| StorageError::Json(e.to_string()))?;
        let temp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(s.as_bytes())?;
            file.sync_all()?;
            rename_overwrite(&temp, &self.path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&temp);
            StorageError::Io(format!("write failed: {}", e))
        })
    }
}

fn rename_overwrite(from: &Path, to: &Path) -> std::io::Result<()> {
    #[cfg(windows)]
    {
        match fs::rename(from, to) {
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                fs::remove_file(to)?;
                fs::rename(from, to)
            }
            result => result,
        }
    }

    #[cfg(not(windows))]
    {
        fs::rename(from, to)
    }
}

impl Storage for FileStorage {
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<String>> {
        let guard = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(guard.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    fn keys(&self, table: &str) -> StorageResult<Vec<String>> {
        let guard = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(guard
            .get(table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn commit(&self, tx: Transaction) -> StorageResult<()> {
        let mut guard = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        let mut next = guard.clone();
        tx.apply(&mut next);
        self.flush(&next)?;
        *guard = next;
        Ok(())
    }
}
