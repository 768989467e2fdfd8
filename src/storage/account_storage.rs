//! Time-bounded session store
//!
//! Maps chain identifiers to the id of the last connected wallet. The whole
//! record shares one `_timestamp` (milliseconds since epoch) refreshed on
//! every `set`; once `now - _timestamp > ttl` every entry reads as absent.
//! Expired data is not purged, the raw record stays on the backend.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Record key holding the shared write timestamp
pub const TIMESTAMP_KEY: &str = "_timestamp";

/// Fixed backend key the session record is stored under
pub const SESSION_STORAGE_KEY: &str = "session";

/// Millisecond clock
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// String key-value backend
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON file backend: one `<key>.json` file per key in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

/// Session store with a single coarse TTL
///
/// # Example
///
/// ```ignore
/// let storage = AccountStorage::in_memory(24 * 60 * 60 * 1000);
/// storage.set("BTC", "keystore")?;
/// assert_eq!(storage.get("BTC").as_deref(), Some("keystore"));
/// ```
pub struct AccountStorage {
    store: Box<dyn KeyValueStore>,
    storage_key: String,
    ttl_ms: i64,
    clock: Clock,
    // Serializes read-modify-write cycles on the record
    lock: Mutex<()>,
}

impl AccountStorage {
    pub fn new(store: Box<dyn KeyValueStore>, ttl_ms: i64) -> Self {
        Self::with_clock(store, ttl_ms, system_clock())
    }

    pub fn with_clock(store: Box<dyn KeyValueStore>, ttl_ms: i64, clock: Clock) -> Self {
        Self {
            store,
            storage_key: SESSION_STORAGE_KEY.to_string(),
            ttl_ms,
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn in_memory(ttl_ms: i64) -> Self {
        Self::new(Box::new(MemoryStore::new()), ttl_ms)
    }

    /// File-backed storage writing `session.json` into `data_dir`
    pub fn file_backed(data_dir: impl Into<PathBuf>, ttl_ms: i64) -> Self {
        Self::new(Box::new(FileStore::new(data_dir)), ttl_ms)
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Value for `key`, or `None` when absent or the record has expired
    pub fn get(&self, key: &str) -> Option<String> {
        let record = self.live_record()?;
        record.get(key).and_then(Value::as_str).map(str::to_string)
    }

    /// Whether `key` is present in a live record
    pub fn has(&self, key: &str) -> bool {
        self.live_record()
            .map(|record| record.contains_key(key))
            .unwrap_or(false)
    }

    /// Store `value` under `key` and refresh the shared timestamp
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;

        let mut record = self.raw_record();
        record.insert(key.to_string(), Value::String(value.to_string()));
        record.insert(TIMESTAMP_KEY.to_string(), Value::from((self.clock)()));

        self.store
            .save(&self.storage_key, &serde_json::to_string(&record)?)?;
        log::debug!("Session entry set: {} -> {}", key, value);
        Ok(())
    }

    /// Remove `key` from the raw record; returns whether it was present
    ///
    /// The timestamp is left untouched.
    pub fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;

        let mut record = self.raw_record();
        if record.remove(key).is_none() {
            return Ok(false);
        }

        self.store
            .save(&self.storage_key, &serde_json::to_string(&record)?)?;
        log::debug!("Session entry deleted: {}", key);
        Ok(true)
    }

    /// Live entries (chain key to wallet id), excluding the timestamp
    pub fn entries(&self) -> Vec<(String, String)> {
        self.live_record()
            .map(|record| {
                record
                    .into_iter()
                    .filter(|(key, _)| key != TIMESTAMP_KEY)
                    .filter_map(|(key, value)| value.as_str().map(|v| (key, v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write timestamp of the stored record, if any
    pub fn timestamp(&self) -> Option<i64> {
        self.raw_record().get(TIMESTAMP_KEY).and_then(Value::as_i64)
    }

    /// Clear every entry
    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        self.store.save(&self.storage_key, "{}")
    }

    fn raw_record(&self) -> Map<String, Value> {
        let raw = match self.store.load(&self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Map::new(),
            Err(e) => {
                log::warn!("Failed to read session storage: {}", e);
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(record)) => record,
            Ok(_) | Err(_) => {
                log::warn!("Malformed session record, treating as empty");
                Map::new()
            }
        }
    }

    fn live_record(&self) -> Option<Map<String, Value>> {
        let record = self.raw_record();
        // A record without a timestamp was never written by `set`
        let timestamp = record.get(TIMESTAMP_KEY).and_then(Value::as_i64)?;

        // Ages that overflow or lie in the future mean a corrupted timestamp
        let age = (self.clock)().checked_sub(timestamp).filter(|age| *age >= 0);
        match age {
            None => {
                log::warn!("Session timestamp {} is out of range, treating as expired", timestamp);
                return None;
            }
            Some(age) if age > self.ttl_ms => {
                log::debug!("Session record expired");
                return None;
            }
            Some(_) => {}
        }

        Some(record)
    }
}

impl std::fmt::Debug for AccountStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountStorage")
            .field("storage_key", &self.storage_key)
            .field("ttl_ms", &self.ttl_ms)
            .finish()
    }
}
