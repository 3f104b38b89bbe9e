//! Local Poll Store
//!
//! Client-side record of polls the user created (with their creator keys),
//! polls already voted on, and a stable device fingerprint. Backed by a small
//! key-value store; nothing here is a source of truth for poll existence.

use crate::polls::PollTheme;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Record key holding the remembered polls
pub const POLLS_KEY: &str = "quickPoll";
/// Record key holding IDs of polls voted on from this device
pub const VOTED_KEY: &str = "votedOn";
/// Record key holding the device fingerprint
pub const DEVICE_KEY: &str = "deviceId";

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode store: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Callback computing a record's new value from its current one
pub type UpdateFn<'a> = dyn FnMut(Option<Value>) -> Result<Value, StoreError> + 'a;

/// Minimal key-value persistence
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Replace a record with `f(current)`. No other write lands in between.
    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<(), StoreError>;
}

/// JSON file holding one object of records, written atomically
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing file is empty; a corrupt one is logged and treated as empty.
    fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "local store is corrupt; starting empty");
                Ok(Map::new())
            }
        }
    }

    fn write_all(&self, records: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                debug!("Created store directory: {}", parent.display());
            }
        }

        let content = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut records = self.read_all()?;
        records.insert(key.to_string(), value);
        self.write_all(&records)
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut records = self.read_all()?;
        let value = f(records.remove(key))?;
        records.insert(key.to_string(), value);
        self.write_all(&records)
    }
}

/// In-process store, nothing persisted
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Value>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.records.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let value = f(records.remove(key))?;
        records.insert(key.to_string(), value);
        Ok(())
    }
}

/// A poll created from this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberedPoll {
    pub poll_id: String,
    pub creator_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<PollTheme>,
}

impl RememberedPoll {
    pub fn new(poll_id: impl Into<String>, creator_key: impl Into<String>) -> Self {
        Self {
            poll_id: poll_id.into(),
            creator_key: creator_key.into(),
            theme: None,
        }
    }

    pub fn with_theme(mut self, theme: PollTheme) -> Self {
        self.theme = Some(theme);
        self
    }
}

/// "My polls" bookkeeping on top of a [`KeyValueStore`]
pub struct MyPolls<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> MyPolls<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Remembered polls, oldest first. Unreadable records read as empty.
    pub fn list(&self) -> Result<Vec<RememberedPoll>, StoreError> {
        Ok(self.read_list(POLLS_KEY)?.unwrap_or_default())
    }

    /// Remember a poll and return the updated list.
    ///
    /// An entry with the same poll ID is replaced in place.
    pub fn append(&self, poll: RememberedPoll) -> Result<Vec<RememberedPoll>, StoreError> {
        self.update_list(POLLS_KEY, |polls: &mut Vec<RememberedPoll>| {
            match polls.iter_mut().find(|p| p.poll_id == poll.poll_id) {
                Some(existing) => *existing = poll.clone(),
                None => polls.push(poll.clone()),
            }
        })
    }

    /// Forget a poll and return the updated list
    pub fn remove(&self, poll_id: &str) -> Result<Vec<RememberedPoll>, StoreError> {
        self.update_list(POLLS_KEY, |polls: &mut Vec<RememberedPoll>| {
            polls.retain(|p| p.poll_id != poll_id)
        })
    }

    pub fn find(&self, poll_id: &str) -> Result<Option<RememberedPoll>, StoreError> {
        Ok(self.list()?.into_iter().find(|p| p.poll_id == poll_id))
    }

    /// Creator key for a poll, if it was created here
    pub fn creator_key(&self, poll_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.find(poll_id)?.map(|p| p.creator_key))
    }

    /// Record that this device voted on a poll. Advisory only.
    pub fn mark_voted(&self, poll_id: &str) -> Result<(), StoreError> {
        if self.has_voted(poll_id)? {
            return Ok(());
        }
        self.update_list(VOTED_KEY, |voted: &mut Vec<String>| {
            if !voted.iter().any(|id| id == poll_id) {
                voted.push(poll_id.to_string());
            }
        })?;
        Ok(())
    }

    pub fn has_voted(&self, poll_id: &str) -> Result<bool, StoreError> {
        Ok(self.voted()?.iter().any(|id| id == poll_id))
    }

    fn voted(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_list(VOTED_KEY)?.unwrap_or_default())
    }

    /// Stable fingerprint for this device, generated on first use
    pub fn device_id(&self) -> Result<String, StoreError> {
        if let Some(Value::String(id)) = self.store.get(DEVICE_KEY)? {
            if !id.is_empty() {
                return Ok(id);
            }
        }

        // Another writer may have generated one since the read above
        let mut id = String::new();
        self.store.update(DEVICE_KEY, &mut |current| {
            id = match current {
                Some(Value::String(existing)) if !existing.is_empty() => existing,
                _ => uuid::Uuid::new_v4().simple().to_string(),
            };
            Ok(Value::String(id.clone()))
        })?;
        Ok(id)
    }

    fn read_list<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>, StoreError> {
        Ok(self.store.get(key)?.and_then(|value| decode_list(key, value)))
    }

    /// Apply `f` to a list record under the store's write lock and return the result
    fn update_list<T, F>(&self, key: &str, mut f: F) -> Result<Vec<T>, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut Vec<T>),
    {
        let mut updated = Vec::new();
        self.store.update(key, &mut |current| {
            let mut list = current
                .and_then(|value| decode_list(key, value))
                .unwrap_or_default();
            f(&mut list);
            let value = serde_json::to_value(&list)?;
            updated = list;
            Ok(value)
        })?;
        Ok(updated)
    }
}

fn decode_list<T: DeserializeOwned>(key: &str, value: Value) -> Option<Vec<T>> {
    match serde_json::from_value(value) {
        Ok(list) => Some(list),
        Err(e) => {
            warn!(key = %key, error = %e, "ignoring malformed local record");
            None
        }
    }
}
