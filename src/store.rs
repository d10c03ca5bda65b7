//! Expiring key-value store used for the token cache, the sync cursor and
//! the processed-event records.
//!
//! The [`Store`] trait abstracts the backing store so the client and the
//! sync loop can be tested with mocks. Two implementations are provided:
//! an in-memory store and a JSON-file-backed store that survives restarts.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::error;
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

/// Key-value store with optional per-entry time-to-live.
///
/// Expired entries behave exactly like absent ones: [`Store::get`] returns
/// `None` for them and they may be reaped at any time.
#[automock]
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the value for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Option<String>;
    /// Stores `value` under `key`. A `None` TTL means the entry never expires.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>);
    /// Removes the entry for `key` if present.
    async fn forget(&self, key: &str);
}

/// A stored value with an optional absolute expiry in unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| now_secs() + ttl.as_secs()),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// In-memory [`Store`] implementation.
///
/// Entries live only as long as the process. Used in tests and usable as a
/// backing store when persistence across restarts is not needed.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if entry.is_expired(now_secs()) {
            return None;
        }
        Some(entry.value.clone())
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry::new(value, ttl));
    }

    async fn forget(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

/// File-backed [`Store`] implementation.
///
/// The whole map is serialized to a single JSON file. Loading tolerates a
/// missing or corrupted file by starting empty, so the bot can always come
/// up. Expired entries are dropped on every write.
///
/// # Examples
///
/// ```no_run
/// use tekir::store::{FileStore, Store};
///
/// # async fn example() {
/// let store = FileStore::new("./data/store");
/// store.put("matrix_sync_since", "s72594_4483", None).await;
/// # }
/// ```
pub struct FileStore {
    /// Path to the JSON file where entries are stored.
    path: String,
}

impl FileStore {
    pub fn new(path: impl Into<String>) -> Self {
        FileStore { path: path.into() }
    }

    async fn load(&self) -> HashMap<String, Entry> {
        let Ok(serialized) = fs::read_to_string(&self.path).await else {
            return HashMap::new();
        };

        match serde_json::from_str(&serialized) {
            Ok(entries) => entries,
            Err(e) => {
                error!("failed to deserialize store file, starting empty: {e}");
                HashMap::new()
            }
        }
    }

    async fn save(&self, entries: &HashMap<String, Entry>) {
        let serialized = match serde_json::to_string(entries) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!("failed to serialize store entries: {e}");
                return;
            }
        };

        if let Err(e) = fs::write(&self.path, &serialized).await {
            error!("failed to persist store file: {e}");
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.load().await;
        let entry = entries.get(key)?;
        if entry.is_expired(now_secs()) {
            return None;
        }
        Some(entry.value.clone())
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut entries = self.load().await;
        let now = now_secs();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(key.to_string(), Entry::new(value, ttl));
        self.save(&entries).await;
    }

    async fn forget(&self, key: &str) {
        let mut entries = self.load().await;
        if entries.remove(key).is_some() {
            self.save(&entries).await;
        }
    }
}
