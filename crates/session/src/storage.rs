//! Persisted token storage.
//!
//! A [`TokenStorage`] is a small key/value area shared by every running
//! instance of the client (browser tabs, windows, or processes sharing a
//! profile directory). Writes made through one handle are announced to every
//! *other* handle as a [`StorageEvent`], which is how a login or logout in
//! one instance becomes visible to the rest.
//!
//! # Available Backends
//!
//! | Backend | Use Case | Persistence |
//! |---------|----------|-------------|
//! | [`MemoryTokenStorage`] | Testing, embedded hosts | No |
//! | [`FileTokenStorage`] | Desktop and CLI hosts | Yes |
//!
//! # Example
//!
//! ```
//! use dashboard_client_session::storage::{MemoryTokenStorage, TokenStorage};
//!
//! let tab_a = MemoryTokenStorage::new();
//! let tab_b = tab_a.handle();
//!
//! tab_a.set("__auth_token", "abc").unwrap();
//! assert_eq!(tab_b.get("__auth_token").unwrap().as_deref(), Some("abc"));
//! ```

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::{StorageError, StorageResult};

/// Capacity of the per-area event channel. Slow subscribers that fall
/// further behind receive a full re-read signal instead.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notification that a key changed through another handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key that changed. `None` means "anything may have changed" and
    /// listeners should re-read every key they care about.
    pub key: Option<String>,
    /// Value after the change, `None` when the key was removed.
    pub new_value: Option<String>,
}

impl StorageEvent {
    /// Returns `true` if this event may affect `key`.
    #[must_use]
    pub fn concerns(&self, key: &str) -> bool {
        self.key.as_deref().is_none_or(|k| k == key)
    }
}

/// Key/value storage for the session token.
///
/// Operations are synchronous: the underlying medium is local and fast, and
/// callers rely on a completed `set` being visible to the next `get`.
pub trait TokenStorage: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be written.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Returns `true` if a value was present.
    ///
    /// Removing an absent key is not a write: no event is published.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be written.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Subscribes to changes made through other handles of the same area.
    fn subscribe(&self) -> StorageEvents;
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    event: StorageEvent,
}

/// Fan-out of storage events between the handles of one area.
///
/// Backends register one origin id per handle and publish every effective
/// write under it; subscribers never see events from their own origin.
/// Custom [`TokenStorage`] implementations can embed a bus to get the same
/// behaviour as the built-in backends.
#[derive(Debug)]
pub struct StorageEventBus {
    sender: broadcast::Sender<Envelope>,
    next_handle: AtomicU64,
    writes: AtomicU64,
}

impl Default for StorageEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEventBus {
    /// Creates a bus with no handles.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender, next_handle: AtomicU64::new(0), writes: AtomicU64::new(0) }
    }

    /// Allocates the origin id for a new handle.
    pub fn register(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of writes published so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Announces a write made through handle `origin`.
    pub fn publish(&self, origin: u64, key: &str, new_value: Option<&str>) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let event =
            StorageEvent { key: Some(key.to_owned()), new_value: new_value.map(str::to_owned) };
        // No subscribers is not an error.
        let _ = self.sender.send(Envelope { origin, event });
    }

    /// Subscribes handle `origin` to writes from every other handle.
    #[must_use]
    pub fn subscribe(&self, origin: u64) -> StorageEvents {
        StorageEvents { receiver: self.sender.subscribe(), origin }
    }
}

/// Stream of [`StorageEvent`]s published by other handles.
#[derive(Debug)]
pub struct StorageEvents {
    receiver: broadcast::Receiver<Envelope>,
    origin: u64,
}

impl StorageEvents {
    /// Waits for the next change made through another handle.
    ///
    /// Returns `None` once every handle of the area has been dropped. If
    /// this subscriber fell behind and events were lost, a wildcard event
    /// (`key: None`) is returned so the caller re-reads its state.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.origin == self.origin => continue,
                Ok(envelope) => return Some(envelope.event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "storage event subscriber lagged; forcing re-read");
                    return Some(StorageEvent { key: None, new_value: None });
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ── Memory ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct MemoryArea {
    data: RwLock<HashMap<String, String>>,
    hub: StorageEventBus,
}

/// In-memory [`TokenStorage`] area.
///
/// Each value returned by [`new`](Self::new) is one area; [`handle`](Self::handle)
/// creates another view of the same area, the way a second browser tab sees
/// the same origin storage.
#[derive(Debug)]
pub struct MemoryTokenStorage {
    area: Arc<MemoryArea>,
    id: u64,
}

impl MemoryTokenStorage {
    /// Creates a new, empty storage area and returns its first handle.
    #[must_use]
    pub fn new() -> Self {
        let area =
            Arc::new(MemoryArea { data: RwLock::new(HashMap::new()), hub: StorageEventBus::new() });
        let id = area.hub.register();
        Self { area, id }
    }

    /// Creates another handle onto the same area.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self { area: Arc::clone(&self.area), id: self.area.hub.register() }
    }

    /// Number of writes (sets and effective removals) across all handles.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.area.hub.write_count()
    }
}

impl Default for MemoryTokenStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.area.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.area.data.write().insert(key.to_owned(), value.to_owned());
        self.area.hub.publish(self.id, key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let removed = self.area.data.write().remove(key).is_some();
        if removed {
            self.area.hub.publish(self.id, key, None);
        }
        Ok(removed)
    }

    fn subscribe(&self) -> StorageEvents {
        self.area.hub.subscribe(self.id)
    }
}

// ── File ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct FileArea {
    dir: PathBuf,
    hub: StorageEventBus,
}

/// File-backed [`TokenStorage`] area.
///
/// Each key is stored as one file inside the area directory. Writes go to a
/// temporary file first and are renamed into place, so readers never see a
/// partially written token. Events reach the handles created from the same
/// area in this process.
#[derive(Debug)]
pub struct FileTokenStorage {
    area: Arc<FileArea>,
    id: u64,
}

impl FileTokenStorage {
    /// Opens (creating if needed) a storage area rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StorageError::io(format!("failed to create storage directory {}", dir.display()), e)
        })?;
        let area = Arc::new(FileArea { dir, hub: StorageEventBus::new() });
        let id = area.hub.register();
        Ok(Self { area, id })
    }

    /// Creates another handle onto the same area.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self { area: Arc::clone(&self.area), id: self.area.hub.register() }
    }

    /// Directory holding the stored keys.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.area.dir
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::unavailable(format!("unsupported storage key '{key}'")));
        }
        Ok(self.area.dir.join(key))
    }
}

impl TokenStorage for FileTokenStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(format!("failed to read {}", path.display()), e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let tmp = self.area.dir.join(format!(".{key}.tmp"));
        std::fs::write(&tmp, value)
            .map_err(|e| StorageError::io(format!("failed to write {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| StorageError::io(format!("failed to replace {}", path.display()), e))?;
        self.area.hub.publish(self.id, key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                self.area.hub.publish(self.id, key, None);
                Ok(true)
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(format!("failed to remove {}", path.display()), e)),
        }
    }

    fn subscribe(&self) -> StorageEvents {
        self.area.hub.subscribe(self.id)
    }
}
