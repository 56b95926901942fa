//! Key-value settings store with subscribe/notify semantics.
//!
//! The controller only ever talks to [`SettingsPort`]; the two shipped
//! implementations are an in-memory store (tests, harnesses) and a TOML file
//! store that picks up external edits through a filesystem watcher.
//!
//! Subscriptions are owned values: dropping a [`SettingsSubscription`]
//! unregisters it. There is no ad-hoc connect/disconnect bookkeeping to leak
//! on an early-return path.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use notify::RecursiveMode;
use notify::Watcher;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Settings keys used by the sync service.
pub mod keys {
    /// External preference driving theme selection (read + subscribe).
    pub const ACCENT_COLOR: &str = "accent-color";
    /// Applied icon theme (write-only from this crate's perspective).
    pub const ICON_THEME: &str = "icon-theme";
    /// Locally cached version of the installed theme package.
    pub const CURRENT_VERSION: &str = "current-version";
    /// Boolean flag gating release notifications.
    pub const NOTIFY_ABOUT_RELEASES: &str = "notify-about-releases";
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to persist settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed settings store: {0}")]
    Malformed(String),
    #[error("failed to watch settings file: {0}")]
    Watch(String),
}

/// Locks a mutex, tolerating poisoning: settings state stays usable even if
/// a panicking thread held the lock.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Abstraction over a persistent key-value store with change notifications.
pub trait SettingsPort: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;

    /// Registers interest in a key. Each change delivers the new value to the
    /// returned subscription; dropping the subscription unregisters it.
    fn subscribe(&self, key: &str) -> SettingsSubscription;

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(value) => matches!(value.trim(), "true" | "1" | "yes"),
            None => default,
        }
    }
}

/// Registry of live subscriptions, shared by a store and its subscriptions.
#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    senders: Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>>,
}

impl Subscribers {
    fn add(self: &Arc<Self>, key: &str) -> SettingsSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.senders)
            .entry(key.to_string())
            .or_default()
            .push((id, tx));
        SettingsSubscription {
            key: key.to_string(),
            id,
            rx,
            registry: Arc::clone(self),
        }
    }

    fn remove(&self, key: &str, id: u64) {
        let mut senders = lock(&self.senders);
        if let Some(entries) = senders.get_mut(key) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                senders.remove(key);
            }
        }
    }

    fn publish(&self, key: &str, value: &str) {
        let senders = lock(&self.senders);
        if let Some(entries) = senders.get(key) {
            for (_, tx) in entries {
                // A closed receiver just means the subscription is mid-drop.
                let _ = tx.send(value.to_string());
            }
        }
    }
}

/// Owned handle to a settings subscription. Dropping it unsubscribes.
pub struct SettingsSubscription {
    key: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<String>,
    registry: Arc<Subscribers>,
}

impl SettingsSubscription {
    /// Waits for the next change to the subscribed key and returns the new
    /// value. Returns `None` once the store side has gone away.
    pub async fn changed(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SettingsSubscription {
    fn drop(&mut self) {
        self.registry.remove(&self.key, self.id);
    }
}

impl std::fmt::Debug for SettingsSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsSubscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// In-memory settings store for tests and embedding.
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
    subscribers: Arc<Subscribers>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = lock(&store.values);
            for (key, value) in values {
                map.insert(key.into(), value.into());
            }
        }
        store
    }
}

impl SettingsPort for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        {
            let mut values = lock(&self.values);
            if values.get(key).map(String::as_str) == Some(value) {
                return Ok(());
            }
            values.insert(key.to_string(), value.to_string());
        }
        self.subscribers.publish(key, value);
        Ok(())
    }

    fn subscribe(&self, key: &str) -> SettingsSubscription {
        self.subscribers.add(key)
    }
}

impl std::fmt::Debug for MemorySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySettings").finish_non_exhaustive()
    }
}

struct FileState {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
    subscribers: Arc<Subscribers>,
}

impl FileState {
    /// Re-reads the backing file and fans out one event per changed key.
    /// Keys removed from the file are published as empty values.
    fn reload(&self) {
        let fresh = match read_settings_file(&self.path) {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!("ignoring unreadable settings file {}: {err}", self.path.display());
                return;
            }
        };
        let mut changed: Vec<(String, String)> = Vec::new();
        {
            let mut values = lock(&self.values);
            for (key, value) in &fresh {
                if values.get(key) != Some(value) {
                    changed.push((key.clone(), value.clone()));
                }
            }
            for key in values.keys() {
                if !fresh.contains_key(key) {
                    changed.push((key.clone(), String::new()));
                }
            }
            *values = fresh;
        }
        for (key, value) in changed {
            self.subscribers.publish(&key, &value);
        }
    }
}

/// TOML-file-backed settings store.
///
/// External edits to the file are observed through a filesystem watcher and
/// delivered to subscribers; our own writes update the in-memory view first
/// so the watcher's reload sees no diff and emits no duplicate events.
pub struct FileSettings {
    state: Arc<FileState>,
    // Keeps the watcher thread alive for the lifetime of the store.
    _watcher: notify::RecommendedWatcher,
}

impl FileSettings {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| SettingsError::Malformed("settings path has no parent".to_string()))?;
        std::fs::create_dir_all(&parent)?;

        let values = if path.exists() {
            read_settings_file(&path)?
        } else {
            HashMap::new()
        };
        let state = Arc::new(FileState {
            path: path.clone(),
            values: Mutex::new(values),
            subscribers: Arc::new(Subscribers::default()),
        });

        let watch_state = Arc::clone(&state);
        let watched = path.clone();
        let mut watcher = notify::recommended_watcher(
            move |event: Result<notify::Event, notify::Error>| match event {
                Ok(event) => {
                    let touches_file = event.paths.is_empty()
                        || event.paths.iter().any(|p| p == &watched);
                    if touches_file && !event.kind.is_access() {
                        watch_state.reload();
                    }
                }
                Err(err) => warn!("settings watcher error: {err}"),
            },
        )
        .map_err(|err| SettingsError::Watch(err.to_string()))?;
        // Watch the directory, not the file: editors replace files by rename.
        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|err| SettingsError::Watch(err.to_string()))?;

        Ok(Self {
            state,
            _watcher: watcher,
        })
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<(), SettingsError> {
        let mut table = toml::Table::new();
        let mut keys: Vec<&String> = values.keys().collect();
        keys.sort();
        for key in keys {
            table.insert(key.clone(), toml::Value::String(values[key].clone()));
        }
        let rendered = toml::to_string_pretty(&table)
            .map_err(|err| SettingsError::Malformed(err.to_string()))?;
        let tmp = self.state.path.with_extension("toml.tmp");
        std::fs::write(&tmp, rendered)?;
        std::fs::rename(&tmp, &self.state.path)?;
        Ok(())
    }
}

impl SettingsPort for FileSettings {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.state.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let snapshot = {
            let mut values = lock(&self.state.values);
            if values.get(key).map(String::as_str) == Some(value) {
                return Ok(());
            }
            values.insert(key.to_string(), value.to_string());
            values.clone()
        };
        self.persist(&snapshot)?;
        self.state.subscribers.publish(key, value);
        Ok(())
    }

    fn subscribe(&self, key: &str) -> SettingsSubscription {
        self.state.subscribers.add(key)
    }
}

impl std::fmt::Debug for FileSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSettings")
            .field("path", &self.state.path)
            .finish_non_exhaustive()
    }
}

fn read_settings_file(path: &Path) -> Result<HashMap<String, String>, SettingsError> {
    let contents = std::fs::read_to_string(path)?;
    let table: toml::Table = contents
        .parse()
        .map_err(|err: toml::de::Error| SettingsError::Malformed(err.to_string()))?;
    let mut values = HashMap::with_capacity(table.len());
    for (key, value) in table {
        let rendered = match value {
            toml::Value::String(s) => s,
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            other => {
                return Err(SettingsError::Malformed(format!(
                    "unsupported value for key `{key}`: {other}"
                )));
            }
        };
        values.insert(key, rendered);
    }
    Ok(values)
}
