//! Image staleness manifest
//!
//! Maps an origin image's path (relative to the origin root, `/`-separated)
//! to the modification time it had when its derivatives were last produced:
//!
//! ```json
//! {
//!   "top/hero.png": {
//!     "mtimeMs": 1718000000000.0
//!   }
//! }
//! ```
//!
//! The manifest is an advisory cache. A missing or corrupt file loads as an
//! empty manifest, which only forces every image to be converted once.
//!
//! There is exactly one [`ManifestStore`] per process. Every mutation holds
//! its async mutex for the whole update-and-persist cycle, so concurrent
//! conversions of different images never drop each other's entries.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{KilnError, KilnResult};
use crate::paths::atomic_write;

/// Attempts for each manifest read or write
pub const MANIFEST_ATTEMPTS: u32 = 3;

/// Base delay between attempts; attempt `n` waits `n * MANIFEST_BACKOFF`
pub const MANIFEST_BACKOFF: Duration = Duration::from_millis(100);

/// Two mtimes closer than this (in ms) are the same
const MTIME_TOLERANCE_MS: f64 = 1e-3;

/// What the manifest remembers about one origin image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "mtimeMs")]
    pub mtime_ms: f64,
}

impl ManifestEntry {
    pub fn new(mtime_ms: f64) -> Self {
        Self { mtime_ms }
    }

    /// Entry describing a file's current state.
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self::new(mtime_ms(meta))
    }

    /// Whether both entries describe the same file state.
    pub fn matches(&self, other: &ManifestEntry) -> bool {
        (self.mtime_ms - other.mtime_ms).abs() < MTIME_TOLERANCE_MS
    }
}

/// Modification time in fractional milliseconds since the Unix epoch.
pub fn mtime_ms(meta: &Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

type Entries = BTreeMap<String, ManifestEntry>;

/// The single owned manifest instance
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl ManifestStore {
    /// Load the manifest at `path`.
    ///
    /// Never fails: unreadable or corrupt content is logged and replaced by an
    /// empty manifest.
    pub async fn load(path: &Path) -> Self {
        let entries = read_entries(path).await;
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    /// Empty manifest that will be written to `path` on first mutation.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(Entries::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, key: &str) -> Option<ManifestEntry> {
        self.entries.lock().await.get(key).copied()
    }

    /// Whether `key` is recorded with the same file state as `current`.
    pub async fn is_fresh(&self, key: &str, current: &ManifestEntry) -> bool {
        self.entries
            .lock()
            .await
            .get(key)
            .is_some_and(|entry| entry.matches(current))
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Record a successful conversion and persist.
    pub async fn record(&self, key: &str, entry: ManifestEntry) -> KilnResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), entry);
        persist(&self.path, &entries).await
    }

    /// Forget `key`; persists only if it was present.
    pub async fn remove(&self, key: &str) -> KilnResult<bool> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        persist(&self.path, &entries).await?;
        Ok(true)
    }

    /// Drop every entry for which `keep` is false. Returns the dropped keys.
    pub async fn retain<F>(&self, mut keep: F) -> KilnResult<Vec<String>>
    where
        F: FnMut(&str) -> bool,
    {
        let mut entries = self.entries.lock().await;
        let dropped: Vec<String> = entries
            .keys()
            .filter(|key| !keep(key.as_str()))
            .cloned()
            .collect();
        if dropped.is_empty() {
            return Ok(dropped);
        }
        for key in &dropped {
            entries.remove(key);
        }
        persist(&self.path, &entries).await?;
        Ok(dropped)
    }

    /// Replace every entry and persist.
    pub async fn replace_all(&self, new_entries: BTreeMap<String, ManifestEntry>) -> KilnResult<()> {
        let mut entries = self.entries.lock().await;
        *entries = new_entries;
        persist(&self.path, &entries).await
    }
}

async fn read_entries(path: &Path) -> Entries {
    let mut last_error = None;

    for attempt in 1..=MANIFEST_ATTEMPTS {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                return match serde_json::from_str::<Entries>(&content) {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "manifest is corrupt, starting empty"
                        );
                        Entries::new()
                    }
                };
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Entries::new(),
            Err(e) => {
                last_error = Some(e);
                if attempt < MANIFEST_ATTEMPTS {
                    tokio::time::sleep(MANIFEST_BACKOFF * attempt).await;
                }
            }
        }
    }

    if let Some(e) = last_error {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "manifest is unreadable, starting empty"
        );
    }
    Entries::new()
}

async fn persist(path: &Path, entries: &Entries) -> KilnResult<()> {
    let mut content = serde_json::to_string_pretty(entries)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    content.push('\n');
    let content: Arc<[u8]> = content.into_bytes().into();

    let mut last_error = String::new();
    for attempt in 1..=MANIFEST_ATTEMPTS {
        match write_blocking(path, Arc::clone(&content)).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    attempt,
                    error = %e,
                    "manifest write failed"
                );
                last_error = e.to_string();
                if attempt < MANIFEST_ATTEMPTS {
                    tokio::time::sleep(MANIFEST_BACKOFF * attempt).await;
                }
            }
        }
    }

    Err(KilnError::ManifestPersist {
        path: path.to_path_buf(),
        attempts: MANIFEST_ATTEMPTS,
        message: last_error,
    })
}

/// Atomic write on the blocking pool, off the runtime thread.
async fn write_blocking(path: &Path, content: Arc<[u8]>) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || atomic_write(&path, &content))
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e.to_string())))
}
