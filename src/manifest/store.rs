//! Persisted previous manifest
//!
//! A single-slot, overwrite-only snapshot of the last collected manifest.
//! It is the only state shared between independent invocations (a watcher
//! and its reloaded child, or two consecutive `isle dev` runs). Parsing is
//! defensive: anything unreadable is treated as "no previous manifest".

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::Manifest;
use crate::config::{ProjectPaths, StateBackend};

/// Format version of the persisted record
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Environment variable used by [`EnvManifestStore`]
pub const PREVIOUS_MANIFEST_ENV: &str = "ISLE_DEV_PREVIOUS_MANIFEST";

/// On-disk (or in-env) representation of the snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedManifest {
    pub version: u32,
    pub routes: Vec<String>,
    pub islands: Vec<String>,
}

impl From<&Manifest> for PersistedManifest {
    fn from(manifest: &Manifest) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            routes: manifest.routes.clone(),
            islands: manifest.islands.clone(),
        }
    }
}

/// Encode a manifest as a persisted record
pub fn encode(manifest: &Manifest) -> Result<String> {
    serde_json::to_string(&PersistedManifest::from(manifest))
        .context("Failed to serialize manifest state")
}

/// Decode a persisted record. Malformed content and unknown versions are
/// cache misses, reported as `None`.
pub fn decode(raw: &str) -> Option<Manifest> {
    let persisted: PersistedManifest = match serde_json::from_str(raw) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Ignoring corrupt manifest state: {}", e);
            return None;
        }
    };
    if persisted.version != STATE_FORMAT_VERSION {
        tracing::warn!(
            "Ignoring manifest state with format version {} (expected {})",
            persisted.version,
            STATE_FORMAT_VERSION
        );
        return None;
    }
    Some(Manifest::new(persisted.routes, persisted.islands))
}

/// Single-slot store for the previously seen manifest
pub trait ManifestStore: Send + Sync {
    /// The persisted manifest, or the empty manifest if there is none
    fn load(&self) -> Manifest;

    /// Replace the snapshot unconditionally
    fn save(&self, manifest: &Manifest) -> Result<()>;
}

/// Snapshot kept in a JSON file under the project's `.isle` directory
pub struct FileManifestStore {
    path: PathBuf,
}

impl FileManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the snapshot so the next load is a miss
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("Failed to remove manifest state"),
        }
    }
}

impl ManifestStore for FileManifestStore {
    fn load(&self) -> Manifest {
        match fs::read_to_string(&self.path) {
            Ok(raw) => decode(&raw).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
            Err(e) => {
                tracing::warn!("Could not read {}: {}", self.path.display(), e);
                Manifest::default()
            }
        }
    }

    fn save(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let json = encode(manifest)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).context("Failed to write manifest state")?;
        fs::rename(&tmp, &self.path).context("Failed to replace manifest state")?;
        Ok(())
    }
}

/// Snapshot kept in a process environment variable. Child processes
/// spawned after `save` inherit it, which is how a watcher hands the
/// manifest to the process it restarts. Only useful when embedding; the
/// isle CLI never spawns such a child.
pub struct EnvManifestStore {
    key: String,
}

impl EnvManifestStore {
    pub fn new() -> Self {
        Self::with_key(PREVIOUS_MANIFEST_ENV)
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for EnvManifestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestStore for EnvManifestStore {
    fn load(&self) -> Manifest {
        match std::env::var(&self.key) {
            Ok(raw) if !raw.is_empty() => decode(&raw).unwrap_or_default(),
            _ => Manifest::default(),
        }
    }

    fn save(&self, manifest: &Manifest) -> Result<()> {
        std::env::set_var(&self.key, encode(manifest)?);
        Ok(())
    }
}

/// In-process store, for embedding and tests
#[derive(Default)]
pub struct MemoryManifestStore {
    slot: Mutex<Option<String>>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the slot with raw content, as if written by another process
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ManifestStore for MemoryManifestStore {
    fn load(&self) -> Manifest {
        self.raw()
            .and_then(|raw| decode(&raw))
            .unwrap_or_default()
    }

    fn save(&self, manifest: &Manifest) -> Result<()> {
        let raw = encode(manifest)?;
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw);
        Ok(())
    }
}

/// Build the store selected by `backend`
pub fn open_store(backend: StateBackend, paths: &ProjectPaths) -> Box<dyn ManifestStore> {
    match backend {
        StateBackend::File => Box::new(FileManifestStore::new(&paths.state_file)),
        StateBackend::Env => Box::new(EnvManifestStore::new()),
    }
}
