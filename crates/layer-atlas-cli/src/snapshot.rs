//! JSON file persistence for the in-memory store
//!
//! The whole store is written as one [`StoreSnapshot`] document. The file
//! lives in a per-user configuration directory unless a path is given:
//!
//! - On Windows: %APPDATA%/LayerAtlas/store.json
//! - Else: $HOME/.config/layer-atlas/store.json

use layer_atlas_lib::{MemoryStore, StoreError, StoreSnapshot};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse snapshot {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Location of a store snapshot on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Use `path`, or the per-user default when absent
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(Self::default_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn default_path() -> PathBuf {
        if cfg!(windows) {
            if let Ok(appdata) = std::env::var("APPDATA") {
                return Path::new(&appdata).join("LayerAtlas").join("store.json");
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home)
                .join(".config")
                .join("layer-atlas")
                .join("store.json");
        }

        // Fallback to current directory
        Path::new(".").join("layer-atlas-store.json")
    }

    /// Read the store; a missing or blank file yields an empty store
    pub fn load(&self) -> SnapshotResult<MemoryStore> {
        if !self.path.exists() {
            tracing::debug!("No snapshot at {}, starting empty", self.path.display());
            return Ok(MemoryStore::new());
        }

        let text = fs::read_to_string(&self.path).map_err(|source| SnapshotError::Io {
            path: self.path.clone(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(MemoryStore::new());
        }

        let snapshot: StoreSnapshot =
            serde_json::from_str(&text).map_err(|source| SnapshotError::Parse {
                path: self.path.clone(),
                source,
            })?;
        tracing::debug!(
            "Loaded snapshot {} ({} layers, {} features)",
            self.path.display(),
            snapshot.layers.len(),
            snapshot.features.len()
        );
        Ok(MemoryStore::from_snapshot(snapshot))
    }

    /// Write the store, creating parent directories as needed
    pub fn save(&self, store: &MemoryStore) -> SnapshotResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SnapshotError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let snapshot = store.to_snapshot()?;
        let text = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&self.path, text).map_err(|source| SnapshotError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!("Saved snapshot {}", self.path.display());
        Ok(())
    }
}
