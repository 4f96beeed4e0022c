//! JSON persistence for workspace definitions.
//!
//! All workspaces live in one file shaped `{ "workspaces": [ ... ] }`. Saving rewrites
//! the file through a temporary sibling and a rename so a crash never leaves it
//! half-written.

use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while reading or writing workspaces.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Workspace '{0}' not found")]
    NotFound(String),

    #[error("Failed to access workspaces file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse workspaces file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize workspaces: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Load/save interface the launch engine consumes.
pub trait WorkspaceStore: Send + Sync {
    fn load_workspace(&self, id: &str) -> Result<Workspace, StoreError>;
    fn save_workspace(&self, workspace: &Workspace) -> Result<(), StoreError>;
}

/// On-disk document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspacesFile {
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
}

impl WorkspacesFile {
    /// Read a workspaces file.
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write a workspaces file, replacing any previous content.
    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(StoreError::Serialize)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        debug!("Wrote {} workspace(s) to {:?}", self.workspaces.len(), path);
        Ok(())
    }
}

/// Workspace store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonWorkspaceStore {
    path: PathBuf,
}

impl JsonWorkspaceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkspaceStore for JsonWorkspaceStore {
    fn load_workspace(&self, id: &str) -> Result<Workspace, StoreError> {
        let file = match WorkspacesFile::read(&self.path) {
            Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            other => other?,
        };
        file.workspaces
            .into_iter()
            .find(|w| w.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let mut file = match WorkspacesFile::read(&self.path) {
            Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                WorkspacesFile::default()
            }
            other => other?,
        };
        match file.workspaces.iter_mut().find(|w| w.id == workspace.id) {
            Some(existing) => *existing = workspace.clone(),
            None => file.workspaces.push(workspace.clone()),
        }
        file.write(&self.path)?;
        info!("Saved workspace '{}' to {:?}", workspace.name, self.path);
        Ok(())
    }
}
