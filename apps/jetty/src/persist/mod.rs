//! Durable workspace state.
//!
//! Two things survive a reload: the pane/tab layout and a flat
//! tab-id→session-id map. Reconnection feeds the remembered session ids
//! into the attachment machines so tabs resume instead of recreating
//! sessions. Ephemeral UI state (preview overlays, drag state) is never
//! written. The document is overwrite-on-write JSON, tolerant of missing
//! and unknown fields; there is no schema migration.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::model::{PaneId, SessionId, Tab, TabId};
use crate::workspace::{Pane, TabStore};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("failed to write state file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TabDoc {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaneDoc {
    pub id: Option<PaneId>,
    pub tabs: Vec<TabDoc>,
    pub active: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceSnapshot {
    pub panes: Vec<PaneDoc>,
    /// Flat tab-id → session-id map.
    pub sessions: BTreeMap<String, String>,
}

impl WorkspaceSnapshot {
    pub fn capture(store: &TabStore) -> Self {
        let panes = store
            .panes()
            .iter()
            .map(|pane| PaneDoc {
                id: Some(pane.id),
                tabs: pane
                    .tabs
                    .iter()
                    .map(|tab| TabDoc {
                        id: tab.id.to_string(),
                        name: tab.name.clone(),
                    })
                    .collect(),
                active: pane.active.as_ref().map(|id| id.to_string()),
            })
            .collect();
        let sessions = store
            .panes()
            .iter()
            .flat_map(|pane| pane.tabs.iter())
            .filter_map(|tab| {
                tab.session_id
                    .as_ref()
                    .map(|session| (tab.id.to_string(), session.to_string()))
            })
            .collect();
        Self { panes, sessions }
    }

    /// Rebuild the store, folding the session map back into each tab.
    pub fn restore(&self) -> TabStore {
        let panes: Vec<Pane> = self
            .panes
            .iter()
            .filter_map(|doc| {
                let id = doc.id?;
                let tabs = doc
                    .tabs
                    .iter()
                    .map(|tab| {
                        let mut restored = Tab::new(TabId::from(tab.id.clone()), tab.name.clone());
                        restored.session_id = self
                            .sessions
                            .get(&tab.id)
                            .map(|s| SessionId::from(s.clone()));
                        restored
                    })
                    .collect();
                Some(Pane {
                    id,
                    tabs,
                    active: doc.active.clone().map(TabId::from),
                })
            })
            .collect();
        TabStore::from_panes(panes)
    }

    /// Remembered session binding for one tab, used as the resume id.
    pub fn session_for(&self, tab: &TabId) -> Option<SessionId> {
        self.sessions
            .get(tab.as_str())
            .map(|s| SessionId::from(s.clone()))
    }
}

pub trait LayoutStore: Send {
    fn load(&self) -> Result<Option<WorkspaceSnapshot>, PersistError>;
    fn save(&self, snapshot: &WorkspaceSnapshot) -> Result<(), PersistError>;
}

/// File-backed store. A missing or unreadable document rehydrates as an
/// empty workspace rather than failing startup.
pub struct JsonLayoutStore {
    path: PathBuf,
}

impl JsonLayoutStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl LayoutStore for JsonLayoutStore {
    fn load(&self) -> Result<Option<WorkspaceSnapshot>, PersistError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                warn!(target = "persist::store", path = ?self.path, error = %err, "state file unreadable");
                return Ok(None);
            }
        };
        match serde_json::from_str(&text) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                warn!(target = "persist::store", path = ?self.path, error = %err, "state file corrupt, starting fresh");
                Ok(None)
            }
        }
    }

    fn save(&self, snapshot: &WorkspaceSnapshot) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PersistError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        let text = serde_json::to_string_pretty(snapshot)?;
        fs::write(&self.path, text).map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory store for tests and ephemeral embedders.
#[derive(Default)]
pub struct MemoryLayoutStore {
    inner: parking_lot::Mutex<Option<WorkspaceSnapshot>>,
}

impl MemoryLayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LayoutStore for MemoryLayoutStore {
    fn load(&self) -> Result<Option<WorkspaceSnapshot>, PersistError> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, snapshot: &WorkspaceSnapshot) -> Result<(), PersistError> {
        *self.inner.lock() = Some(snapshot.clone());
        Ok(())
    }
}

/// Default state file location.
pub fn default_state_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "jetty")
        .map(|dirs| dirs.data_dir().join("workspace.json"))
        .unwrap_or_else(|| PathBuf::from(".jetty-workspace.json"))
}
