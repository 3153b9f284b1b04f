use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-generated tab identifier. Globally unique; doubles as the id of
/// the terminal stream carried for the tab on the shared channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TabId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TabId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque server-owned session identifier. Clients never mint these.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Pane identifiers come from a fixed namespace: the split family
/// (primary/secondary) or a grid column. Moves across families are no-ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneId {
    Primary,
    Secondary,
    Cell(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaneFamily {
    Split,
    Grid,
}

impl PaneId {
    pub fn family(self) -> PaneFamily {
        match self {
            PaneId::Primary | PaneId::Secondary => PaneFamily::Split,
            PaneId::Cell(_) => PaneFamily::Grid,
        }
    }
}

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaneId::Primary => f.write_str("primary"),
            PaneId::Secondary => f.write_str("secondary"),
            PaneId::Cell(index) => write!(f, "cell-{index}"),
        }
    }
}

/// A tab as this client knows it. The session binding is nullable until the
/// first attach confirmation lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tab {
    pub id: TabId,
    pub name: String,
    pub session_id: Option<SessionId>,
}

impl Tab {
    pub fn new(id: TabId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            session_id: None,
        }
    }
}

/// One entry of the server-held canonical tab list. Panes are a local
/// layout decision; the canonical record has no notion of them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalTab {
    pub id: TabId,
    pub name: String,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Full canonical snapshot broadcast by the server, with its revision
/// marker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabsSnapshot {
    #[serde(default)]
    pub tabs: Vec<CanonicalTab>,
    #[serde(default)]
    pub last_modified: u64,
}
