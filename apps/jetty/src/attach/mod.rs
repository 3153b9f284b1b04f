//! Per-tab attachment lifecycle.
//!
//! An attachment binds one tab to a live remote session. Every attach
//! attempt carries a generation; confirmations for any other generation
//! are dropped, which defeats duplicate re-entrant initialization and
//! keeps a superseded attempt from tearing down its successor. The
//! registry that tracks pending/active terminals is an explicit object
//! injected per client instance, never process-wide state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::model::{SessionId, TabId};
use crate::protocol::ClientFrame;

/// Minimum session age before a teardown is allowed to destroy it.
/// Debounces transient detach/reattach cycles.
pub const MIN_SESSION_DWELL: Duration = Duration::from_secs(2);

pub type Generation = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachState {
    Unattached,
    Attaching,
    Attached,
    Reattaching,
    Detached,
}

/// What teardown decided to do with the remote session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TeardownAction {
    DestroyRemote(SessionId),
    DetachOnly,
}

#[derive(Default)]
struct RegistryInner {
    pending: HashSet<TabId>,
    active: HashSet<TabId>,
    generations: HashMap<TabId, Generation>,
}

/// Tracks which terminals have an attach in flight or live, and the
/// current generation per terminal. Scoped to one client instance.
#[derive(Default)]
pub struct AttachmentRegistry {
    inner: Mutex<RegistryInner>,
}

impl AttachmentRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn begin(&self, id: &TabId) -> Generation {
        let mut inner = self.inner.lock();
        let generation = inner
            .generations
            .entry(id.clone())
            .and_modify(|g| *g += 1)
            .or_insert(1);
        let generation = *generation;
        inner.pending.insert(id.clone());
        generation
    }

    fn confirm(&self, id: &TabId, generation: Generation) -> bool {
        let mut inner = self.inner.lock();
        if inner.generations.get(id) != Some(&generation) {
            return false;
        }
        inner.pending.remove(id);
        inner.active.insert(id.clone());
        true
    }

    fn end(&self, id: &TabId) {
        let mut inner = self.inner.lock();
        inner.pending.remove(id);
        inner.active.remove(id);
        inner.generations.remove(id);
    }

    pub fn is_active(&self, id: &TabId) -> bool {
        self.inner.lock().active.contains(id)
    }

    pub fn is_pending(&self, id: &TabId) -> bool {
        self.inner.lock().pending.contains(id)
    }
}

pub struct Attachment {
    tab_id: TabId,
    state: AttachState,
    generation: Generation,
    session_id: Option<SessionId>,
    created_session: bool,
    created_at: Option<Instant>,
    cols: u16,
    rows: u16,
    registry: Arc<AttachmentRegistry>,
    setups: u32,
    teardowns: u32,
}

impl Attachment {
    pub fn new(
        tab_id: TabId,
        registry: Arc<AttachmentRegistry>,
        known_session: Option<SessionId>,
        cols: u16,
        rows: u16,
    ) -> Self {
        Self {
            tab_id,
            state: AttachState::Unattached,
            generation: 0,
            session_id: known_session,
            created_session: false,
            created_at: None,
            cols,
            rows,
            registry,
            setups: 0,
            teardowns: 0,
        }
    }

    pub fn state(&self) -> AttachState {
        self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn setups(&self) -> u32 {
        self.setups
    }

    pub fn teardowns(&self) -> u32 {
        self.teardowns
    }

    pub fn set_geometry(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
    }

    /// Start the first attach. Carries the known session id, if any, so
    /// the registry can resume instead of creating.
    pub fn begin_attach(&mut self) -> Option<ClientFrame> {
        if !matches!(self.state, AttachState::Unattached | AttachState::Detached) {
            return None;
        }
        self.generation = self.registry.begin(&self.tab_id);
        self.state = AttachState::Attaching;
        debug!(
            target = "attach::machine",
            tab = %self.tab_id,
            generation = self.generation,
            resume = self.session_id.is_some(),
            "attaching"
        );
        Some(ClientFrame::TerminalCreate {
            terminal_id: self.tab_id.clone(),
            cols: self.cols,
            rows: self.rows,
            session_id: self.session_id.clone(),
        })
    }

    /// Handle a creation confirmation for the given generation. Returns
    /// the follow-up frames to send, or `None` when the confirmation is
    /// stale and must be dropped silently.
    pub fn confirm(
        &mut self,
        generation: Generation,
        session_id: SessionId,
        restored: bool,
        now: Instant,
    ) -> Option<Vec<ClientFrame>> {
        if generation != self.generation || !self.registry.confirm(&self.tab_id, generation) {
            trace!(
                target = "attach::machine",
                tab = %self.tab_id,
                stale = generation,
                current = self.generation,
                "dropping stale confirmation"
            );
            return None;
        }
        if !matches!(self.state, AttachState::Attaching | AttachState::Reattaching) {
            return None;
        }

        // The registry's answer is authoritative: adopt its id even over a
        // differing non-null local one, so stale bindings self-heal.
        let reattach = self.state == AttachState::Reattaching;
        self.session_id = Some(session_id.clone());
        self.created_session = !restored;
        self.created_at = (!restored).then_some(now);
        self.state = AttachState::Attached;
        self.setups += 1;
        debug!(
            target = "attach::machine",
            tab = %self.tab_id,
            session = %session_id,
            restored,
            reattach,
            "attached"
        );

        // History is pushed automatically on resume; request it anyway in
        // case that push was lost between create and confirm.
        Some(vec![
            ClientFrame::TabSetSession {
                tab_id: self.tab_id.clone(),
                session_id: session_id.clone(),
            },
            ClientFrame::TerminalRequestHistory {
                terminal_id: self.tab_id.clone(),
                session_id,
            },
        ])
    }

    /// The channel was re-established. The per-terminal stream died with
    /// the old channel, so re-issue create-or-resume carrying whatever
    /// session id we hold; the registry resumes it or substitutes a fresh
    /// session.
    pub fn reattach(&mut self) -> Option<ClientFrame> {
        match self.state {
            AttachState::Detached => None,
            AttachState::Unattached => self.begin_attach(),
            current => {
                self.generation = self.registry.begin(&self.tab_id);
                self.state = if current == AttachState::Attaching {
                    AttachState::Attaching
                } else {
                    AttachState::Reattaching
                };
                debug!(
                    target = "attach::machine",
                    tab = %self.tab_id,
                    generation = self.generation,
                    "reconnected, resuming"
                );
                Some(ClientFrame::TerminalCreate {
                    terminal_id: self.tab_id.clone(),
                    cols: self.cols,
                    rows: self.rows,
                    session_id: self.session_id.clone(),
                })
            }
        }
    }

    /// A canonical session-id change observed while attached triggers a
    /// reattach to the new session. A canonical `null` never reverts a
    /// live binding.
    pub fn observe_session_change(&mut self, session_id: Option<&SessionId>) -> Option<ClientFrame> {
        let Some(new_id) = session_id else {
            return None;
        };
        if self.state != AttachState::Attached || self.session_id.as_ref() == Some(new_id) {
            return None;
        }
        self.teardowns += 1;
        self.generation = self.registry.begin(&self.tab_id);
        self.state = AttachState::Reattaching;
        self.session_id = Some(new_id.clone());
        self.created_session = false;
        self.created_at = None;
        debug!(
            target = "attach::machine",
            tab = %self.tab_id,
            session = %new_id,
            generation = self.generation,
            "session changed, reattaching"
        );
        Some(ClientFrame::TerminalCreate {
            terminal_id: self.tab_id.clone(),
            cols: self.cols,
            rows: self.rows,
            session_id: Some(new_id.clone()),
        })
    }

    /// Tear down the local binding. Destroys the remote session only when
    /// this attachment created it and the session has outlived the dwell
    /// window; otherwise it stays alive for a future attachment.
    pub fn detach(&mut self, now: Instant) -> TeardownAction {
        let was_bound = matches!(
            self.state,
            AttachState::Attached | AttachState::Reattaching | AttachState::Attaching
        );
        self.state = AttachState::Detached;
        self.registry.end(&self.tab_id);
        if was_bound {
            self.teardowns += 1;
        }

        let dwelled = self
            .created_at
            .map(|at| now.duration_since(at) >= MIN_SESSION_DWELL)
            .unwrap_or(false);
        match (&self.session_id, self.created_session && dwelled) {
            (Some(session), true) => {
                debug!(target = "attach::machine", tab = %self.tab_id, session = %session, "destroying session");
                TeardownAction::DestroyRemote(session.clone())
            }
            _ => TeardownAction::DetachOnly,
        }
    }
}
