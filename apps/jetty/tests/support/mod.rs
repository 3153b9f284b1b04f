//! In-memory registry emulation for end-to-end tests.
//!
//! Speaks the wire protocol over the in-memory transport pair: holds the
//! canonical tab list, mints sessions, resumes or substitutes on
//! `terminal:create`, and re-broadcasts mutations to every connected
//! client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use jetty::client::WorkspaceClient;
use jetty::model::{CanonicalTab, SessionId, TabId, TabsSnapshot};
use jetty::persist::{LayoutStore, PersistError, WorkspaceSnapshot};
use jetty::protocol::{self, ClientFrame, ServerFrame};
use jetty::transport::mock::{self, PairedTransport};
use jetty::transport::{EventReceiver, Transport, TransportEvent};

pub struct SessionState {
    pub cols: u16,
    pub rows: u16,
    pub history: Vec<u8>,
}

struct RegistryEnd {
    transport: Arc<PairedTransport>,
    rx: EventReceiver,
}

#[derive(Default)]
pub struct Registry {
    tabs: Vec<CanonicalTab>,
    last_modified: u64,
    sessions: HashMap<SessionId, SessionState>,
    next_session: u32,
    ends: Vec<RegistryEnd>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new client; returns its end of the channel.
    pub fn connect(&mut self) -> (Arc<PairedTransport>, EventReceiver) {
        let ((client_end, client_rx), (server_end, server_rx)) = mock::pair();
        self.ends.push(RegistryEnd {
            transport: server_end,
            rx: server_rx,
        });
        (client_end, client_rx)
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        self.tabs.iter().map(|t| t.id.clone()).collect()
    }

    pub fn session_of(&self, tab: &TabId) -> Option<SessionId> {
        self.tabs
            .iter()
            .find(|t| &t.id == tab)
            .and_then(|t| t.session_id.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn drop_session(&mut self, session: &SessionId) {
        self.sessions.remove(session);
    }

    pub fn geometry_of(&self, tab: &TabId) -> Option<(u16, u16)> {
        let session = self.session_of(tab)?;
        self.sessions.get(&session).map(|s| (s.cols, s.rows))
    }

    pub fn mint_session(&mut self, id: &str, cols: u16, rows: u16) -> SessionId {
        let session = SessionId::from(id);
        self.sessions.insert(
            session.clone(),
            SessionState {
                cols,
                rows,
                history: Vec::new(),
            },
        );
        session
    }

    /// Server-side migration of a tab to another session, re-broadcast as
    /// `tab:session-updated`.
    pub fn set_tab_session(&mut self, tab: &TabId, session: SessionId) {
        if let Some(entry) = self.tabs.iter_mut().find(|t| &t.id == tab) {
            entry.session_id = Some(session.clone());
            self.last_modified += 1;
            self.broadcast(ServerFrame::TabSessionUpdated {
                tab_id: tab.clone(),
                session_id: Some(session),
            });
        }
    }

    /// Authoritative dimension change for one terminal.
    pub fn force_dimensions(&mut self, tab: &TabId, cols: u16, rows: u16) {
        if let Some(session) = self.session_of(tab) {
            if let Some(state) = self.sessions.get_mut(&session) {
                state.cols = cols;
                state.rows = rows;
            }
        }
        self.broadcast(ServerFrame::TerminalDimensions {
            terminal_id: tab.clone(),
            cols,
            rows,
        });
    }

    /// Push raw output for one terminal to every client.
    pub fn push_output(&mut self, tab: &TabId, data: &[u8]) {
        if let Some(session) = self.session_of(tab) {
            if let Some(state) = self.sessions.get_mut(&session) {
                state.history.extend_from_slice(data);
            }
        }
        self.broadcast(ServerFrame::TerminalOutput {
            terminal_id: tab.clone(),
            data: protocol::encode_data(data),
        });
    }

    pub fn broadcast_sync(&mut self) {
        self.broadcast(ServerFrame::TabsSync {
            snapshot: self.snapshot(),
        });
    }

    fn snapshot(&self) -> TabsSnapshot {
        TabsSnapshot {
            tabs: self.tabs.clone(),
            last_modified: self.last_modified,
        }
    }

    fn broadcast(&self, frame: ServerFrame) {
        let text = protocol::encode_server_frame(&frame).expect("encode server frame");
        for end in &self.ends {
            let _ = end.transport.send_text(text.clone());
        }
    }

    fn reply(&self, index: usize, frame: ServerFrame) {
        let text = protocol::encode_server_frame(&frame).expect("encode server frame");
        let _ = self.ends[index].transport.send_text(text);
    }

    /// Drain and handle everything clients have sent. Returns the number
    /// of frames processed.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        loop {
            let mut batch = Vec::new();
            for (index, end) in self.ends.iter_mut().enumerate() {
                while let Ok(event) = end.rx.try_recv() {
                    if let TransportEvent::Text(text) = event {
                        batch.push((index, text));
                    }
                }
            }
            if batch.is_empty() {
                break;
            }
            for (index, text) in batch {
                let frame = protocol::decode_client_frame(&text).expect("decode client frame");
                self.handle(index, frame);
                processed += 1;
            }
        }
        processed
    }

    fn handle(&mut self, index: usize, frame: ClientFrame) {
        match frame {
            ClientFrame::TabsRequest => {
                self.reply(
                    index,
                    ServerFrame::TabsSync {
                        snapshot: self.snapshot(),
                    },
                );
            }
            ClientFrame::TabCreate { id, name } => {
                if !self.tabs.iter().any(|t| t.id == id) {
                    self.tabs.push(CanonicalTab {
                        id,
                        name,
                        session_id: None,
                    });
                    self.last_modified += 1;
                }
                self.broadcast_sync();
            }
            ClientFrame::TabClose { tab_id } => {
                self.tabs.retain(|t| t.id != tab_id);
                self.last_modified += 1;
                self.broadcast_sync();
            }
            ClientFrame::TabRename { tab_id, new_name } => {
                if let Some(tab) = self.tabs.iter_mut().find(|t| t.id == tab_id) {
                    tab.name = new_name;
                    self.last_modified += 1;
                }
                self.broadcast_sync();
            }
            ClientFrame::TabSetSession { tab_id, session_id } => {
                if let Some(tab) = self.tabs.iter_mut().find(|t| t.id == tab_id) {
                    if tab.session_id.as_ref() != Some(&session_id) {
                        tab.session_id = Some(session_id.clone());
                        self.last_modified += 1;
                        self.broadcast(ServerFrame::TabSessionUpdated {
                            tab_id,
                            session_id: Some(session_id),
                        });
                    }
                }
            }
            ClientFrame::TerminalCreate {
                terminal_id,
                cols,
                rows,
                session_id,
            } => {
                // Resume when the id is known; degrade to a fresh session
                // otherwise. The confirmation always carries the real id.
                let (session, restored) = match session_id {
                    Some(id) if self.sessions.contains_key(&id) => (id, true),
                    _ => {
                        self.next_session += 1;
                        let id = format!("session-{}", self.next_session);
                        (self.mint_session(&id, cols, rows), false)
                    }
                };
                self.reply(
                    index,
                    ServerFrame::TerminalCreated {
                        terminal_id,
                        session_id: session,
                        restored,
                    },
                );
            }
            ClientFrame::TerminalInput { terminal_id, data } => {
                let bytes = protocol::decode_data(&data).expect("decode input");
                if let Some(session) = self.session_of(&terminal_id) {
                    if let Some(state) = self.sessions.get_mut(&session) {
                        state.history.extend_from_slice(&bytes);
                    }
                }
            }
            ClientFrame::TerminalResize {
                terminal_id,
                cols,
                rows,
            } => {
                if let Some(session) = self.session_of(&terminal_id) {
                    if let Some(state) = self.sessions.get_mut(&session) {
                        state.cols = cols;
                        state.rows = rows;
                    }
                }
            }
            ClientFrame::TerminalRequestHistory {
                terminal_id,
                session_id,
            } => {
                let history = self
                    .sessions
                    .get(&session_id)
                    .map(|state| state.history.clone())
                    .unwrap_or_default();
                self.reply(
                    index,
                    ServerFrame::TerminalHistory {
                        terminal_id,
                        data: protocol::encode_data(&history),
                    },
                );
            }
            ClientFrame::TerminalDestroy { session_id, .. } => {
                self.sessions.remove(&session_id);
            }
        }
    }
}

/// Run registry and client message exchange until neither side has
/// anything left to say.
pub fn settle(registry: &mut Registry, clients: &mut [(&mut WorkspaceClient, &mut EventReceiver)], now: Instant) {
    for _ in 0..32 {
        let mut moved = registry.pump() > 0;
        for (client, rx) in clients.iter_mut() {
            while let Ok(event) = rx.try_recv() {
                client.handle_event(event, now).expect("client event");
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
}

/// Layout store shared between sequential client instances, emulating the
/// same on-disk state across a reload.
#[derive(Clone, Default)]
pub struct SharedLayoutStore {
    inner: Arc<parking_lot::Mutex<Option<WorkspaceSnapshot>>>,
}

impl SharedLayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<WorkspaceSnapshot> {
        self.inner.lock().clone()
    }
}

impl LayoutStore for SharedLayoutStore {
    fn load(&self) -> Result<Option<WorkspaceSnapshot>, PersistError> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, snapshot: &WorkspaceSnapshot) -> Result<(), PersistError> {
        *self.inner.lock() = Some(snapshot.clone());
        Ok(())
    }
}
