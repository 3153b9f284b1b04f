//! Workspace client event loop.
//!
//! One loop multiplexes transport events, render-frame ticks and local
//! operations; every mutation stays on this loop, so the store needs no
//! internal locking. Renderer integration is a message contract: the
//! client emits [`ClientEvent`]s over a channel and never touches UI
//! types.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::attach::{Attachment, AttachmentRegistry, Generation, TeardownAction};
use crate::model::{PaneId, SessionId, TabId};
use crate::persist::{LayoutStore, PersistError, WorkspaceSnapshot};
use crate::pipeline::{OutputPipeline, PipelineError};
use crate::protocol::{self, ClientFrame, ServerFrame, WireError};
use crate::sync::{ReconcileChange, Reconciler};
use crate::terminal::TerminalSurface;
use crate::transport::{EventReceiver, Transport, TransportError, TransportEvent};
use crate::workspace::StoreError;

pub const RENDER_INTERVAL: Duration = Duration::from_millis(16);
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;
/// Mutations deferred while the channel is down. Oldest are shed first.
const MAX_OUTBOX: usize = 256;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Wire(#[from] WireError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// Renderer-facing notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    TabOpened { tab: TabId, pane: PaneId },
    TabClosed { tab: TabId },
    TabUpdated { tab: TabId },
    Attached { tab: TabId, session: SessionId },
    Detached { tab: TabId },
    ConnectionRestored,
    ConnectionLost,
}

pub struct WorkspaceClient {
    transport: Arc<dyn Transport>,
    reconciler: Reconciler,
    attachments: HashMap<TabId, Attachment>,
    pipelines: HashMap<TabId, OutputPipeline>,
    expected_confirms: HashMap<TabId, VecDeque<Generation>>,
    registry: Arc<AttachmentRegistry>,
    layout_store: Box<dyn LayoutStore>,
    outbox: VecDeque<ClientFrame>,
    ui_tx: mpsc::UnboundedSender<ClientEvent>,
}

impl WorkspaceClient {
    /// Build a client, rehydrating the store from the layout store. The
    /// returned receiver carries renderer notifications.
    pub fn new(
        transport: Arc<dyn Transport>,
        layout_store: Box<dyn LayoutStore>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let snapshot = match layout_store.load() {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(err) => {
                warn!(target = "client::loop", error = %err, "state load failed, starting fresh");
                WorkspaceSnapshot::default()
            }
        };
        let store = snapshot.restore();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let client = Self {
            transport,
            reconciler: Reconciler::new(store),
            attachments: HashMap::new(),
            pipelines: HashMap::new(),
            expected_confirms: HashMap::new(),
            registry: AttachmentRegistry::new(),
            layout_store,
            outbox: VecDeque::new(),
            ui_tx,
        };
        (client, ui_rx)
    }

    pub fn store(&self) -> &crate::workspace::TabStore {
        self.reconciler.store()
    }

    pub fn attachment(&self, tab: &TabId) -> Option<&Attachment> {
        self.attachments.get(tab)
    }

    pub fn registry(&self) -> &Arc<AttachmentRegistry> {
        &self.registry
    }

    /// Drive the loop until the event stream closes.
    pub async fn run(mut self, mut events: EventReceiver) -> Result<(), ClientError> {
        let mut frames = tokio::time::interval(RENDER_INTERVAL);
        debug!(target = "client::loop", "client loop started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, Instant::now())?,
                    None => break,
                },
                _ = frames.tick() => self.tick(Instant::now())?,
            }
        }
        debug!(target = "client::loop", "client loop stopped");
        Ok(())
    }

    /// One transport event. Public so tests and embedders can pump the
    /// loop deterministically.
    pub fn handle_event(
        &mut self,
        event: TransportEvent,
        now: Instant,
    ) -> Result<(), ClientError> {
        match event {
            TransportEvent::Connected => {
                debug!(target = "client::loop", "channel up, requesting canonical state");
                self.send_or_queue(ClientFrame::TabsRequest);
                self.flush_outbox(now);
                self.ensure_attachments();
                self.emit(ClientEvent::ConnectionRestored);
            }
            TransportEvent::Text(text) => {
                let frame = protocol::decode_server_frame(&text)?;
                self.handle_frame(frame, now)?;
            }
            TransportEvent::Disconnected => {
                debug!(target = "client::loop", "channel dropped, supervisor retrying");
            }
            TransportEvent::Failed => {
                self.emit(ClientEvent::ConnectionLost);
            }
        }
        Ok(())
    }

    /// One render frame: flush pipelines and drain gated broadcasts.
    pub fn tick(&mut self, now: Instant) -> Result<(), ClientError> {
        let changes = self.reconciler.release_gate(now);
        if !changes.is_empty() {
            self.process_changes(changes, now);
            self.persist();
        }
        for pipeline in self.pipelines.values_mut() {
            pipeline.on_frame()?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: ServerFrame, now: Instant) -> Result<(), ClientError> {
        match frame {
            ServerFrame::TabsSync { snapshot } => {
                trace!(
                    target = "client::frame",
                    revision = snapshot.last_modified,
                    tabs = snapshot.tabs.len(),
                    "canonical broadcast"
                );
                let changes = self.reconciler.apply_snapshot(snapshot, now);
                self.process_changes(changes, now);
                self.persist();
            }
            ServerFrame::TabSessionUpdated { tab_id, session_id } => {
                if self
                    .reconciler
                    .apply_session_update(&tab_id, session_id.clone())
                    .is_some()
                {
                    self.persist();
                    self.emit(ClientEvent::TabUpdated { tab: tab_id.clone() });
                }
                self.observe_session(&tab_id, session_id.as_ref());
            }
            ServerFrame::TerminalCreated {
                terminal_id,
                session_id,
                restored,
            } => {
                self.handle_created(terminal_id, session_id, restored, now)?;
            }
            ServerFrame::TerminalOutput { terminal_id, data }
            | ServerFrame::TerminalHistory { terminal_id, data } => {
                let bytes = protocol::decode_data(&data)?;
                self.pipelines
                    .entry(terminal_id)
                    .or_default()
                    .push(Bytes::from(bytes));
            }
            ServerFrame::TerminalDimensions {
                terminal_id,
                cols,
                rows,
            } => {
                if let Some(attachment) = self.attachments.get_mut(&terminal_id) {
                    attachment.set_geometry(cols, rows);
                }
                self.pipelines
                    .entry(terminal_id)
                    .or_default()
                    .apply_remote_resize(cols, rows)?;
            }
        }
        Ok(())
    }

    fn handle_created(
        &mut self,
        tab: TabId,
        session: SessionId,
        restored: bool,
        now: Instant,
    ) -> Result<(), ClientError> {
        let generation = self
            .expected_confirms
            .get_mut(&tab)
            .and_then(|queue| queue.pop_front());
        let Some(generation) = generation else {
            trace!(target = "client::frame", tab = %tab, "confirmation with no attach in flight");
            return Ok(());
        };
        let Some(attachment) = self.attachments.get_mut(&tab) else {
            return Ok(());
        };
        let Some(follow_ups) = attachment.confirm(generation, session.clone(), restored, now)
        else {
            return Ok(());
        };
        for frame in follow_ups {
            self.send_or_queue(frame);
        }
        let _ = self.reconciler.bind_session(&tab, session.clone());
        self.persist();
        self.emit(ClientEvent::Attached { tab, session });
        Ok(())
    }

    fn observe_session(&mut self, tab: &TabId, session: Option<&SessionId>) {
        let Some(attachment) = self.attachments.get_mut(tab) else {
            return;
        };
        if let Some(frame) = attachment.observe_session_change(session) {
            let generation = attachment.generation();
            self.expected_confirms
                .entry(tab.clone())
                .or_default()
                .push_back(generation);
            self.send_or_queue(frame);
        }
    }

    fn process_changes(&mut self, changes: Vec<ReconcileChange>, now: Instant) {
        for change in changes {
            match change {
                ReconcileChange::Added { tab, pane } => {
                    self.start_attach(&tab);
                    self.emit(ClientEvent::TabOpened { tab, pane });
                }
                ReconcileChange::Removed { tab } => {
                    self.teardown_tab(&tab, now);
                    self.emit(ClientEvent::TabClosed { tab });
                }
                ReconcileChange::Updated { tab } => {
                    let session = self
                        .reconciler
                        .store()
                        .find_tab(&tab)
                        .and_then(|t| t.session_id.clone());
                    self.observe_session(&tab, session.as_ref());
                    self.emit(ClientEvent::TabUpdated { tab });
                }
            }
        }
    }

    /// Make sure every stored tab has a live attachment. New tabs start a
    /// first attach (resuming with a remembered session id when one
    /// exists); tabs that were already bound re-issue create-or-resume,
    /// since their streams died with the old channel.
    fn ensure_attachments(&mut self) {
        let tabs: Vec<TabId> = self
            .reconciler
            .store()
            .panes()
            .iter()
            .flat_map(|pane| pane.tabs.iter())
            .map(|tab| tab.id.clone())
            .collect();
        for tab in tabs {
            if let Some(attachment) = self.attachments.get_mut(&tab) {
                if let Some(frame) = attachment.reattach() {
                    let generation = attachment.generation();
                    self.expected_confirms
                        .entry(tab.clone())
                        .or_default()
                        .push_back(generation);
                    self.send_or_queue(frame);
                }
            } else {
                self.start_attach(&tab);
            }
        }
    }

    fn start_attach(&mut self, tab: &TabId) {
        if !self.attachments.contains_key(tab) {
            let known = self
                .reconciler
                .store()
                .find_tab(tab)
                .and_then(|t| t.session_id.clone());
            self.attachments.insert(
                tab.clone(),
                Attachment::new(
                    tab.clone(),
                    self.registry.clone(),
                    known,
                    DEFAULT_COLS,
                    DEFAULT_ROWS,
                ),
            );
        }
        let Some(attachment) = self.attachments.get_mut(tab) else {
            return;
        };
        if let Some(frame) = attachment.begin_attach() {
            let generation = attachment.generation();
            self.expected_confirms
                .entry(tab.clone())
                .or_default()
                .push_back(generation);
            self.send_or_queue(frame);
        }
    }

    fn teardown_tab(&mut self, tab: &TabId, now: Instant) {
        if let Some(mut attachment) = self.attachments.remove(tab) {
            match attachment.detach(now) {
                TeardownAction::DestroyRemote(session) => {
                    self.send_or_queue(ClientFrame::TerminalDestroy {
                        terminal_id: tab.clone(),
                        session_id: session,
                    });
                }
                TeardownAction::DetachOnly => {}
            }
        }
        self.pipelines.remove(tab);
        self.expected_confirms.remove(tab);
        self.emit(ClientEvent::Detached { tab: tab.clone() });
    }

    // ---- local operations ----

    pub fn create_tab(&mut self, pane: PaneId, now: Instant) -> Result<TabId, ClientError> {
        let (id, frame) = self.reconciler.create_tab(pane, now)?;
        self.send_or_queue(frame);
        self.start_attach(&id);
        self.persist();
        self.emit(ClientEvent::TabOpened {
            tab: id.clone(),
            pane,
        });
        Ok(id)
    }

    pub fn close_tab(
        &mut self,
        pane: PaneId,
        tab: &TabId,
        now: Instant,
    ) -> Result<(), ClientError> {
        let frame = self.reconciler.close_tab(pane, tab, now)?;
        self.send_or_queue(frame);
        self.teardown_tab(tab, now);
        self.persist();
        self.emit(ClientEvent::TabClosed { tab: tab.clone() });
        Ok(())
    }

    pub fn rename_tab(&mut self, tab: &TabId, name: &str) -> Result<(), ClientError> {
        let frame = self.reconciler.rename_tab(tab, name)?;
        self.send_or_queue(frame);
        self.persist();
        self.emit(ClientEvent::TabUpdated { tab: tab.clone() });
        Ok(())
    }

    pub fn switch_active(&mut self, pane: PaneId, tab: &TabId) -> Result<(), ClientError> {
        self.reconciler.switch_active(pane, tab)?;
        self.persist();
        Ok(())
    }

    pub fn move_tab(
        &mut self,
        from: PaneId,
        to: PaneId,
        tab: &TabId,
        index: usize,
    ) -> Result<(), ClientError> {
        self.reconciler.move_tab(from, to, tab, index)?;
        self.persist();
        Ok(())
    }

    pub fn reorder_tab(&mut self, pane: PaneId, from: usize, to: usize) -> Result<(), ClientError> {
        self.reconciler.reorder_tab(pane, from, to)?;
        self.persist();
        Ok(())
    }

    pub fn toggle_split_on(&mut self, now: Instant) -> Result<TabId, ClientError> {
        let (id, frame) = self.reconciler.toggle_split_on(now)?;
        self.send_or_queue(frame);
        self.start_attach(&id);
        self.persist();
        self.emit(ClientEvent::TabOpened {
            tab: id.clone(),
            pane: PaneId::Secondary,
        });
        Ok(id)
    }

    pub fn toggle_split_off(&mut self, now: Instant) -> Result<(), ClientError> {
        self.reconciler.toggle_split_off(now)?;
        self.persist();
        Ok(())
    }

    /// Keyboard/paste input for one tab.
    pub fn input(&mut self, tab: &TabId, bytes: &[u8]) -> Result<(), ClientError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.send_or_queue(ClientFrame::TerminalInput {
            terminal_id: tab.clone(),
            data: protocol::encode_data(bytes),
        });
        Ok(())
    }

    /// A locally-driven resize (window fit). Echoes to the registry
    /// unless an authoritative resize is mid-flight.
    pub fn local_resize(
        &mut self,
        tab: &TabId,
        cols: u16,
        rows: u16,
    ) -> Result<(), ClientError> {
        let echo = self
            .pipelines
            .entry(tab.clone())
            .or_default()
            .local_resize(cols, rows)?;
        if let Some((cols, rows)) = echo {
            if let Some(attachment) = self.attachments.get_mut(tab) {
                attachment.set_geometry(cols, rows);
            }
            self.send_or_queue(ClientFrame::TerminalResize {
                terminal_id: tab.clone(),
                cols,
                rows,
            });
        }
        Ok(())
    }

    /// Bind the rendering surface for a tab; anything buffered flushes on
    /// the following frames.
    pub fn bind_surface(
        &mut self,
        tab: &TabId,
        surface: Box<dyn TerminalSurface>,
    ) -> Result<(), ClientError> {
        self.pipelines
            .entry(tab.clone())
            .or_default()
            .bind_surface(surface)?;
        Ok(())
    }

    // ---- plumbing ----

    fn send_or_queue(&mut self, frame: ClientFrame) {
        if self.transport.is_connected() {
            match protocol::encode_client_frame(&frame) {
                Ok(text) => match self.transport.send_text(text) {
                    Ok(()) => return,
                    Err(err) => {
                        debug!(target = "client::outgoing", error = %err, "send failed, deferring");
                    }
                },
                Err(err) => {
                    warn!(target = "client::outgoing", error = %err, "frame encode failed");
                    return;
                }
            }
        }
        if self.outbox.len() >= MAX_OUTBOX {
            warn!(target = "client::outgoing", "outbox full, shedding oldest deferred frame");
            self.outbox.pop_front();
        }
        self.outbox.push_back(frame);
    }

    fn flush_outbox(&mut self, now: Instant) {
        let mut held = false;
        while let Some(frame) = self.outbox.pop_front() {
            let Ok(text) = protocol::encode_client_frame(&frame) else {
                continue;
            };
            if let Err(err) = self.transport.send_text(text) {
                debug!(target = "client::outgoing", error = %err, "flush interrupted");
                self.outbox.push_front(frame);
                break;
            }
            // A deferred create/close just hit the wire; hold broadcasts
            // until its echo can come back.
            if matches!(
                frame,
                ClientFrame::TabCreate { .. } | ClientFrame::TabClose { .. }
            ) {
                held = true;
            }
        }
        if held {
            self.reconciler.hold_broadcasts(now);
        }
    }

    fn persist(&mut self) {
        let snapshot = WorkspaceSnapshot::capture(self.reconciler.store());
        if let Err(err) = self.layout_store.save(&snapshot) {
            warn!(target = "client::persist", error = %err, "state save failed");
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.ui_tx.send(event);
    }
}
