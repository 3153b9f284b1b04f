//! Reconciliation against the server-broadcast canonical tab list.
//!
//! The store is optimistic: local operations mutate it immediately and
//! propose the mutation to the registry. Every broadcast is then applied
//! as a three-way diff against the local flattened tab set. A short-lived
//! gate suspends application while a local multi-step operation is in
//! flight, so a stale broadcast cannot revert or duplicate a tab before
//! its create/close command has echoed back.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::model::{PaneId, SessionId, Tab, TabId, TabsSnapshot};
use crate::protocol::ClientFrame;
use crate::workspace::{StoreError, TabStore};

/// How long a local create/close needs to echo back through the registry.
pub const ECHO_WINDOW: Duration = Duration::from_millis(250);

/// One applied difference between local and canonical state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileChange {
    Added { tab: TabId, pane: PaneId },
    Removed { tab: TabId },
    Updated { tab: TabId },
}

/// Mutual-exclusion window for reconciliation. While engaged, broadcasts
/// queue instead of applying.
#[derive(Debug, Default)]
struct SyncGate {
    engaged_until: Option<Instant>,
}

impl SyncGate {
    fn engage(&mut self, now: Instant, window: Duration) {
        let until = now + window;
        self.engaged_until = Some(
            self.engaged_until
                .map(|current| current.max(until))
                .unwrap_or(until),
        );
    }

    fn is_engaged(&self, now: Instant) -> bool {
        self.engaged_until.map(|until| now < until).unwrap_or(false)
    }
}

pub struct Reconciler {
    store: TabStore,
    pending_placement: HashMap<TabId, PaneId>,
    gate: SyncGate,
    queued: VecDeque<TabsSnapshot>,
    last_modified: u64,
    echo_window: Duration,
}

impl Reconciler {
    pub fn new(store: TabStore) -> Self {
        Self {
            store,
            pending_placement: HashMap::new(),
            gate: SyncGate::default(),
            queued: VecDeque::new(),
            last_modified: 0,
            echo_window: ECHO_WINDOW,
        }
    }

    #[cfg(test)]
    fn with_echo_window(mut self, window: Duration) -> Self {
        self.echo_window = window;
        self
    }

    pub fn store(&self) -> &TabStore {
        &self.store
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    pub fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    // ---- local operations (optimistic mutate + proposed command) ----

    /// Create a tab locally and propose it. Records the pending placement
    /// so the canonical echo lands in the pane the user chose, and engages
    /// the gate for the echo window.
    pub fn create_tab(
        &mut self,
        pane: PaneId,
        now: Instant,
    ) -> Result<(TabId, ClientFrame), StoreError> {
        let id = self.store.create_tab(pane)?;
        let name = self
            .store
            .find_tab(&id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        self.pending_placement.insert(id.clone(), pane);
        self.gate.engage(now, self.echo_window);
        Ok((
            id.clone(),
            ClientFrame::TabCreate { id, name },
        ))
    }

    pub fn close_tab(
        &mut self,
        pane: PaneId,
        tab: &TabId,
        now: Instant,
    ) -> Result<ClientFrame, StoreError> {
        self.store.close_tab(pane, tab)?;
        self.pending_placement.remove(tab);
        self.gate.engage(now, self.echo_window);
        Ok(ClientFrame::TabClose {
            tab_id: tab.clone(),
        })
    }

    pub fn rename_tab(
        &mut self,
        tab: &TabId,
        name: impl Into<String>,
    ) -> Result<ClientFrame, StoreError> {
        let name = name.into();
        self.store.rename_tab(tab, name.clone())?;
        Ok(ClientFrame::TabRename {
            tab_id: tab.clone(),
            new_name: name,
        })
    }

    pub fn switch_active(&mut self, pane: PaneId, tab: &TabId) -> Result<(), StoreError> {
        self.store.switch_active(pane, tab)
    }

    pub fn move_tab(
        &mut self,
        from: PaneId,
        to: PaneId,
        tab: &TabId,
        index: usize,
    ) -> Result<(), StoreError> {
        self.store.move_tab(from, to, tab, index)?;
        if self.pending_placement.contains_key(tab) {
            self.pending_placement.insert(tab.clone(), to);
        }
        Ok(())
    }

    pub fn reorder_tab(&mut self, pane: PaneId, from: usize, to: usize) -> Result<(), StoreError> {
        self.store.reorder_tab(pane, from, to)
    }

    pub fn toggle_split_on(&mut self, now: Instant) -> Result<(TabId, ClientFrame), StoreError> {
        let id = self.store.toggle_split_on()?;
        let name = self
            .store
            .find_tab(&id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        self.pending_placement.insert(id.clone(), PaneId::Secondary);
        self.gate.engage(now, self.echo_window);
        Ok((
            id.clone(),
            ClientFrame::TabCreate { id, name },
        ))
    }

    pub fn toggle_split_off(&mut self, now: Instant) -> Result<(), StoreError> {
        self.store.toggle_split_off()?;
        self.gate.engage(now, self.echo_window);
        Ok(())
    }

    /// Local knowledge of a confirmed session binding (from an attach
    /// confirmation); canonical echo arrives later via `tabs:sync`.
    pub fn bind_session(&mut self, tab: &TabId, session: SessionId) -> Result<(), StoreError> {
        self.store.set_session(tab, session)
    }

    // ---- canonical state application ----

    /// Apply a broadcast, or queue it while the gate is engaged.
    pub fn apply_snapshot(&mut self, snapshot: TabsSnapshot, now: Instant) -> Vec<ReconcileChange> {
        if self.gate.is_engaged(now) {
            trace!(
                target = "sync::reconcile",
                revision = snapshot.last_modified,
                "gate engaged, queueing broadcast"
            );
            self.queued.push_back(snapshot);
            return Vec::new();
        }
        self.apply_now(snapshot)
    }

    /// Re-engage the gate because a deferred create/close command was just
    /// put on the wire; its echo is now the one to wait for.
    pub fn hold_broadcasts(&mut self, now: Instant) {
        self.gate.engage(now, self.echo_window);
    }

    /// Drain the gate queue once the window has expired. Every snapshot is
    /// the complete canonical list, so only the newest one matters; the
    /// superseded ones are discarded instead of replaying stale state.
    pub fn release_gate(&mut self, now: Instant) -> Vec<ReconcileChange> {
        if self.gate.is_engaged(now) || self.queued.is_empty() {
            return Vec::new();
        }
        let latest = self.queued.pop_back();
        self.queued.clear();
        match latest {
            Some(snapshot) => self.apply_now(snapshot),
            None => Vec::new(),
        }
    }

    /// `tab:session-updated` single-tab variant of the diff.
    pub fn apply_session_update(
        &mut self,
        tab: &TabId,
        session: Option<SessionId>,
    ) -> Option<ReconcileChange> {
        // A null here never reverts a known binding: session ids are
        // monotonic while the tab exists remotely.
        let session = session?;
        let current = self.store.find_tab(tab)?.session_id.clone();
        if current.as_ref() == Some(&session) {
            return None;
        }
        self.store.set_session(tab, session).ok()?;
        Some(ReconcileChange::Updated { tab: tab.clone() })
    }

    fn apply_now(&mut self, snapshot: TabsSnapshot) -> Vec<ReconcileChange> {
        let mut changes = Vec::new();
        let local_ids = self.store.tab_ids();
        let canonical_ids: HashMap<&TabId, &crate::model::CanonicalTab> =
            snapshot.tabs.iter().map(|t| (&t.id, t)).collect();

        // Removals first, so capacity freed here is available to adds.
        let removed: Vec<TabId> = local_ids
            .iter()
            .filter(|id| !canonical_ids.contains_key(id))
            .cloned()
            .collect();
        for id in removed {
            if self.store.remove_learned(&id).is_some() {
                self.pending_placement.remove(&id);
                changes.push(ReconcileChange::Removed { tab: id });
            }
        }

        for canonical in &snapshot.tabs {
            if local_ids.contains(&canonical.id) {
                let Some(local) = self.store.find_tab(&canonical.id) else {
                    continue;
                };
                let name_changed = local.name != canonical.name;
                let session_changed = canonical.session_id.is_some()
                    && local.session_id != canonical.session_id;
                if name_changed {
                    let _ = self.store.rename_tab(&canonical.id, canonical.name.clone());
                }
                if session_changed {
                    if let Some(session) = canonical.session_id.clone() {
                        let _ = self.store.set_session(&canonical.id, session);
                    }
                }
                if name_changed || session_changed {
                    changes.push(ReconcileChange::Updated {
                        tab: canonical.id.clone(),
                    });
                }
            } else {
                let preferred = self
                    .pending_placement
                    .remove(&canonical.id)
                    .or_else(|| self.store.first_pane_with_capacity())
                    .unwrap_or(self.store.home_pane());
                let mut tab = Tab::new(canonical.id.clone(), canonical.name.clone());
                tab.session_id = canonical.session_id.clone();
                match self.store.insert_learned(preferred, tab) {
                    Ok(pane) => changes.push(ReconcileChange::Added {
                        tab: canonical.id.clone(),
                        pane,
                    }),
                    Err(err) => {
                        debug!(
                            target = "sync::reconcile",
                            tab = %canonical.id,
                            error = %err,
                            "no pane can hold canonical tab"
                        );
                    }
                }
            }
        }

        self.last_modified = snapshot.last_modified;
        if !changes.is_empty() {
            debug!(
                target = "sync::reconcile",
                revision = snapshot.last_modified,
                changes = changes.len(),
                "canonical state applied"
            );
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CanonicalTab;

    fn canonical(entries: &[(&str, &str, Option<&str>)], revision: u64) -> TabsSnapshot {
        TabsSnapshot {
            tabs: entries
                .iter()
                .map(|(id, name, session)| CanonicalTab {
                    id: TabId::from(*id),
                    name: (*name).to_string(),
                    session_id: session.map(SessionId::from),
                })
                .collect(),
            last_modified: revision,
        }
    }

    fn quiet() -> Instant {
        // An instant safely past any previously-engaged gate.
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn add_learns_remote_tab_into_home_pane() {
        let mut reconciler = Reconciler::new(TabStore::new());
        let changes = reconciler.apply_snapshot(
            canonical(&[("r1", "remote", Some("s-1"))], 1),
            Instant::now(),
        );
        assert_eq!(
            changes,
            vec![ReconcileChange::Added {
                tab: TabId::from("r1"),
                pane: PaneId::Primary
            }]
        );
        let tab = reconciler.store().find_tab(&TabId::from("r1")).unwrap();
        assert_eq!(tab.session_id, Some(SessionId::from("s-1")));
    }

    #[test]
    fn pending_placement_wins_over_default() {
        let mut reconciler = Reconciler::new(TabStore::new());
        let now = Instant::now();
        reconciler.create_tab(PaneId::Primary, now).unwrap();
        let (id, _) = reconciler.toggle_split_on(now).unwrap();

        // The echo arrives after the gate expires; the seeded tab must stay
        // in the secondary pane rather than being re-placed.
        let snapshot = canonical(
            &[
                (
                    reconciler.store().panes()[0].tabs[0].id.as_str(),
                    "Terminal 1",
                    None,
                ),
                (id.as_str(), "Terminal 2", None),
            ],
            2,
        );
        let changes = reconciler.apply_snapshot(snapshot, quiet());
        assert!(changes.is_empty(), "echo should match local state: {changes:?}");
        assert_eq!(reconciler.store().pane_of(&id), Some(PaneId::Secondary));
    }

    #[test]
    fn remove_repairs_active_and_merges() {
        let mut reconciler = Reconciler::new(TabStore::new());
        let now = Instant::now();
        let (keep, _) = reconciler.create_tab(PaneId::Primary, now).unwrap();
        let (gone, _) = reconciler.create_tab(PaneId::Primary, now).unwrap();
        reconciler.switch_active(PaneId::Primary, &gone).unwrap();

        let changes = reconciler.apply_snapshot(
            canonical(&[(keep.as_str(), "Terminal 1", None)], 3),
            quiet(),
        );
        assert_eq!(changes, vec![ReconcileChange::Removed { tab: gone }]);
        assert_eq!(
            reconciler.store().pane(PaneId::Primary).unwrap().active,
            Some(keep)
        );
    }

    #[test]
    fn update_renames_and_corrects_session() {
        let mut reconciler = Reconciler::new(TabStore::new());
        let now = Instant::now();
        let (id, _) = reconciler.create_tab(PaneId::Primary, now).unwrap();
        reconciler.bind_session(&id, SessionId::from("s-old")).unwrap();

        let changes = reconciler.apply_snapshot(
            canonical(&[(id.as_str(), "renamed", Some("s-new"))], 4),
            quiet(),
        );
        assert_eq!(changes, vec![ReconcileChange::Updated { tab: id.clone() }]);
        let tab = reconciler.store().find_tab(&id).unwrap();
        assert_eq!(tab.name, "renamed");
        assert_eq!(tab.session_id, Some(SessionId::from("s-new")));
    }

    #[test]
    fn canonical_null_session_never_reverts() {
        let mut reconciler = Reconciler::new(TabStore::new());
        let now = Instant::now();
        let (id, _) = reconciler.create_tab(PaneId::Primary, now).unwrap();
        reconciler.bind_session(&id, SessionId::from("s-live")).unwrap();

        let changes = reconciler.apply_snapshot(
            canonical(&[(id.as_str(), "Terminal 1", None)], 5),
            quiet(),
        );
        assert!(changes.is_empty());
        assert_eq!(
            reconciler.store().find_tab(&id).unwrap().session_id,
            Some(SessionId::from("s-live"))
        );
    }

    #[test]
    fn applying_same_snapshot_twice_is_idempotent() {
        let mut reconciler = Reconciler::new(TabStore::new());
        let snapshot = canonical(
            &[("a", "one", Some("s-a")), ("b", "two", None)],
            6,
        );
        let first = reconciler.apply_snapshot(snapshot.clone(), quiet());
        assert_eq!(first.len(), 2);
        let ids_after_first = reconciler.store().tab_ids();

        let second = reconciler.apply_snapshot(snapshot, quiet());
        assert!(second.is_empty());
        assert_eq!(reconciler.store().tab_ids(), ids_after_first);
        assert_eq!(reconciler.store().tab_count(), 2);
    }

    #[test]
    fn gate_queues_broadcasts_until_echo_window_passes() {
        let mut reconciler =
            Reconciler::new(TabStore::new()).with_echo_window(Duration::from_millis(50));
        let start = Instant::now();
        let (id, _) = reconciler.create_tab(PaneId::Primary, start).unwrap();

        // A broadcast predating our create arrives during the window: it
        // must not remove the half-created tab.
        let stale = canonical(&[], 1);
        let changes = reconciler.apply_snapshot(stale, start + Duration::from_millis(10));
        assert!(changes.is_empty());
        assert!(reconciler.has_queued());
        assert!(reconciler.store().find_tab(&id).is_some());

        // After the window the queue drains. The echo including our tab
        // arrived behind the stale broadcast and supersedes it, so the tab
        // survives and the stale removal is never replayed.
        let echo = canonical(&[(id.as_str(), "Terminal 1", None)], 2);
        reconciler.apply_snapshot(echo, start + Duration::from_millis(10));
        let changes = reconciler.release_gate(start + Duration::from_millis(60));
        assert!(changes.is_empty(), "echo matches local state: {changes:?}");
        assert!(reconciler.store().find_tab(&id).is_some());
        assert_eq!(reconciler.last_modified(), 2);
        assert!(!reconciler.has_queued());
    }

    #[test]
    fn conservation_after_quiescence() {
        let mut reconciler = Reconciler::new(TabStore::new());
        let now = Instant::now();
        let (a, _) = reconciler.create_tab(PaneId::Primary, now).unwrap();
        let (b, _) = reconciler.create_tab(PaneId::Primary, now).unwrap();
        reconciler.close_tab(PaneId::Primary, &a, now).unwrap();

        let snapshot = canonical(&[(b.as_str(), "Terminal 2", None)], 9);
        reconciler.apply_snapshot(snapshot.clone(), quiet());

        let canonical_ids: std::collections::HashSet<TabId> =
            snapshot.tabs.iter().map(|t| t.id.clone()).collect();
        assert_eq!(reconciler.store().tab_ids(), canonical_ids);
        let total: usize = reconciler.store().panes().iter().map(|p| p.tabs.len()).sum();
        assert_eq!(total, canonical_ids.len(), "no tab may live in two panes");
    }
}
