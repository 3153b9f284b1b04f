//! Local tab/pane store.
//!
//! Authoritative for this client's layout: which tabs live in which pane,
//! in what order, and which tab is active per pane. Tab existence, names
//! and session bindings are shared state owned by the server; pane
//! membership never leaves this client.

use std::collections::HashSet;

use thiserror::Error;
use tracing::debug;

use crate::model::{PaneFamily, PaneId, Tab, TabId};

pub const MAX_TABS_PER_PANE: usize = 10;
pub const MAX_GRID_COLUMNS: u8 = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("pane {pane} is at capacity ({MAX_TABS_PER_PANE} tabs)")]
    CapacityExceeded { pane: PaneId },
    #[error("unknown pane {0}")]
    UnknownPane(PaneId),
    #[error("unknown tab {0}")]
    UnknownTab(TabId),
    #[error("layout does not support this operation")]
    IncompatibleLayout,
}

#[derive(Clone, Debug)]
pub struct Pane {
    pub id: PaneId,
    pub tabs: Vec<Tab>,
    pub active: Option<TabId>,
}

impl Pane {
    fn new(id: PaneId) -> Self {
        Self {
            id,
            tabs: Vec::new(),
            active: None,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.tabs.len() < MAX_TABS_PER_PANE
    }

    fn position_of(&self, tab: &TabId) -> Option<usize> {
        self.tabs.iter().position(|t| &t.id == tab)
    }

    /// Re-derive the active pointer after a removal: keep it if the tab is
    /// still present, else fall back to the first remaining tab.
    fn repair_active(&mut self) {
        let still_there = self
            .active
            .as_ref()
            .map(|id| self.position_of(id).is_some())
            .unwrap_or(false);
        if !still_there {
            self.active = self.tabs.first().map(|t| t.id.clone());
        }
    }
}

/// Ordered panes plus per-pane active tabs. The first pane is the home
/// pane: default placement target and merge destination.
#[derive(Debug)]
pub struct TabStore {
    panes: Vec<Pane>,
    created: u64,
}

impl Default for TabStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TabStore {
    pub fn new() -> Self {
        Self {
            panes: vec![Pane::new(PaneId::Primary)],
            created: 0,
        }
    }

    /// Rebuild a store from persisted panes. Invalid shapes degrade to a
    /// fresh single-pane layout rather than failing rehydration.
    pub fn from_panes(panes: Vec<Pane>) -> Self {
        let mut store = Self::new();
        if panes.is_empty() {
            return store;
        }
        let family = panes[0].id.family();
        if panes.iter().any(|p| p.id.family() != family) {
            return store;
        }
        store.created = panes.iter().map(|p| p.tabs.len() as u64).sum();
        store.panes = panes;
        for pane in &mut store.panes {
            pane.tabs.truncate(MAX_TABS_PER_PANE);
            pane.repair_active();
        }
        store
    }

    pub fn panes(&self) -> &[Pane] {
        &self.panes
    }

    pub fn is_split(&self) -> bool {
        self.panes.iter().any(|p| p.id == PaneId::Secondary)
    }

    pub fn home_pane(&self) -> PaneId {
        self.panes[0].id
    }

    pub fn pane(&self, id: PaneId) -> Option<&Pane> {
        self.panes.iter().find(|p| p.id == id)
    }

    fn pane_mut(&mut self, id: PaneId) -> Result<&mut Pane, StoreError> {
        self.panes
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::UnknownPane(id))
    }

    pub fn pane_of(&self, tab: &TabId) -> Option<PaneId> {
        self.panes
            .iter()
            .find(|p| p.position_of(tab).is_some())
            .map(|p| p.id)
    }

    pub fn find_tab(&self, tab: &TabId) -> Option<&Tab> {
        self.panes
            .iter()
            .find_map(|p| p.tabs.iter().find(|t| &t.id == tab))
    }

    fn find_tab_mut(&mut self, tab: &TabId) -> Result<&mut Tab, StoreError> {
        self.panes
            .iter_mut()
            .find_map(|p| p.tabs.iter_mut().find(|t| &t.id == tab))
            .ok_or_else(|| StoreError::UnknownTab(tab.clone()))
    }

    pub fn tab_ids(&self) -> HashSet<TabId> {
        self.panes
            .iter()
            .flat_map(|p| p.tabs.iter().map(|t| t.id.clone()))
            .collect()
    }

    pub fn tab_count(&self) -> usize {
        self.panes.iter().map(|p| p.tabs.len()).sum()
    }

    /// Default home placement for tabs learned from canonical state.
    pub fn first_pane_with_capacity(&self) -> Option<PaneId> {
        self.panes.iter().find(|p| p.has_capacity()).map(|p| p.id)
    }

    pub fn create_tab(&mut self, pane: PaneId) -> Result<TabId, StoreError> {
        let next = self.created + 1;
        let target = self.pane_mut(pane)?;
        if !target.has_capacity() {
            return Err(StoreError::CapacityExceeded { pane });
        }
        let tab = Tab::new(TabId::random(), format!("Terminal {next}"));
        let id = tab.id.clone();
        target.tabs.push(tab);
        target.active = Some(id.clone());
        self.created = next;
        debug!(target = "workspace::store", tab = %id, pane = %pane, "tab created");
        Ok(id)
    }

    pub fn close_tab(&mut self, pane: PaneId, tab: &TabId) -> Result<Tab, StoreError> {
        let holder = self.pane_mut(pane)?;
        let index = holder
            .position_of(tab)
            .ok_or_else(|| StoreError::UnknownTab(tab.clone()))?;
        let removed = holder.tabs.remove(index);
        holder.repair_active();
        self.merge_empty_panes();
        debug!(target = "workspace::store", tab = %tab, pane = %pane, "tab closed");
        Ok(removed)
    }

    pub fn switch_active(&mut self, pane: PaneId, tab: &TabId) -> Result<(), StoreError> {
        let target = self.pane_mut(pane)?;
        if target.position_of(tab).is_none() {
            return Err(StoreError::UnknownTab(tab.clone()));
        }
        target.active = Some(tab.clone());
        Ok(())
    }

    /// Move a tab between panes of the same family. A cross-family move is
    /// a stale request from an old layout and is silently ignored.
    pub fn move_tab(
        &mut self,
        from: PaneId,
        to: PaneId,
        tab: &TabId,
        index: usize,
    ) -> Result<(), StoreError> {
        if from.family() != to.family() {
            return Ok(());
        }
        if from == to {
            return Ok(());
        }
        {
            let destination = self.pane_mut(to)?;
            if !destination.has_capacity() {
                return Err(StoreError::CapacityExceeded { pane: to });
            }
        }
        let source = self.pane_mut(from)?;
        let position = source
            .position_of(tab)
            .ok_or_else(|| StoreError::UnknownTab(tab.clone()))?;
        let moved = source.tabs.remove(position);
        source.repair_active();
        let destination = self.pane_mut(to)?;
        let index = index.min(destination.tabs.len());
        destination.tabs.insert(index, moved);
        destination.active = Some(tab.clone());
        self.merge_empty_panes();
        Ok(())
    }

    pub fn reorder_tab(
        &mut self,
        pane: PaneId,
        from: usize,
        to: usize,
    ) -> Result<(), StoreError> {
        let target = self.pane_mut(pane)?;
        if from >= target.tabs.len() {
            return Ok(());
        }
        let tab = target.tabs.remove(from);
        let to = to.min(target.tabs.len());
        target.tabs.insert(to, tab);
        Ok(())
    }

    pub fn rename_tab(&mut self, tab: &TabId, name: impl Into<String>) -> Result<(), StoreError> {
        self.find_tab_mut(tab)?.name = name.into();
        Ok(())
    }

    pub fn set_session(&mut self, tab: &TabId, session: crate::model::SessionId) -> Result<(), StoreError> {
        self.find_tab_mut(tab)?.session_id = Some(session);
        Ok(())
    }

    /// Enter split mode, seeding the secondary pane with one fresh tab.
    pub fn toggle_split_on(&mut self) -> Result<TabId, StoreError> {
        if self.home_pane().family() != PaneFamily::Split || self.is_split() {
            return Err(StoreError::IncompatibleLayout);
        }
        self.panes.push(Pane::new(PaneId::Secondary));
        match self.create_tab(PaneId::Secondary) {
            Ok(id) => Ok(id),
            Err(err) => {
                self.panes.retain(|p| p.id != PaneId::Secondary);
                Err(err)
            }
        }
    }

    /// Leave split mode: primary tabs first, then secondary tabs, order
    /// preserved; active falls back to the prior primary active.
    pub fn toggle_split_off(&mut self) -> Result<(), StoreError> {
        if !self.is_split() {
            return Err(StoreError::IncompatibleLayout);
        }
        self.merge_into_previous(1);
        Ok(())
    }

    /// Set the number of grid columns. Growing seeds one fresh tab per new
    /// cell; shrinking folds the rightmost pane into its neighbor, one
    /// column at a time.
    pub fn set_grid(&mut self, columns: u8) -> Result<Vec<TabId>, StoreError> {
        if self.is_split() {
            return Err(StoreError::IncompatibleLayout);
        }
        if columns == 0 || columns > MAX_GRID_COLUMNS {
            return Err(StoreError::IncompatibleLayout);
        }
        if columns == 1 {
            while self.panes.len() > 1 {
                self.merge_into_previous(self.panes.len() - 1);
            }
            let pane = &mut self.panes[0];
            pane.id = PaneId::Primary;
            return Ok(Vec::new());
        }

        // Entering or resizing the grid: relabel existing panes as cells.
        for (index, pane) in self.panes.iter_mut().enumerate() {
            pane.id = PaneId::Cell(index as u8);
        }
        while self.panes.len() > columns as usize {
            self.merge_into_previous(self.panes.len() - 1);
        }
        let mut seeded = Vec::new();
        while self.panes.len() < columns as usize {
            let id = PaneId::Cell(self.panes.len() as u8);
            self.panes.push(Pane::new(id));
            seeded.push(self.create_tab(id)?);
        }
        Ok(seeded)
    }

    /// Fold pane `index` into the pane to its left, preserving order:
    /// destination tabs first, then the removed pane's tabs. The
    /// destination's active tab survives when it can.
    fn merge_into_previous(&mut self, index: usize) {
        if index == 0 || index >= self.panes.len() {
            return;
        }
        let removed = self.panes.remove(index);
        let destination = &mut self.panes[index - 1];
        let prior_active = destination.active.clone();
        destination.tabs.extend(removed.tabs);
        destination.active = prior_active.or_else(|| destination.tabs.first().map(|t| t.id.clone()));
        for (i, pane) in self.panes.iter_mut().enumerate() {
            if pane.id.family() == PaneFamily::Grid {
                pane.id = PaneId::Cell(i as u8);
            }
        }
        debug!(target = "workspace::store", panes = self.panes.len(), "panes merged");
    }

    /// A pane with zero tabs is transient: fold it away in the same store
    /// transition that emptied it. An emptied home pane absorbs its right
    /// neighbor instead.
    fn merge_empty_panes(&mut self) {
        while self.panes.len() > 1 {
            let empty = self.panes.iter().position(|p| p.tabs.is_empty());
            match empty {
                Some(0) => self.merge_into_previous(1),
                Some(index) => self.merge_into_previous(index),
                None => break,
            }
        }
        if self.panes.len() == 1 && self.panes[0].id == PaneId::Secondary {
            self.panes[0].id = PaneId::Primary;
        }
    }

    // Reconciliation-facing mutators: these honor structural invariants but
    // skip side effects that belong to user-driven operations.

    pub(crate) fn insert_learned(
        &mut self,
        pane: PaneId,
        tab: Tab,
    ) -> Result<PaneId, StoreError> {
        let target = match self.pane(pane) {
            Some(p) if p.has_capacity() => pane,
            _ => self
                .first_pane_with_capacity()
                .ok_or(StoreError::CapacityExceeded { pane })?,
        };
        let entry = self.pane_mut(target)?;
        entry.tabs.push(tab);
        if entry.active.is_none() {
            entry.repair_active();
        }
        Ok(target)
    }

    pub(crate) fn remove_learned(&mut self, tab: &TabId) -> Option<Tab> {
        let pane = self.pane_of(tab)?;
        self.close_tab(pane, tab).ok()
    }
}
