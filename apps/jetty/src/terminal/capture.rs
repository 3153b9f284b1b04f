//! Recording surface used by tests and headless embedders.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{SurfaceError, TerminalSurface};

/// One surface write, stamped with the geometry in force when it landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedWrite {
    pub cols: u16,
    pub rows: u16,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct CaptureState {
    cols: u16,
    rows: u16,
    writes: Vec<CapturedWrite>,
    resizes: Vec<(u16, u16)>,
}

/// Shared handle onto a [`CaptureSurface`]'s recorded history.
#[derive(Clone, Default)]
pub struct CaptureHandle {
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureHandle {
    pub fn writes(&self) -> Vec<CapturedWrite> {
        self.state.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.state.lock().resizes.clone()
    }

    pub fn total_bytes(&self) -> usize {
        self.state.lock().writes.iter().map(|w| w.data.len()).sum()
    }
}

pub struct CaptureSurface {
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureSurface {
    pub fn new(cols: u16, rows: u16) -> (Self, CaptureHandle) {
        let handle = CaptureHandle::default();
        {
            let mut state = handle.state.lock();
            state.cols = cols;
            state.rows = rows;
        }
        (
            Self {
                state: handle.state.clone(),
            },
            handle,
        )
    }
}

impl TerminalSurface for CaptureSurface {
    fn write(&mut self, data: &[u8]) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        let (cols, rows) = (state.cols, state.rows);
        state.writes.push(CapturedWrite {
            cols,
            rows,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        state.cols = cols;
        state.rows = rows;
        state.resizes.push((cols, rows));
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        let state = self.state.lock();
        (state.cols, state.rows)
    }
}
