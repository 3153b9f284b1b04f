//! Per-tab output pipeline.
//!
//! Inbound chunks are coalesced and flushed once per render frame. A
//! coalesced backlog above the burst threshold drains in fixed-size
//! slices, one per frame; a single oversized synchronous write is what
//! corrupts the surface under scrollback replay. Authoritative dimension
//! changes pass through a resize barrier: flushing suspends, the resize
//! applies, and writes resume only after the repaint has had two frames
//! to settle.

use std::collections::VecDeque;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};

use crate::terminal::{SurfaceError, TerminalSurface};

/// Backlog size beyond which flushing switches to sliced drains.
pub const BURST_THRESHOLD: usize = 128 * 1024;
/// Slice written per frame while draining a burst.
pub const FRAME_CHUNK_BYTES: usize = 64 * 1024;
/// Frames to wait after a resize before flushing resumes.
const RESIZE_SETTLE_FRAMES: u8 = 2;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

pub struct OutputPipeline {
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    surface: Option<Box<dyn TerminalSurface>>,
    pending_size: Option<(u16, u16)>,
    settle_frames: u8,
    bursting: bool,
}

impl Default for OutputPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputPipeline {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queued_bytes: 0,
            surface: None,
            pending_size: None,
            settle_frames: 0,
            bursting: false,
        }
    }

    /// Bind the rendering surface. Data that arrived before construction
    /// is already queued and drains under the normal chunking rule.
    pub fn bind_surface(
        &mut self,
        mut surface: Box<dyn TerminalSurface>,
    ) -> Result<(), PipelineError> {
        if let Some((cols, rows)) = self.pending_size.take() {
            if surface.size() != (cols, rows) {
                surface.resize(cols, rows)?;
                self.settle_frames = RESIZE_SETTLE_FRAMES;
            }
        }
        self.surface = Some(surface);
        Ok(())
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn pending_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn is_suspended(&self) -> bool {
        self.settle_frames > 0
    }

    /// Queue one inbound chunk. Never writes synchronously.
    pub fn push(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.queued_bytes += data.len();
        self.queue.push_back(data);
        if self.queued_bytes > BURST_THRESHOLD && !self.bursting {
            debug!(
                target = "pipeline::flush",
                queued = self.queued_bytes,
                "burst backlog, switching to sliced drain"
            );
            self.bursting = true;
        }
    }

    /// Authoritative dimensions from the registry. Engages the barrier
    /// only when the geometry actually differs.
    pub fn apply_remote_resize(&mut self, cols: u16, rows: u16) -> Result<(), PipelineError> {
        match self.surface.as_mut() {
            Some(surface) => {
                if surface.size() == (cols, rows) {
                    return Ok(());
                }
                surface.resize(cols, rows)?;
                self.settle_frames = RESIZE_SETTLE_FRAMES;
                debug!(target = "pipeline::resize", cols, rows, "barrier engaged");
            }
            None => {
                self.pending_size = Some((cols, rows));
            }
        }
        Ok(())
    }

    /// A locally-driven resize. Returns the geometry to echo to the
    /// transport, or `None` while an authoritative resize is in flight —
    /// echoing during the barrier would feed the loop that caused it.
    pub fn local_resize(
        &mut self,
        cols: u16,
        rows: u16,
    ) -> Result<Option<(u16, u16)>, PipelineError> {
        if self.is_suspended() {
            trace!(target = "pipeline::resize", cols, rows, "local resize suppressed");
            return Ok(None);
        }
        if let Some(surface) = self.surface.as_mut() {
            if surface.size() != (cols, rows) {
                surface.resize(cols, rows)?;
            }
        } else {
            self.pending_size = Some((cols, rows));
        }
        Ok(Some((cols, rows)))
    }

    /// One render frame: at most one surface write.
    pub fn on_frame(&mut self) -> Result<(), PipelineError> {
        if self.settle_frames > 0 {
            self.settle_frames -= 1;
            return Ok(());
        }
        if self.queued_bytes == 0 {
            self.bursting = false;
            return Ok(());
        }
        let Some(surface) = self.surface.as_mut() else {
            return Ok(());
        };

        let budget = if self.bursting {
            FRAME_CHUNK_BYTES
        } else {
            self.queued_bytes
        };
        let mut payload = Vec::with_capacity(budget.min(self.queued_bytes));
        while payload.len() < budget {
            let Some(mut chunk) = self.queue.pop_front() else {
                break;
            };
            let take = chunk.len().min(budget - payload.len());
            payload.extend_from_slice(&chunk.split_to(take));
            if !chunk.is_empty() {
                self.queue.push_front(chunk);
            }
        }
        self.queued_bytes -= payload.len();
        if self.queued_bytes == 0 {
            self.bursting = false;
        }
        surface.write(&payload)?;
        Ok(())
    }
}
