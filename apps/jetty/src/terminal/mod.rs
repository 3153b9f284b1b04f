//! Rendering-surface contract.
//!
//! Terminal emulation lives outside the core; the pipeline only needs a
//! write/resize seam. Construction failure is non-recoverable: it bubbles
//! to the embedder, which may offer a full reload. No partial recovery of
//! a corrupted surface is attempted.

use thiserror::Error;

pub mod capture;

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("surface construction failed: {0}")]
    Construction(String),
    #[error("surface write failed: {0}")]
    Write(String),
}

pub trait TerminalSurface: Send {
    fn write(&mut self, data: &[u8]) -> Result<(), SurfaceError>;
    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), SurfaceError>;
    fn size(&self) -> (u16, u16);
}
