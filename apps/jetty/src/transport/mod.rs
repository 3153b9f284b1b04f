//! One ordered, reconnecting channel per client.
//!
//! The core never talks to a socket directly: it sends text frames through
//! a [`Transport`] and consumes [`TransportEvent`]s from an mpsc stream.
//! `pair()` builds an in-memory linked pair for tests; `websocket` is the
//! production implementation with a reconnect supervisor.

use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;
pub mod websocket;

pub use mock::pair;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport channel closed")]
    ChannelClosed,
    #[error("transport not connected")]
    NotConnected,
    #[error("transport setup failed: {0}")]
    Setup(String),
}

/// Events delivered to the client loop, in channel order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is up. Fired on the first connect and on every
    /// reconnect; the consumer re-requests canonical state each time.
    Connected,
    /// One inbound text frame.
    Text(String),
    /// The channel dropped; the supervisor is retrying in the background.
    Disconnected,
    /// Retries are exhausted. The only failure that surfaces to the user.
    Failed,
}

pub trait Transport: Send + Sync {
    fn send_text(&self, text: String) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
}

pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;
pub(crate) type EventSender = mpsc::UnboundedSender<TransportEvent>;
