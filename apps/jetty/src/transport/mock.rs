//! In-memory transport pair for tests and in-process wiring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::{EventReceiver, EventSender, Transport, TransportError, TransportEvent};

pub struct PairedTransport {
    peer_tx: EventSender,
    local_tx: EventSender,
    connected: Arc<AtomicBool>,
}

impl PairedTransport {
    /// Simulate a channel drop: both ends observe `Disconnected`.
    pub fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.peer_tx.send(TransportEvent::Disconnected);
            let _ = self.local_tx.send(TransportEvent::Disconnected);
        }
    }

    /// Simulate the supervisor re-establishing the channel.
    pub fn reopen(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            let _ = self.peer_tx.send(TransportEvent::Connected);
            let _ = self.local_tx.send(TransportEvent::Connected);
        }
    }
}

impl Transport for PairedTransport {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.peer_tx
            .send(TransportEvent::Text(text))
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Build two linked ends. Everything sent on one end arrives as a `Text`
/// event on the other; both receivers open with a `Connected` event.
pub fn pair() -> (
    (Arc<PairedTransport>, EventReceiver),
    (Arc<PairedTransport>, EventReceiver),
) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(true));

    let _ = left_tx.send(TransportEvent::Connected);
    let _ = right_tx.send(TransportEvent::Connected);

    let left = Arc::new(PairedTransport {
        peer_tx: right_tx.clone(),
        local_tx: left_tx.clone(),
        connected: connected.clone(),
    });
    let right = Arc::new(PairedTransport {
        peer_tx: left_tx,
        local_tx: right_tx,
        connected,
    });
    ((left, left_rx), (right, right_rx))
}
