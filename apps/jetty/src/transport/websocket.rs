//! WebSocket transport with a reconnect supervisor.
//!
//! The supervisor owns the socket lifecycle: it dials, pumps frames, and
//! on a drop backs off exponentially (with jitter) before redialing. Each
//! successful dial resets the attempt counter and emits `Connected`, so
//! the consumer can re-request canonical state. Only an exhausted retry
//! budget surfaces as `Failed`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{EventReceiver, EventSender, Transport, TransportError, TransportEvent};

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub url: String,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_attempts: 6,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }

    /// Normalize to a ws:// url; localhost becomes 127.0.0.1 to avoid the
    /// IPv6 preference on some platforms.
    pub fn build_url(&self) -> String {
        let mut url = self.url.clone();
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            url = format!("ws://{url}");
        }
        if url.contains("localhost") {
            url = url.replace("localhost", "127.0.0.1");
        }
        url
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_backoff);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter_ms)
    }
}

pub struct WebSocketTransport {
    out_tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// Spawn the supervisor and return the send handle plus the event
    /// stream. The first dial happens inside the supervisor, so callers
    /// see `Connected` as an event rather than a return value.
    pub fn spawn(config: WebSocketConfig) -> (Arc<Self>, EventReceiver) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let transport = Arc::new(Self {
            out_tx,
            connected: connected.clone(),
        });
        tokio::spawn(supervise(config, event_tx, out_rx, connected));
        (transport, event_rx)
    }
}

impl Transport for WebSocketTransport {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.out_tx
            .send(text)
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn supervise(
    config: WebSocketConfig,
    events: EventSender,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
) {
    let url = config.build_url();
    if let Err(err) = url::Url::parse(&url) {
        warn!(target = "transport::ws", %url, error = %err, "invalid server url");
        let _ = events.send(TransportEvent::Failed);
        return;
    }
    let mut attempt: u32 = 0;

    loop {
        match connect_async(&url).await {
            Ok((stream, _)) => {
                attempt = 0;
                connected.store(true, Ordering::SeqCst);
                if events.send(TransportEvent::Connected).is_err() {
                    return;
                }
                debug!(target = "transport::ws", %url, "channel up");

                let (mut sink, mut source) = stream.split();
                loop {
                    tokio::select! {
                        outbound = out_rx.recv() => match outbound {
                            Some(text) => {
                                if sink.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            None => return,
                        },
                        inbound = source.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                if events.send(TransportEvent::Text(text)).is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Binary(bytes))) => {
                                match String::from_utf8(bytes) {
                                    Ok(text) => {
                                        if events.send(TransportEvent::Text(text)).is_err() {
                                            return;
                                        }
                                    }
                                    Err(_) => {
                                        warn!(target = "transport::ws", "dropping non-utf8 binary frame");
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                    }
                }

                connected.store(false, Ordering::SeqCst);
                if events.send(TransportEvent::Disconnected).is_err() {
                    return;
                }
                debug!(target = "transport::ws", %url, "channel dropped");
            }
            Err(err) => {
                debug!(target = "transport::ws", %url, error = %err, "dial failed");
            }
        }

        attempt += 1;
        if attempt >= config.max_attempts {
            warn!(
                target = "transport::ws",
                %url,
                attempts = attempt,
                "retry budget exhausted"
            );
            let _ = events.send(TransportEvent::Failed);
            return;
        }
        tokio::time::sleep(config.backoff_for(attempt)).await;
    }
}
