//! STS peer client
//!
//! Owns the single logical bidirectional event channel to the STS service.
//! On unexpected disconnect, reconnection follows exponential backoff
//! (2 s, 4 s, 8 s, 16 s, 32 s); each successful connect re-sends
//! `stream:init`, and the consumer treats the reconnection as a new session
//! segment with a fresh sequence baseline. Exhausting the attempts is fatal
//! to the worker so a supervisor can restart it.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use livedub_core::events::{ClientEvent, ServerEvent, StreamConfig};

/// Peer client configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub url: String,
    /// First backoff step; subsequent steps double.
    pub backoff_initial: Duration,
    /// Reconnection attempts before giving up.
    pub max_attempts: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            backoff_initial: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

/// Backoff before reconnect attempt `attempt` (1-based): 2, 4, 8, 16, 32 s.
pub fn backoff_delay(config: &PeerConfig, attempt: u32) -> Duration {
    config.backoff_initial * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Notifications delivered to the worker runner.
#[derive(Debug)]
pub enum PeerNotification {
    /// Channel (re)established and `stream:init` sent. `reconnect` is false
    /// for the first connect of the process.
    Connected { reconnect: bool },
    /// Inbound event from the STS service.
    Event(ServerEvent),
    /// Channel lost; the runner must resolve in-flight work with fallback.
    Disconnected,
    /// Reconnection attempts exhausted; the worker must exit non-zero.
    Fatal,
}

/// Handle for sending outbound events.
#[derive(Clone)]
pub struct PeerHandle {
    tx: mpsc::Sender<ClientEvent>,
}

impl PeerHandle {
    /// Wrap an existing outbound channel (alternate transports, tests).
    pub fn from_channel(tx: mpsc::Sender<ClientEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event for the peer. Returns false if the client is gone.
    pub async fn send(&self, event: ClientEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Spawn the peer client task.
///
/// Returns the outbound handle and the notification stream.
pub fn spawn_peer(
    config: PeerConfig,
    stream_config: StreamConfig,
) -> (PeerHandle, mpsc::Receiver<PeerNotification>, tokio::task::JoinHandle<()>) {
    let (out_tx, out_rx) = mpsc::channel::<ClientEvent>(64);
    let (notify_tx, notify_rx) = mpsc::channel::<PeerNotification>(64);

    let task = tokio::spawn(run_peer(config, stream_config, out_rx, notify_tx));

    (PeerHandle { tx: out_tx }, notify_rx, task)
}

async fn run_peer(
    config: PeerConfig,
    stream_config: StreamConfig,
    mut out_rx: mpsc::Receiver<ClientEvent>,
    notify_tx: mpsc::Sender<PeerNotification>,
) {
    let mut attempt: u32 = 0;
    let mut ever_connected = false;

    loop {
        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((mut ws, _)) => {
                tracing::info!(url = %config.url, reconnect = ever_connected, "STS peer connected");

                // Stale outbound events belong to the previous session
                // segment; drop them before the fresh init.
                while out_rx.try_recv().is_ok() {}

                let init = ClientEvent::StreamInit {
                    config: stream_config.clone(),
                };
                let init_text = match serde_json::to_string(&init) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "cannot serialize stream:init");
                        let _ = notify_tx.send(PeerNotification::Fatal).await;
                        return;
                    }
                };
                if ws.send(Message::Text(init_text)).await.is_err() {
                    tracing::warn!("connection lost before stream:init");
                } else {
                    if notify_tx
                        .send(PeerNotification::Connected {
                            reconnect: ever_connected,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    ever_connected = true;
                    attempt = 0;

                    pump(&mut ws, &mut out_rx, &notify_tx).await;
                }

                if notify_tx.send(PeerNotification::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "STS peer connect failed");
            }
        }

        attempt += 1;
        if attempt > config.max_attempts {
            tracing::error!(
                attempts = config.max_attempts,
                "STS peer reconnection exhausted"
            );
            let _ = notify_tx.send(PeerNotification::Fatal).await;
            return;
        }

        let delay = backoff_delay(&config, attempt);
        tracing::info!(attempt, delay_s = delay.as_secs(), "STS peer reconnect backoff");
        tokio::time::sleep(delay).await;
    }
}

/// Pump messages both ways until the socket drops.
async fn pump(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    out_rx: &mut mpsc::Receiver<ClientEvent>,
    notify_tx: &mpsc::Sender<PeerNotification>,
) {
    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(event) = outbound else {
                    // Runner dropped the handle: close cleanly.
                    let _ = ws.close(None).await;
                    return;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "cannot serialize client event");
                        continue;
                    }
                };
                if ws.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            inbound = ws.next() => {
                let Some(Ok(message)) = inbound else {
                    return;
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if notify_tx.send(PeerNotification::Event(event)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "unparseable server event");
                        }
                    },
                    Message::Close(_) => return,
                    Message::Ping(payload) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let config = PeerConfig::default();
        let delays: Vec<u64> = (1..=5)
            .map(|attempt| backoff_delay(&config, attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
    }

    #[test]
    fn test_backoff_cumulative_schedule() {
        // Attempts land at t+2, t+6, t+14, t+30, t+62 seconds.
        let config = PeerConfig::default();
        let mut t = 0u64;
        let mut marks = Vec::new();
        for attempt in 1..=5 {
            t += backoff_delay(&config, attempt).as_secs();
            marks.push(t);
        }
        assert_eq!(marks, vec![2, 6, 14, 30, 62]);
    }

    #[tokio::test]
    async fn test_fatal_after_exhausted_attempts() {
        // No server on this port; with tiny backoff the client burns through
        // its attempts and signals Fatal.
        let config = PeerConfig {
            url: "ws://127.0.0.1:1/ws".to_string(),
            backoff_initial: Duration::from_millis(1),
            max_attempts: 2,
        };
        let (_handle, mut notify, task) = spawn_peer(config, StreamConfig::default());

        let mut saw_fatal = false;
        while let Some(notification) = notify.recv().await {
            if matches!(notification, PeerNotification::Fatal) {
                saw_fatal = true;
                break;
            }
        }
        assert!(saw_fatal);
        let _ = task.await;
    }
}
