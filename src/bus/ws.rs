//! WebSocket relay client with automatic reconnection

use super::relay::Relay;
use super::BusError;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Relay connection configuration
#[derive(Debug, Clone)]
pub struct WsRelayConfig {
    /// Hub URL, e.g. ws://127.0.0.1:7878
    pub url: String,
    /// Maximum reconnection attempts before giving up (0 = infinite)
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub ping_interval: Duration,
}

impl Default for WsRelayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0,
            initial_reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(30),
            ping_interval: Duration::from_secs(20),
        }
    }
}

impl WsRelayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_reconnect_delay = d;
        self
    }

    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_reconnect_delay = d;
        self
    }
}

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Relay that exchanges frames with a [`RelayHub`](super::RelayHub)
pub struct WsRelay {
    config: WsRelayConfig,
    outbound: mpsc::Sender<String>,
    inbound: broadcast::Sender<String>,
    connected: Arc<AtomicBool>,
}

impl WsRelay {
    /// Spawn the connection task and return immediately
    pub fn connect(config: WsRelayConfig) -> Self {
        let (outbound, out_rx) = mpsc::channel(1024);
        let (inbound, _) = broadcast::channel(1024);
        let connected = Arc::new(AtomicBool::new(false));

        let task_config = config.clone();
        let task_inbound = inbound.clone();
        let task_connected = connected.clone();
        tokio::spawn(async move {
            Self::run_connection_loop(task_config, task_inbound, out_rx, task_connected).await;
        });

        Self {
            config,
            outbound,
            inbound,
            connected,
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn run_connection_loop(
        config: WsRelayConfig,
        inbound: broadcast::Sender<String>,
        mut out_rx: mpsc::Receiver<String>,
        connected: Arc<AtomicBool>,
    ) {
        let mut reconnect_attempts = 0;
        let mut reconnect_delay = config.initial_reconnect_delay;

        loop {
            let result = Self::connect_and_stream(
                &config,
                &inbound,
                &mut out_rx,
                &connected,
                &mut reconnect_attempts,
                &mut reconnect_delay,
            )
            .await;
            connected.store(false, Ordering::SeqCst);

            match result {
                Ok(()) => {
                    tracing::info!("Relay closed by owner");
                    break;
                }
                Err(e) => {
                    reconnect_attempts += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = reconnect_attempts,
                        url = %config.url,
                        "Relay connection error, reconnecting"
                    );

                    if config.max_reconnect_attempts > 0
                        && reconnect_attempts >= config.max_reconnect_attempts
                    {
                        tracing::error!("Max relay reconnection attempts reached");
                        break;
                    }
                    if out_rx.is_closed() {
                        break;
                    }

                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
                }
            }
        }
    }

    async fn connect_and_stream(
        config: &WsRelayConfig,
        inbound: &broadcast::Sender<String>,
        out_rx: &mut mpsc::Receiver<String>,
        connected: &AtomicBool,
        reconnect_attempts: &mut u32,
        reconnect_delay: &mut Duration,
    ) -> Result<(), ConnectionError> {
        let (ws_stream, _response) = connect_async(&config.url)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        tracing::info!(url = %config.url, "Relay connected");
        connected.store(true, Ordering::SeqCst);
        *reconnect_attempts = 0;
        *reconnect_delay = config.initial_reconnect_delay;

        // Frames queued while disconnected are stale
        while out_rx.try_recv().is_ok() {}

        let mut ping_interval = tokio::time::interval(config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut waiting_for_pong = false;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = inbound.send(text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await
                                .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            waiting_for_pong = false;
                        }
                        Some(Ok(Message::Close(_))) => {
                            return Err(ConnectionError::ConnectionFailed("hub closed the connection".into()));
                        }
                        Some(Err(e)) => {
                            return Err(ConnectionError::ConnectionFailed(e.to_string()));
                        }
                        None => {
                            return Err(ConnectionError::ConnectionFailed("stream ended unexpectedly".into()));
                        }
                        _ => {}
                    }
                }

                frame = out_rx.recv() => {
                    match frame {
                        Some(text) => {
                            write.send(Message::Text(text)).await
                                .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    if waiting_for_pong {
                        return Err(ConnectionError::ConnectionFailed("pong timeout".into()));
                    }
                    write.send(Message::Ping(vec![])).await
                        .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
                    waiting_for_pong = true;
                }
            }
        }
    }
}

impl Relay for WsRelay {
    fn send(&self, frame: &str) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::RelayUnavailable(format!(
                "not connected to {}",
                self.config.url
            )));
        }
        self.outbound
            .try_send(frame.to_string())
            .map_err(|e| BusError::RelayUnavailable(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inbound.subscribe()
    }
}
