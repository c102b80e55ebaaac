//! Relay hub: fans each text frame out to every other connected peer

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// WebSocket fan-out hub for cross-process events
pub struct RelayHub {
    listener: TcpListener,
    frames: broadcast::Sender<(u64, String)>,
    next_peer: Arc<AtomicU64>,
}

impl RelayHub {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (frames, _) = broadcast::channel(4096);
        Ok(Self {
            listener,
            frames,
            next_peer: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept peers until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "Relay hub listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    let peer_id = self.next_peer.fetch_add(1, Ordering::SeqCst);
                    let frames = self.frames.clone();
                    let peer_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_peer(stream, peer_id, frames, peer_shutdown).await {
                            tracing::debug!(peer_id, %peer_addr, error = %e, "Relay peer ended");
                        }
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Relay hub stopping");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn serve_peer(
    stream: TcpStream,
    peer_id: u64,
    frames: broadcast::Sender<(u64, String)>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws = accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let mut rx = frames.subscribe();
    tracing::info!(peer_id, "Relay peer connected");

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = frames.send((peer_id, text));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(peer_id, "Relay peer disconnected");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e),
                    _ => {}
                }
            }
            frame = rx.recv() => {
                match frame {
                    Ok((from, text)) if from != peer_id => {
                        write.send(Message::Text(text)).await?;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(peer_id, skipped, "Relay peer lagging, frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}
