//! Cross-process relay abstraction

use super::BusError;
use tokio::sync::broadcast;

const RELAY_CAPACITY: usize = 1024;

/// Best-effort channel carrying serialized events between processes
pub trait Relay: Send + Sync {
    /// Queue one frame without blocking. Frames are dropped, never retried.
    fn send(&self, frame: &str) -> Result<(), BusError>;

    /// A new receiver of frames published by any process
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// In-memory relay shared by buses living in one process
#[derive(Clone)]
pub struct LocalRelay {
    tx: broadcast::Sender<String>,
}

impl LocalRelay {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(RELAY_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay for LocalRelay {
    fn send(&self, frame: &str) -> Result<(), BusError> {
        // No receivers means nobody is listening; at-most-once allows the drop
        let _ = self.tx.send(frame.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}
