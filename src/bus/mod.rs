//! Event bus module
//!
//! Synchronous in-process fan-out in subscription order, followed by a
//! best-effort relay to other processes. Delivery is at-most-once with no
//! replay; only in-process delivery is ordered.

mod hub;
pub mod payload;
mod relay;
mod types;
mod ws;

pub use hub::RelayHub;
pub use payload::EventPayload;
pub use relay::{LocalRelay, Relay};
pub use types::{BusError, Event, EventName, HandlerError};
pub use ws::{WsRelay, WsRelayConfig};

use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// In-process handler; must not block
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

struct Inner {
    origin: String,
    handlers: RwLock<HashMap<EventName, Vec<Handler>>>,
    relay: Option<Arc<dyn Relay>>,
    listener_started: AtomicBool,
}

/// Publish/subscribe hub for one process
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// A bus with no cross-process relay
    pub fn local(origin: impl Into<String>) -> Self {
        Self::build(origin.into(), None)
    }

    /// A bus that relays to and from other processes
    pub fn with_relay(origin: impl Into<String>, relay: Arc<dyn Relay>) -> Self {
        Self::build(origin.into(), Some(relay))
    }

    fn build(origin: String, relay: Option<Arc<dyn Relay>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                origin,
                handlers: RwLock::new(HashMap::new()),
                relay,
                listener_started: AtomicBool::new(false),
            }),
        }
    }

    /// Identifier stamped on every event this process publishes
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn has_relay(&self) -> bool {
        self.inner.relay.is_some()
    }

    /// Register a handler for exactly one event name
    pub fn subscribe<F>(&self, name: EventName, handler: F)
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let mut handlers = match self.inner.handlers.write() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.entry(name).or_default().push(Arc::new(handler));
    }

    /// Names with at least one handler
    pub fn subscribed_names(&self) -> Vec<EventName> {
        let handlers = match self.inner.handlers.read() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<EventName> = handlers
            .iter()
            .filter(|(_, hs)| !hs.is_empty())
            .map(|(n, _)| *n)
            .collect();
        names.sort();
        names
    }

    /// Publish an event. Never fails: a payload that does not serialize to a
    /// JSON object is logged and dropped.
    pub fn publish(&self, name: EventName, payload: impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => {
                tracing::warn!(event = %name, error = %BusError::PayloadNotObject(name), "Event dropped");
                counter!("hydra_events_dropped_total", "event" => name.as_str()).increment(1);
                return;
            }
            Err(e) => {
                tracing::warn!(event = %name, error = %e, "Event payload failed to serialize, dropped");
                counter!("hydra_events_dropped_total", "event" => name.as_str()).increment(1);
                return;
            }
        };

        let event = Event::new(name, payload, self.inner.origin.clone());
        self.deliver(&event);
        self.relay(&event);
        counter!("hydra_events_published_total", "event" => name.as_str()).increment(1);
    }

    /// Publish a typed payload under its bound name
    pub fn emit<P: EventPayload>(&self, payload: &P) {
        self.publish(P::NAME, payload);
    }

    /// Run the in-process handlers for `event` in subscription order
    pub fn deliver(&self, event: &Event) -> usize {
        let handlers: Vec<Handler> = {
            let map = match self.inner.handlers.read() {
                Ok(h) => h,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.get(&event.name).cloned().unwrap_or_default()
        };

        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(event = %event.name, handler = index, error = %e, "Event handler failed");
                    counter!("hydra_event_handler_failures_total").increment(1);
                }
                Err(_) => {
                    tracing::warn!(event = %event.name, handler = index, "Event handler panicked");
                    counter!("hydra_event_handler_failures_total").increment(1);
                }
            }
        }
        handlers.len()
    }

    fn relay(&self, event: &Event) {
        let Some(relay) = &self.inner.relay else {
            return;
        };
        let frame = match serde_json::to_string(event) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(event = %event.name, error = %e, "Event frame failed to serialize");
                return;
            }
        };
        if let Err(e) = relay.send(&frame) {
            tracing::debug!(event = %event.name, error = %e, "Relay send dropped");
        }
    }

    /// Start delivering relayed events from other processes. Call once at
    /// startup, after registering handlers and before serving traffic.
    pub fn start_listener(&self) -> Result<JoinHandle<()>, BusError> {
        let relay = self.inner.relay.clone().ok_or(BusError::NoRelay)?;
        if self.inner.listener_started.swap(true, Ordering::SeqCst) {
            return Err(BusError::ListenerAlreadyStarted);
        }

        let mut rx = relay.subscribe();
        let bus = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => bus.handle_frame(&frame),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Relay listener lagging, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Relay closed, listener stopping");
                        break;
                    }
                }
            }
        }))
    }

    fn handle_frame(&self, frame: &str) {
        let event: Event = match serde_json::from_str(frame) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed relay frame");
                return;
            }
        };
        if event.origin == self.inner.origin {
            return;
        }
        self.deliver(&event);
    }

    pub fn listener_started(&self) -> bool {
        self.inner.listener_started.load(Ordering::SeqCst)
    }

    /// Reject startup sequences in which relayed events would be lost
    pub fn self_test(&self) -> Result<(), BusError> {
        if self.inner.relay.is_none() {
            return Ok(());
        }
        let names = self.subscribed_names();
        let started = self.listener_started();
        if !names.is_empty() && !started {
            return Err(BusError::HandlersWithoutListener(names));
        }
        if started && names.is_empty() {
            return Err(BusError::ListenerWithoutHandlers);
        }
        Ok(())
    }
}
