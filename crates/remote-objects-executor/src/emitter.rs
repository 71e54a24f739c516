//! Named events expressions can wait for.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use rhai::Dynamic;
use tokio::sync::oneshot;

use crate::{deferred::Deferred, namespace::HostHandle};

type Listeners = HashMap<String, Vec<oneshot::Sender<Dynamic>>>;

/// Event source with one-shot listeners.
///
/// Expressions wait for an event with `until(emitter).once("ready")`, which
/// evaluates to a [`Deferred`] that settles with the value of the next
/// `emit("ready", value)`. Clones share their listeners.
#[derive(Clone, Default)]
pub struct Emitter {
    listeners: Arc<Mutex<Listeners>>,
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next `event`.
    #[must_use]
    pub fn once(&self, event: &str) -> Deferred {
        let (tx, rx) = oneshot::channel();
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.entry(event.to_string()).or_default().push(tx),
            Err(_) => return Deferred::settled(Err("Emitter is poisoned".into())),
        }

        let event = event.to_string();
        Deferred::from_future(async move {
            rx.await
                .map_err(|_| format!("Emitter dropped before '{event}' was emitted"))
        })
    }

    /// Settle every listener waiting for `event` and return how many there
    /// were.
    pub fn emit(&self, event: &str, value: &Dynamic) -> usize {
        let waiting = self
            .listeners
            .lock()
            .ok()
            .and_then(|mut listeners| listeners.remove(event))
            .unwrap_or_default();

        let delivered = waiting
            .into_iter()
            .filter_map(|tx| tx.send(value.clone()).ok())
            .count();
        tracing::debug!(event, delivered, "Event emitted");
        delivered
    }

    /// Number of listeners waiting for `event`.
    #[must_use]
    pub fn listeners(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .map(|listeners| listeners.get(event).map_or(0, Vec::len))
            .unwrap_or_default()
    }
}

impl HostHandle for Emitter {
    fn identity(&self) -> usize {
        Arc::as_ptr(&self.listeners) as usize
    }
}
