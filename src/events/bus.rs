//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`] so the supervisor and its
//! background monitors can broadcast [`Event`]s to multiple subscribers
//! simultaneously (the daemon's log listener, tests, future observers).
//!
//! ## Key characteristics:
//! - **Broadcast semantics**: all active subscribers receive a clone
//! - **Non-persistent**: events are lost if there are no subscribers
//! - **Bounded capacity**: slow subscribers lag and skip old events
//!
//! The bus carries observability only. Control flow inside the supervisor
//! travels through its serialized message queue, never through the bus.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// If there are no active subscribers the event is dropped silently;
    /// the daemon operates fine without observers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
