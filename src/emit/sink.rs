//! Bounded, non-blocking event hand-off.
//!
//! Publishing never blocks the commit path: when the queue is full or the
//! consumer is gone the event is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::warn;

use super::event::ScopeEvent;
use super::stream::ScopeEventStream;

/// Producer side of the event queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<ScopeEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Creates a sink and its consumer stream. A capacity of zero is raised to one.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, ScopeEventStream) {
        let (tx, rx) = bounded::<ScopeEvent>(capacity.max(1));
        let sink = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, ScopeEventStream::new(rx))
    }

    /// Enqueues an event. Returns false if it was dropped.
    pub fn publish(&self, event: ScopeEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(scope = %event.scope, "event queue full; event dropped");
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(scope = %event.scope, "event stream closed; event dropped");
                false
            }
        }
    }

    /// Events dropped so far.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// No events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}
