use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{EvaluationError, ScopeError, ScopeResult};

use super::event::ScopeEvent;

/// Consumer side of the event queue, held by the delivery collaborator.
#[derive(Debug)]
pub struct ScopeEventStream {
    rx: Receiver<ScopeEvent>,
}

impl ScopeEventStream {
    pub(crate) const fn new(rx: Receiver<ScopeEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> ScopeResult<ScopeEvent> {
        self.rx.recv().map_err(|_| ScopeError::Disconnected {
            path: "scope_event_stream".to_string(),
        })
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> ScopeResult<ScopeEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ScopeError::Evaluation(EvaluationError::Timeout {
                operation: "scope_event_stream".to_string(),
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => ScopeError::Disconnected {
                path: "scope_event_stream".to_string(),
            },
        })
    }

    /// The next event if one is queued.
    #[must_use]
    pub fn try_recv(&self) -> Option<ScopeEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued.
    #[must_use]
    pub fn drain(&self) -> Vec<ScopeEvent> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::EventSink;

    #[test]
    fn recv_timeout_on_empty_queue() {
        let (_sink, stream) = EventSink::bounded(2);
        let err = stream.recv_timeout(Duration::from_millis(5)).unwrap_err();
        assert!(err.is_evaluation());
    }

    #[test]
    fn recv_after_sink_dropped_is_disconnected() {
        let (sink, stream) = EventSink::bounded(2);
        drop(sink);
        assert!(matches!(stream.recv(), Err(ScopeError::Disconnected { .. })));
        assert!(stream.drain().is_empty());
    }
}
