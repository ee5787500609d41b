//! Event hand-off to the delivery layer.
//!
//! Delivery itself (HTTP, retries, persistence of outbound calls) lives
//! outside this crate. The engine publishes one [`ScopeEvent`] per triggered
//! scope into a bounded queue; the delivery collaborator consumes them from a
//! [`ScopeEventStream`].

/// Event type.
pub mod event;
/// Producer side.
pub mod sink;
/// Consumer side.
pub mod stream;

pub use event::ScopeEvent;
pub use sink::EventSink;
pub use stream::ScopeEventStream;
