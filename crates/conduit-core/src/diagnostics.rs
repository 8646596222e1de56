//! Observable signals for lifecycle changes and dropped events.
//!
//! The core never swallows an event silently: whenever one is discarded, or a
//! connection changes state, the configured [`DiagnosticSink`] is told.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::connection::ConnectionId;
use crate::event::{ErrorEvent, EventTag};
use crate::lifecycle::LifecycleState;

/// Tracing target for lifecycle diagnostics.
pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");
/// Tracing target for event delivery diagnostics.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Why an event was discarded instead of reaching a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// No handler was registered for the event's tag.
    Unhandled,
    /// The connection had already been invalidated.
    Invalidated,
    /// The message validator refused the payload.
    Rejected,
    /// The dispatch queue had shut down.
    QueueClosed,
}

impl DropReason {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unhandled => "unhandled",
            Self::Invalidated => "invalidated",
            Self::Rejected => "rejected",
            Self::QueueClosed => "queue_closed",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Receives diagnostic signals from the core.
///
/// Sinks are invoked from transport threads and from the dispatch queue and
/// must not call back into the core.
pub trait DiagnosticSink: Send + Sync + 'static {
    /// A connection moved between lifecycle states.
    fn state_changed(&self, connection: ConnectionId, from: LifecycleState, to: LifecycleState);

    /// A listener accepted a peer and stamped its template handlers on it.
    fn peer_accepted(&self, listener: ConnectionId, peer: ConnectionId);

    /// An event was discarded.
    fn event_dropped(&self, connection: ConnectionId, tag: EventTag, reason: DropReason);

    /// An error event arrived with no Error handler registered.
    fn error_unreported(&self, connection: ConnectionId, error: &ErrorEvent);

    /// A connection was activated before any Error handler was registered.
    fn activated_without_error_handler(&self, connection: ConnectionId);
}

impl<T> DiagnosticSink for Arc<T>
where
    T: DiagnosticSink,
{
    fn state_changed(&self, connection: ConnectionId, from: LifecycleState, to: LifecycleState) {
        (**self).state_changed(connection, from, to);
    }

    fn peer_accepted(&self, listener: ConnectionId, peer: ConnectionId) {
        (**self).peer_accepted(listener, peer);
    }

    fn event_dropped(&self, connection: ConnectionId, tag: EventTag, reason: DropReason) {
        (**self).event_dropped(connection, tag, reason);
    }

    fn error_unreported(&self, connection: ConnectionId, error: &ErrorEvent) {
        (**self).error_unreported(connection, error);
    }

    fn activated_without_error_handler(&self, connection: ConnectionId) {
        (**self).activated_without_error_handler(connection);
    }
}

/// Emits diagnostics as structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredDiagnostics;

impl StructuredDiagnostics {
    /// Builds a new tracing-backed sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DiagnosticSink for StructuredDiagnostics {
    fn state_changed(&self, connection: ConnectionId, from: LifecycleState, to: LifecycleState) {
        info!(
            target: LIFECYCLE_TARGET,
            event = "state_changed",
            %connection,
            from = from.as_str(),
            to = to.as_str(),
            "connection state changed"
        );
    }

    fn peer_accepted(&self, listener: ConnectionId, peer: ConnectionId) {
        info!(
            target: LIFECYCLE_TARGET,
            event = "peer_accepted",
            %listener,
            %peer,
            "listener accepted peer connection"
        );
    }

    fn event_dropped(&self, connection: ConnectionId, tag: EventTag, reason: DropReason) {
        debug!(
            target: DISPATCH_TARGET,
            event = "event_dropped",
            %connection,
            tag = tag.as_str(),
            reason = reason.as_str(),
            "event discarded"
        );
    }

    fn error_unreported(&self, connection: ConnectionId, error: &ErrorEvent) {
        warn!(
            target: DISPATCH_TARGET,
            event = "error_unreported",
            %connection,
            terminal = error.is_terminal(),
            description = error.description(),
            "connection error with no error handler"
        );
    }

    fn activated_without_error_handler(&self, connection: ConnectionId) {
        warn!(
            target: LIFECYCLE_TARGET,
            event = "activated_without_error_handler",
            %connection,
            "connection activated before an error handler was registered"
        );
    }
}
