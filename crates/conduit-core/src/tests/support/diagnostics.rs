//! Test double for [`DiagnosticSink`] that records every signal.

use std::sync::Mutex;

use crate::connection::ConnectionId;
use crate::diagnostics::{DiagnosticSink, DropReason};
use crate::event::{ErrorEvent, EventTag};
use crate::lifecycle::LifecycleState;

/// Diagnostic signals captured during a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// A lifecycle transition.
    StateChanged {
        connection: ConnectionId,
        from: LifecycleState,
        to: LifecycleState,
    },
    /// A listener accepted a peer.
    PeerAccepted {
        listener: ConnectionId,
        peer: ConnectionId,
    },
    /// An event was dropped.
    Dropped {
        connection: ConnectionId,
        tag: EventTag,
        reason: DropReason,
    },
    /// An error had no handler to report to.
    ErrorUnreported {
        connection: ConnectionId,
        description: String,
    },
    /// A connection resumed without an Error handler.
    ActivatedWithoutErrorHandler(ConnectionId),
}

/// Records diagnostics for assertions.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingDiagnostics {
    /// Copy of the recorded signals.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .expect("diagnostics mutex poisoned")
            .clone()
    }

    /// Drop reasons recorded for `connection`, in order.
    pub fn drops_for(&self, connection: ConnectionId) -> Vec<(EventTag, DropReason)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DiagnosticEvent::Dropped {
                    connection: dropped,
                    tag,
                    reason,
                } if dropped == connection => Some((tag, reason)),
                _ => None,
            })
            .collect()
    }

    /// States `connection` moved into, in order.
    pub fn transitions_of(&self, connection: ConnectionId) -> Vec<LifecycleState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DiagnosticEvent::StateChanged {
                    connection: changed,
                    to,
                    ..
                } if changed == connection => Some(to),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: DiagnosticEvent) {
        self.events
            .lock()
            .expect("diagnostics mutex poisoned")
            .push(event);
    }
}

impl DiagnosticSink for RecordingDiagnostics {
    fn state_changed(&self, connection: ConnectionId, from: LifecycleState, to: LifecycleState) {
        self.record(DiagnosticEvent::StateChanged {
            connection,
            from,
            to,
        });
    }

    fn peer_accepted(&self, listener: ConnectionId, peer: ConnectionId) {
        self.record(DiagnosticEvent::PeerAccepted { listener, peer });
    }

    fn event_dropped(&self, connection: ConnectionId, tag: EventTag, reason: DropReason) {
        self.record(DiagnosticEvent::Dropped {
            connection,
            tag,
            reason,
        });
    }

    fn error_unreported(&self, connection: ConnectionId, error: &ErrorEvent) {
        self.record(DiagnosticEvent::ErrorUnreported {
            connection,
            description: error.description().to_owned(),
        });
    }

    fn activated_without_error_handler(&self, connection: ConnectionId) {
        self.record(DiagnosticEvent::ActivatedWithoutErrorHandler(connection));
    }
}
