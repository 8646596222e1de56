//! Connection lifecycle: state transitions, peer acceptance and teardown.
//!
//! ```text
//! Created --resume--> Activated <--resume/suspend--> Suspended
//!    |                    |                              |
//!    +-------- invalidate or terminal error -------------+--> Invalidated
//! ```
//!
//! Invalidated is terminal. Teardown clears every handler, discards parked
//! events, fails every outstanding reply with `ConnectionLost` and cancels the
//! transport handle. The Error handler sees the terminal event before any
//! reply callback learns of the loss.

use std::fmt;

use tracing::{debug, info};

use crate::classifier::Classified;
use crate::connection::{Connection, Role};
use crate::correlator::PendingReply;
use crate::diagnostics::{DropReason, LIFECYCLE_TARGET};
use crate::errors::DispatchError;
use crate::event::{ErrorEvent, Event, EventTag};
use crate::registry::SharedHandler;
use crate::transport::RawHandle;

/// Description attached to the terminal event of an explicit invalidation.
pub const INVALIDATED_BY_APPLICATION: &str = "connection invalidated by application";

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Wrapped but not yet resumed; events are parked.
    Created,
    /// Delivering events to handlers.
    Activated,
    /// Paused by the application; events are parked.
    Suspended,
    /// Torn down. No further events are delivered.
    Invalidated,
}

/// Outcome of applying a lifecycle request to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Apply { from: LifecycleState },
    Unchanged,
    Refused,
}

impl LifecycleState {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Activated => "activated",
            Self::Suspended => "suspended",
            Self::Invalidated => "invalidated",
        }
    }

    /// Whether handlers may still be registered or removed.
    #[must_use]
    pub const fn accepts_registration(self) -> bool {
        !matches!(self, Self::Invalidated)
    }

    /// Whether events are handed to handlers rather than parked.
    #[must_use]
    pub const fn delivers_events(self) -> bool {
        matches!(self, Self::Activated)
    }

    pub(crate) const fn resume(self) -> Transition {
        match self {
            Self::Created | Self::Suspended => Transition::Apply { from: self },
            Self::Activated => Transition::Unchanged,
            Self::Invalidated => Transition::Refused,
        }
    }

    pub(crate) const fn suspend(self) -> Transition {
        match self {
            Self::Activated => Transition::Apply { from: self },
            Self::Suspended => Transition::Unchanged,
            Self::Created | Self::Invalidated => Transition::Refused,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// State captured when a connection is invalidated, released once the lock
/// has been dropped.
struct Teardown {
    connection: Connection,
    error_handler: Option<SharedHandler>,
    event: ErrorEvent,
    pending: Vec<PendingReply>,
}

impl Teardown {
    fn notify_error_handler(connection: &Connection, handler: Option<SharedHandler>, event: ErrorEvent) {
        match handler {
            Some(handler) => handler.handle(connection, Event::Error(event)),
            None => connection
                .core()
                .diagnostics
                .error_unreported(connection.id(), &event),
        }
    }

    fn fail_pending(connection: &Connection, description: &str, pending: Vec<PendingReply>) {
        for reply in pending {
            reply.fail(DispatchError::connection_lost(connection.id(), description));
        }
    }

    /// Runs the Error handler on the current thread, then fails replies.
    fn finish(self) {
        let Self {
            connection,
            error_handler,
            event,
            pending,
        } = self;
        let description = event.description().to_owned();
        Self::notify_error_handler(&connection, error_handler, event);
        Self::fail_pending(&connection, &description, pending);
    }

    /// Enqueues the Error handler, then fails replies behind it.
    fn finish_deferred(self) {
        let Self {
            connection,
            error_handler,
            event,
            pending,
        } = self;
        let description = event.description().to_owned();
        let target = connection.clone();
        connection
            .core()
            .queue
            .enqueue_or_run(move || Self::notify_error_handler(&target, error_handler, event));
        Self::fail_pending(&connection, &description, pending);
    }
}

impl Connection {
    /// Tears the connection down from the application side.
    ///
    /// The Error handler receives one terminal event and every outstanding
    /// reply callback receives `ConnectionLost`, both on the dispatch queue.
    /// Invalidating twice has no further effect.
    pub fn invalidate(&self) {
        if let Some(teardown) = self.begin_teardown(ErrorEvent::terminal(INVALIDATED_BY_APPLICATION)) {
            teardown.finish_deferred();
        }
    }

    /// Handles a terminal error reported by the transport; runs on the
    /// dispatch queue.
    pub(crate) fn fail(&self, error: ErrorEvent) {
        match self.begin_teardown(error) {
            Some(teardown) => teardown.finish(),
            None => self.core().diagnostics.event_dropped(
                self.id(),
                EventTag::Error,
                DropReason::Invalidated,
            ),
        }
    }

    fn begin_teardown(&self, event: ErrorEvent) -> Option<Teardown> {
        let mut state = self.lock_state();
        let from = state.lifecycle;
        if from == LifecycleState::Invalidated {
            return None;
        }
        state.lifecycle = LifecycleState::Invalidated;
        let error_handler = state.handlers.get(EventTag::Error);
        state.handlers.clear();
        if let Some(template) = state.peer_template.as_mut() {
            template.clear();
        }
        let parked: Vec<Classified> = state.backlog.drain(..).collect();
        let pending = state.pending.drain();
        drop(state);

        let core = self.core();
        info!(
            target: LIFECYCLE_TARGET,
            connection = %self.id(),
            terminal_event = event.description(),
            parked = parked.len(),
            outstanding_replies = pending.len(),
            "connection invalidated"
        );
        core.diagnostics
            .state_changed(self.id(), from, LifecycleState::Invalidated);
        for event in parked {
            if let Classified::NewConnection(raw_peer) = event {
                core.transport.cancel(raw_peer);
            }
            core.diagnostics
                .event_dropped(self.id(), event.tag(), DropReason::Invalidated);
        }
        core.transport.cancel(self.raw_handle());

        Some(Teardown {
            connection: self.clone(),
            error_handler,
            event,
            pending,
        })
    }

    /// Wraps a peer accepted by this listener, stamps the listener's peer
    /// template on it, activates it and hands it to the NewConnection
    /// handler.
    pub(crate) fn accept_peer(&self, raw_peer: RawHandle) {
        let core = self.core();
        if self.role() == Role::Peer {
            debug!(
                target: LIFECYCLE_TARGET,
                connection = %self.id(),
                handle = %raw_peer,
                "peer received a connection object; cancelling it"
            );
            core.transport.cancel(raw_peer);
            self.dispatch(Event::Error(Self::unexpected_peer_object(raw_peer)));
            return;
        }

        let template = {
            let state = self.lock_state();
            if state.lifecycle == LifecycleState::Invalidated {
                None
            } else {
                Some(state.peer_template.clone().unwrap_or_default())
            }
        };
        let Some(template) = template else {
            core.transport.cancel(raw_peer);
            core.diagnostics
                .event_dropped(self.id(), EventTag::NewConnection, DropReason::Invalidated);
            return;
        };

        let peer = Self::wrap(core, raw_peer, Role::Peer, Some(self), template);
        core.diagnostics.peer_accepted(self.id(), peer.id());
        if let Err(error) = peer.resume() {
            debug!(
                target: LIFECYCLE_TARGET,
                peer = %peer.id(),
                %error,
                "accepted peer could not be resumed"
            );
        }
        self.dispatch(Event::NewConnection(peer));
    }
}
