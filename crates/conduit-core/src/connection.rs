//! Connection handles and event delivery.
//!
//! A [`Connection`] wraps one transport handle. All mutable state lives
//! behind a per-connection mutex; handlers are always invoked after that
//! mutex has been released, so they may freely call back into the core.
//!
//! Raw events arrive on transport threads and are immediately enqueued on
//! the dispatch queue. Everything below [`Connection::receive`] therefore
//! runs serially on the queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use crate::classifier::{Classified, classify};
use crate::correlator::PendingReplies;
use crate::diagnostics::{DISPATCH_TARGET, DropReason};
use crate::dispatcher::Core;
use crate::errors::DispatchError;
use crate::event::{ErrorEvent, Event, EventTag};
use crate::lifecycle::{LifecycleState, Transition};
use crate::registry::{EventHandler, HandlerSet, SharedHandler};
use crate::transport::{RawEvent, RawEventCallback, RawHandle};

/// Core-issued identifier, unique for the lifetime of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Builds an identifier from its numeric value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Numeric value of the identifier.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Whether a connection accepts peers or exchanges messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Published endpoint that accepts peers.
    Listener,
    /// Endpoint that exchanges messages with one remote party.
    Peer,
}

impl Role {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Listener => "listener",
            Self::Peer => "peer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

pub(crate) struct ConnectionState {
    pub(crate) lifecycle: LifecycleState,
    pub(crate) handlers: HandlerSet,
    pub(crate) peer_template: Option<HandlerSet>,
    pub(crate) backlog: VecDeque<Classified>,
    pub(crate) pending: PendingReplies,
}

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    raw: RawHandle,
    role: Role,
    pub(crate) core: Arc<Core>,
    listener: Option<Weak<ConnectionInner>>,
    state: Mutex<ConnectionState>,
}

/// Handle to a managed connection.
///
/// Clones refer to the same connection. The transport keeps the connection
/// alive until it is invalidated, even when the application drops every
/// handle.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wraps `raw` and routes its transport events through the dispatch
    /// queue. The connection starts in the Created state.
    pub(crate) fn wrap(
        core: &Arc<Core>,
        raw: RawHandle,
        role: Role,
        listener: Option<&Self>,
        handlers: HandlerSet,
    ) -> Self {
        let peer_template = match role {
            Role::Listener => Some(HandlerSet::new()),
            Role::Peer => None,
        };
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: core.next_connection_id(),
                raw,
                role,
                core: Arc::clone(core),
                listener: listener.map(|owner| Arc::downgrade(&owner.inner)),
                state: Mutex::new(ConnectionState {
                    lifecycle: LifecycleState::Created,
                    handlers,
                    peer_template,
                    backlog: VecDeque::new(),
                    pending: PendingReplies::default(),
                }),
            }),
        };
        core.transport
            .set_event_callback(raw, connection.event_callback());
        debug!(
            target: DISPATCH_TARGET,
            connection = %connection.id(),
            handle = %raw,
            role = role.as_str(),
            "connection wrapped"
        );
        connection
    }

    // The callback holds a strong reference; cancelling the handle releases
    // it and with it the transport's hold on the connection.
    //
    // Terminal errors must still tear the connection down once the queue has
    // closed, or outstanding replies would never settle.
    fn event_callback(&self) -> RawEventCallback {
        let connection = self.clone();
        Arc::new(move |raw: RawEvent| {
            let target = connection.clone();
            let queue = &connection.inner.core.queue;
            if matches!(raw, RawEvent::Error(error) if error.is_terminal()) {
                queue.enqueue_or_detach(move || target.receive(raw));
            } else if queue.enqueue(move || target.receive(raw)).is_err() {
                connection.inner.core.diagnostics.event_dropped(
                    connection.id(),
                    EventTag::Error,
                    DropReason::QueueClosed,
                );
            }
        })
    }

    /// Core-issued identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Transport handle backing this connection.
    #[must_use]
    pub fn raw_handle(&self) -> RawHandle {
        self.inner.raw
    }

    /// Listener or peer.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock_state().lifecycle
    }

    /// Whether the connection has been invalidated.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.state() == LifecycleState::Invalidated
    }

    /// Listener that accepted this peer, while that listener is alive.
    #[must_use]
    pub fn listener(&self) -> Option<Self> {
        self.inner
            .listener
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Self { inner })
    }

    /// Whether a handler is currently registered for `tag`.
    #[must_use]
    pub fn has_handler(&self, tag: EventTag) -> bool {
        self.lock_state().handlers.handles(tag)
    }

    /// Number of events parked until the connection is activated.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.lock_state().backlog.len()
    }

    // A handler panicking cannot poison this mutex because handlers never
    // run while it is held.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.inner.core
    }

    /// Registers `handler` for `tag`, replacing any previous handler.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidState` once the connection has been
    /// invalidated.
    pub fn register(&self, tag: EventTag, handler: impl EventHandler) -> Result<(), DispatchError> {
        self.register_shared(tag, Arc::new(handler))
    }

    /// Registers an already shared handler for `tag`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidState` once the connection has been
    /// invalidated.
    pub fn register_shared(&self, tag: EventTag, handler: SharedHandler) -> Result<(), DispatchError> {
        let mut state = self.lock_state();
        if !state.lifecycle.accepts_registration() {
            return Err(DispatchError::invalid_state(
                self.id(),
                state.lifecycle,
                "register a handler on",
            ));
        }
        if state.handlers.insert(tag, handler).is_some() {
            debug!(
                target: DISPATCH_TARGET,
                connection = %self.id(),
                tag = tag.as_str(),
                "handler replaced"
            );
        }
        Ok(())
    }

    /// Registers `handler` under a tag given by name.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidTag` when `tag` names no event tag, and
    /// `DispatchError::InvalidState` once the connection has been invalidated.
    pub fn register_named(&self, tag: &str, handler: impl EventHandler) -> Result<(), DispatchError> {
        let tag = EventTag::parse(tag)?;
        self.register(tag, handler)
    }

    /// Removes the handler for `tag`, returning whether one was registered.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidState` once the connection has been
    /// invalidated.
    pub fn unregister(&self, tag: EventTag) -> Result<bool, DispatchError> {
        let mut state = self.lock_state();
        if !state.lifecycle.accepts_registration() {
            return Err(DispatchError::invalid_state(
                self.id(),
                state.lifecycle,
                "unregister a handler on",
            ));
        }
        Ok(state.handlers.remove(tag).is_some())
    }

    /// Registers `handler` for every tag and activates the connection.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidState` once the connection has been
    /// invalidated.
    pub fn set_service_handler(&self, handler: impl EventHandler) -> Result<(), DispatchError> {
        let shared: SharedHandler = Arc::new(handler);
        for tag in EventTag::ALL {
            self.register_shared(tag, Arc::clone(&shared))?;
        }
        self.resume()
    }

    /// Registers `handler` in the template stamped onto peers this listener
    /// accepts from now on.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidState` when called on a peer or once
    /// the connection has been invalidated.
    pub fn register_peer_handler(
        &self,
        tag: EventTag,
        handler: impl EventHandler,
    ) -> Result<(), DispatchError> {
        let mut state = self.lock_state();
        let lifecycle = state.lifecycle;
        match state.peer_template.as_mut() {
            Some(template) if lifecycle.accepts_registration() => {
                template.insert(tag, Arc::new(handler));
                Ok(())
            }
            _ => Err(DispatchError::invalid_state(
                self.id(),
                lifecycle,
                "register a peer handler on",
            )),
        }
    }

    /// Starts event delivery. Events parked while the connection was
    /// created or suspended are dispatched first, in arrival order.
    ///
    /// Resuming an active connection has no effect.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidState` once the connection has been
    /// invalidated.
    pub fn resume(&self) -> Result<(), DispatchError> {
        let mut state = self.lock_state();
        let from = match state.lifecycle.resume() {
            Transition::Apply { from } => from,
            Transition::Unchanged => return Ok(()),
            Transition::Refused => {
                return Err(DispatchError::invalid_state(
                    self.id(),
                    state.lifecycle,
                    "resume",
                ));
            }
        };
        state.lifecycle = LifecycleState::Activated;
        let missing_error_handler =
            from == LifecycleState::Created && !state.handlers.handles(EventTag::Error);
        let flush = !state.backlog.is_empty();
        drop(state);

        let core = self.core();
        core.diagnostics
            .state_changed(self.id(), from, LifecycleState::Activated);
        if missing_error_handler {
            core.diagnostics.activated_without_error_handler(self.id());
        }
        if flush {
            self.schedule_flush();
        }
        core.transport.resume(self.inner.raw);
        Ok(())
    }

    /// Pauses event delivery. Events arriving meanwhile are parked.
    ///
    /// Suspending a suspended connection has no effect.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidState` unless the connection is active
    /// or already suspended.
    pub fn suspend(&self) -> Result<(), DispatchError> {
        let mut state = self.lock_state();
        let from = match state.lifecycle.suspend() {
            Transition::Apply { from } => from,
            Transition::Unchanged => return Ok(()),
            Transition::Refused => {
                return Err(DispatchError::invalid_state(
                    self.id(),
                    state.lifecycle,
                    "suspend",
                ));
            }
        };
        state.lifecycle = LifecycleState::Suspended;
        drop(state);

        let core = self.core();
        core.diagnostics
            .state_changed(self.id(), from, LifecycleState::Suspended);
        core.transport.suspend(self.inner.raw);
        Ok(())
    }

    /// Entry point for a raw transport event; runs on the dispatch queue.
    fn receive(&self, raw: RawEvent) {
        let classified = classify(self.core().transport.as_ref(), raw);
        self.deliver(classified);
    }

    fn deliver(&self, classified: Classified) {
        let mut state = self.lock_state();
        match state.lifecycle {
            LifecycleState::Invalidated => {
                drop(state);
                if let Classified::NewConnection(raw_peer) = classified {
                    self.core().transport.cancel(raw_peer);
                }
                self.core().diagnostics.event_dropped(
                    self.id(),
                    classified.tag(),
                    DropReason::Invalidated,
                );
            }
            LifecycleState::Created | LifecycleState::Suspended => {
                state.backlog.push_back(classified);
            }
            LifecycleState::Activated if !state.backlog.is_empty() => {
                // A flush is already scheduled; keep arrival order.
                state.backlog.push_back(classified);
            }
            LifecycleState::Activated => {
                drop(state);
                self.dispatch_classified(classified);
            }
        }
    }

    fn schedule_flush(&self) {
        let connection = self.clone();
        if self
            .core()
            .queue
            .enqueue(move || connection.flush_backlog())
            .is_err()
        {
            warn!(
                target: DISPATCH_TARGET,
                connection = %self.id(),
                "dispatch queue closed; parked events stay parked"
            );
        }
    }

    fn flush_backlog(&self) {
        loop {
            let next = {
                let mut state = self.lock_state();
                if state.lifecycle != LifecycleState::Activated {
                    return;
                }
                state.backlog.pop_front()
            };
            let Some(classified) = next else {
                return;
            };
            self.dispatch_classified(classified);
        }
    }

    fn dispatch_classified(&self, classified: Classified) {
        match classified {
            Classified::NewConnection(raw_peer) => self.accept_peer(raw_peer),
            Classified::Message(blob) => {
                let accepted = self
                    .core()
                    .validator
                    .as_ref()
                    .is_none_or(|validator| validator.validate(self, &blob));
                if accepted {
                    self.dispatch(Event::Message(blob));
                } else {
                    self.core().diagnostics.event_dropped(
                        self.id(),
                        EventTag::Message,
                        DropReason::Rejected,
                    );
                }
            }
            Classified::Error(error) if error.is_terminal() => self.fail(error),
            Classified::Error(error) => self.dispatch(Event::Error(error)),
        }
    }

    /// Hands `event` to the handler registered for its tag.
    pub(crate) fn dispatch(&self, event: Event) {
        let tag = event.tag();
        let handler = {
            let state = self.lock_state();
            if state.lifecycle == LifecycleState::Invalidated {
                None
            } else {
                Some(state.handlers.get(tag))
            }
        };
        match handler {
            None => self
                .core()
                .diagnostics
                .event_dropped(self.id(), tag, DropReason::Invalidated),
            Some(Some(handler)) => handler.handle(self, event),
            Some(None) => self.report_unhandled(&event),
        }
    }

    pub(crate) fn report_unhandled(&self, event: &Event) {
        let diagnostics = &self.core().diagnostics;
        match event {
            Event::Error(error) => diagnostics.error_unreported(self.id(), error),
            Event::NewConnection(_) | Event::Message(_) => {
                diagnostics.event_dropped(self.id(), event.tag(), DropReason::Unhandled);
            }
        }
    }

    /// Builds the error event delivered for a peer that unexpectedly
    /// received a connection object.
    pub(crate) fn unexpected_peer_object(raw_peer: RawHandle) -> ErrorEvent {
        ErrorEvent::transient(format!(
            "peer connection received unexpected connection object {raw_peer}"
        ))
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        formatter
            .debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("handle", &self.inner.raw)
            .field("state", &state.lifecycle)
            .field("handlers", &state.handlers)
            .finish_non_exhaustive()
    }
}
