//! Per-connection handler registration.
//!
//! Each connection owns one [`HandlerSet`] holding at most one handler per
//! [`EventTag`]. Listeners additionally carry a template set that is stamped
//! onto every peer they accept, so peers never inherit the listener's own
//! handlers.

use std::fmt;
use std::sync::Arc;

use crate::connection::Connection;
use crate::event::{Event, EventTag};

/// Callback invoked for events of one tag on one connection.
///
/// Handlers run on the dispatch queue with no core locks held and may call
/// back into the core, e.g. to register further handlers or send replies.
pub trait EventHandler: Send + Sync + 'static {
    /// Handles a single event. Implementations should avoid panicking.
    fn handle(&self, connection: &Connection, event: Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Connection, Event) + Send + Sync + 'static,
{
    fn handle(&self, connection: &Connection, event: Event) {
        self(connection, event);
    }
}

/// Shared handle to a registered handler.
pub type SharedHandler = Arc<dyn EventHandler>;

/// Mapping from event tag to its single registered handler.
#[derive(Clone, Default)]
pub struct HandlerSet {
    slots: [Option<SharedHandler>; 3],
}

impl HandlerSet {
    /// Creates an empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`HandlerSet::insert`] for the NewConnection tag.
    #[must_use]
    pub fn on_new_connection(self, handler: impl EventHandler) -> Self {
        self.with(EventTag::NewConnection, Arc::new(handler))
    }

    /// Builder form of [`HandlerSet::insert`] for the Message tag.
    #[must_use]
    pub fn on_message(self, handler: impl EventHandler) -> Self {
        self.with(EventTag::Message, Arc::new(handler))
    }

    /// Builder form of [`HandlerSet::insert`] for the Error tag.
    #[must_use]
    pub fn on_error(self, handler: impl EventHandler) -> Self {
        self.with(EventTag::Error, Arc::new(handler))
    }

    /// Registers one handler for every tag.
    #[must_use]
    pub fn on_any(mut self, handler: impl EventHandler) -> Self {
        let shared: SharedHandler = Arc::new(handler);
        for tag in EventTag::ALL {
            self.insert(tag, Arc::clone(&shared));
        }
        self
    }

    fn with(mut self, tag: EventTag, handler: SharedHandler) -> Self {
        self.insert(tag, handler);
        self
    }

    /// Stores `handler` for `tag`, returning the handler it replaced.
    pub fn insert(&mut self, tag: EventTag, handler: SharedHandler) -> Option<SharedHandler> {
        self.slot_mut(tag).replace(handler)
    }

    /// Removes the handler for `tag`, returning it if one was registered.
    pub fn remove(&mut self, tag: EventTag) -> Option<SharedHandler> {
        self.slot_mut(tag).take()
    }

    /// Returns a clone of the handler registered for `tag`.
    #[must_use]
    pub fn get(&self, tag: EventTag) -> Option<SharedHandler> {
        self.slots
            .get(tag.index())
            .and_then(Option::as_ref)
            .map(Arc::clone)
    }

    /// Whether a handler is registered for `tag`.
    #[must_use]
    pub fn handles(&self, tag: EventTag) -> bool {
        self.slots
            .get(tag.index())
            .is_some_and(Option::is_some)
    }

    /// Whether no handler is registered at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Drops every registered handler.
    pub fn clear(&mut self) {
        self.slots = Default::default();
    }

    fn slot_mut(&mut self, tag: EventTag) -> &mut Option<SharedHandler> {
        let [new_connection, message, error] = &mut self.slots;
        match tag {
            EventTag::NewConnection => new_connection,
            EventTag::Message => message,
            EventTag::Error => error,
        }
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&str> = EventTag::ALL
            .iter()
            .filter(|tag| self.handles(**tag))
            .map(EventTag::as_str)
            .collect();
        formatter
            .debug_struct("HandlerSet")
            .field("registered", &registered)
            .finish()
    }
}
