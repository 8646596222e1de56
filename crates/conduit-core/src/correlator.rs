//! Request/reply correlation.
//!
//! Every `send_with_reply` registers a [`PendingReply`] on its connection
//! before the message reaches the transport. The record is removed exactly
//! once: by the matching reply, or by connection teardown failing it with
//! `ConnectionLost`. Whoever removes it invokes the callback, so the callback
//! runs exactly once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::classifier::{Classified, classify};
use crate::connection::{Connection, ConnectionId};
use crate::diagnostics::DISPATCH_TARGET;
use crate::errors::DispatchError;
use crate::event::Blob;
use crate::lifecycle::LifecycleState;
use crate::pump::DispatchQueue;
use crate::transport::{RawEvent, RawEventCallback};

/// Identifier correlating a request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(u64);

impl CorrelationToken {
    pub(crate) const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Numeric value of the token.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "request-{}", self.0)
    }
}

/// Outcome delivered to a reply callback.
pub type ReplyOutcome = Result<Blob, DispatchError>;

type ReplyCallback = Box<dyn FnOnce(ReplyOutcome) + Send + 'static>;

/// Outstanding request awaiting its reply.
pub(crate) struct PendingReply {
    connection: ConnectionId,
    token: CorrelationToken,
    queue: DispatchQueue,
    on_reply: ReplyCallback,
}

impl PendingReply {
    /// Invokes the callback on the current thread.
    fn complete(self, outcome: ReplyOutcome) {
        debug!(
            target: DISPATCH_TARGET,
            connection = %self.connection,
            token = %self.token,
            success = outcome.is_ok(),
            "reply delivered"
        );
        (self.on_reply)(outcome);
    }

    /// Delivers `error` on the reply's target queue.
    pub(crate) fn fail(self, error: DispatchError) {
        let queue = self.queue.clone();
        queue.enqueue_or_run(move || self.complete(Err(error)));
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PendingReply")
            .field("connection", &self.connection)
            .field("token", &self.token)
            .field("queue", &self.queue.label())
            .finish_non_exhaustive()
    }
}

/// Outstanding replies of one connection, ordered by issue.
#[derive(Debug, Default)]
pub(crate) struct PendingReplies {
    entries: BTreeMap<CorrelationToken, PendingReply>,
}

impl PendingReplies {
    fn insert(&mut self, reply: PendingReply) {
        self.entries.insert(reply.token, reply);
    }

    fn remove(&mut self, token: CorrelationToken) -> Option<PendingReply> {
        self.entries.remove(&token)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes every record, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<PendingReply> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

impl Connection {
    /// Sends `message` without expecting a reply.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidState` once the connection has been
    /// invalidated and `DispatchError::SendFailed` when the transport refuses
    /// the message.
    pub fn send(&self, message: impl Into<Blob>) -> Result<(), DispatchError> {
        let lifecycle = self.state();
        if lifecycle == LifecycleState::Invalidated {
            return Err(DispatchError::invalid_state(self.id(), lifecycle, "send on"));
        }
        self.core()
            .transport
            .send(self.raw_handle(), message.into())
            .map_err(|source| DispatchError::send_failed(self.id(), source))
    }

    /// Sends `message` and invokes `on_reply` exactly once on the
    /// dispatcher's queue, with the reply payload or with `ConnectionLost`
    /// if the connection fails first.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidState` once the connection has been
    /// invalidated and `DispatchError::SendFailed` when the transport refuses
    /// the message. `on_reply` is never invoked in either case.
    pub fn send_with_reply<F>(
        &self,
        message: impl Into<Blob>,
        on_reply: F,
    ) -> Result<CorrelationToken, DispatchError>
    where
        F: FnOnce(ReplyOutcome) + Send + 'static,
    {
        let queue = self.core().queue.clone();
        self.send_with_reply_on(&queue, message, on_reply)
    }

    /// Like [`Connection::send_with_reply`] but delivers the outcome on
    /// `queue`.
    ///
    /// # Errors
    ///
    /// See [`Connection::send_with_reply`].
    pub fn send_with_reply_on<F>(
        &self,
        queue: &DispatchQueue,
        message: impl Into<Blob>,
        on_reply: F,
    ) -> Result<CorrelationToken, DispatchError>
    where
        F: FnOnce(ReplyOutcome) + Send + 'static,
    {
        let token = self.core().next_token();
        let callback = self.reply_callback(token, queue.clone());

        // The record is inserted and the message handed over under one lock
        // so teardown either sees the record or refuses the send.
        let mut state = self.lock_state();
        if state.lifecycle == LifecycleState::Invalidated {
            return Err(DispatchError::invalid_state(
                self.id(),
                state.lifecycle,
                "send on",
            ));
        }
        state.pending.insert(PendingReply {
            connection: self.id(),
            token,
            queue: queue.clone(),
            on_reply: Box::new(on_reply),
        });
        match self
            .core()
            .transport
            .send_with_reply(self.raw_handle(), message.into(), callback)
        {
            Ok(()) => Ok(token),
            Err(source) => {
                // Dropped without invoking; the caller receives the error.
                drop(state.pending.remove(token));
                Err(DispatchError::send_failed(self.id(), source))
            }
        }
    }

    /// Number of requests still awaiting a reply.
    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.lock_state().pending.len()
    }

    // Must not run core work inline: transports may invoke it with their own
    // locks held. A closed reply queue still settles the record, off-thread.
    fn reply_callback(&self, token: CorrelationToken, queue: DispatchQueue) -> RawEventCallback {
        let connection = self.clone();
        Arc::new(move |raw: RawEvent| {
            let target = connection.clone();
            queue.enqueue_or_detach(move || target.complete_reply(token, raw));
        })
    }

    fn complete_reply(&self, token: CorrelationToken, raw: RawEvent) {
        let pending = {
            let mut state = self.lock_state();
            state.pending.remove(token)
        };
        let Some(pending) = pending else {
            debug!(
                target: DISPATCH_TARGET,
                connection = %self.id(),
                %token,
                "reply for a settled request ignored"
            );
            return;
        };
        let outcome = match classify(self.core().transport.as_ref(), raw) {
            Classified::Message(blob) => Ok(blob),
            Classified::Error(error) => Err(DispatchError::connection_lost(
                self.id(),
                error.description(),
            )),
            Classified::NewConnection(handle) => Err(DispatchError::connection_lost(
                self.id(),
                format!("reply carried connection object {handle}"),
            )),
        };
        pending.complete(outcome);
    }
}
