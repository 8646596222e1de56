//! Entry point tying a host transport to the dispatch queue.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

use crate::connection::{Connection, ConnectionId, Role};
use crate::correlator::CorrelationToken;
use crate::diagnostics::{DISPATCH_TARGET, DiagnosticSink, StructuredDiagnostics};
use crate::errors::DispatchError;
use crate::pump::{DispatchQueue, PumpError};
use crate::registry::HandlerSet;
use crate::transport::HostTransport;
use crate::validation::{MessageValidator, SharedValidator};

/// Collaborators shared by every connection of one dispatcher.
pub(crate) struct Core {
    pub(crate) transport: Arc<dyn HostTransport>,
    pub(crate) queue: DispatchQueue,
    pub(crate) diagnostics: Arc<dyn DiagnosticSink>,
    pub(crate) validator: Option<SharedValidator>,
    next_connection: AtomicU64,
    next_token: AtomicU64,
}

impl Core {
    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::from_raw(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_token(&self) -> CorrelationToken {
        CorrelationToken::from_raw(self.next_token.fetch_add(1, Ordering::Relaxed))
    }
}

/// Configures and builds a [`Dispatcher`].
pub struct DispatcherBuilder {
    transport: Arc<dyn HostTransport>,
    queue: Option<DispatchQueue>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    validator: Option<SharedValidator>,
    drain_timeout: Option<Duration>,
}

impl DispatcherBuilder {
    /// Uses `queue` instead of spawning a worker queue.
    #[must_use]
    pub fn queue(mut self, queue: DispatchQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Routes diagnostics to `sink` instead of tracing.
    #[must_use]
    pub fn diagnostics(mut self, sink: impl DiagnosticSink) -> Self {
        self.diagnostics = Some(Arc::new(sink));
        self
    }

    /// Gates every inbound message through `validator`.
    #[must_use]
    pub fn validator(mut self, validator: impl MessageValidator) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Bounds [`Dispatcher::drain`] by `timeout`.
    #[must_use]
    pub const fn drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Builds the dispatcher, spawning a worker queue if none was supplied.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Spawn` if the worker thread cannot be started.
    pub fn build(self) -> Result<Dispatcher, PumpError> {
        let queue = match self.queue {
            Some(queue) => queue,
            None => DispatchQueue::worker(conduit_config::DEFAULT_QUEUE_LABEL)?,
        };
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(StructuredDiagnostics::new()));
        Ok(Dispatcher {
            core: Arc::new(Core {
                transport: self.transport,
                queue,
                diagnostics,
                validator: self.validator,
                next_connection: AtomicU64::new(1),
                next_token: AtomicU64::new(1),
            }),
            drain_timeout: self.drain_timeout,
        })
    }
}

/// Creates connections over a host transport and pumps their events.
///
/// Dropping the dispatcher shuts its queue down as [`Dispatcher::shutdown`]
/// does, joining a worker thread even while connections still hold the
/// queue. Jobs queued afterwards are refused; replies still settle.
pub struct Dispatcher {
    core: Arc<Core>,
    drain_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Starts configuring a dispatcher over `transport`.
    pub fn builder(transport: impl HostTransport) -> DispatcherBuilder {
        DispatcherBuilder {
            transport: Arc::new(transport),
            queue: None,
            diagnostics: None,
            validator: None,
            drain_timeout: None,
        }
    }

    /// Publishes a listener under `service` and activates it.
    ///
    /// `listener_handlers` receive the listener's own events, typically a
    /// NewConnection handler announcing accepted peers and an Error handler.
    /// `peer_handlers` is stamped onto every peer the listener accepts. Both
    /// are installed before the listener is resumed, so no peer can be
    /// announced before its handler exists.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ServiceUnavailable` when the transport cannot
    /// publish the service.
    pub fn listen(
        &self,
        service: &str,
        listener_handlers: HandlerSet,
        peer_handlers: HandlerSet,
    ) -> Result<Connection, DispatchError> {
        let listener = self.wrap_listener(service, listener_handlers)?;
        {
            let mut state = listener.lock_state();
            state.peer_template = Some(peer_handlers);
        }
        listener.resume()?;
        Ok(listener)
    }

    /// Publishes a listener under `service` without activating it, so that
    /// handlers can be registered before the first peer arrives.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ServiceUnavailable` when the transport cannot
    /// publish the service.
    pub fn create_listener(&self, service: &str) -> Result<Connection, DispatchError> {
        self.wrap_listener(service, HandlerSet::new())
    }

    fn wrap_listener(&self, service: &str, handlers: HandlerSet) -> Result<Connection, DispatchError> {
        let raw = self
            .core
            .transport
            .accept_connection(service)
            .map_err(|source| DispatchError::service_unavailable(service, source))?;
        let listener = Connection::wrap(&self.core, raw, Role::Listener, None, handlers);
        info!(
            target: DISPATCH_TARGET,
            connection = %listener.id(),
            service,
            "listener published"
        );
        Ok(listener)
    }

    /// Opens a peer connection to `service`. It stays Created until the
    /// caller registers handlers and resumes it.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ServiceUnavailable` when the transport cannot
    /// reach the service.
    pub fn dial(&self, service: &str) -> Result<Connection, DispatchError> {
        let raw = self
            .core
            .transport
            .dial(service)
            .map_err(|source| DispatchError::service_unavailable(service, source))?;
        Ok(Connection::wrap(&self.core, raw, Role::Peer, None, HandlerSet::new()))
    }

    /// Queue on which handlers and reply callbacks run.
    #[must_use]
    pub fn queue(&self) -> &DispatchQueue {
        &self.core.queue
    }

    /// Waits for every job queued before the call, bounded by the configured
    /// drain timeout when one is set.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Timeout` or `PumpError::Reentrant`.
    pub fn drain(&self) -> Result<(), PumpError> {
        match self.drain_timeout {
            Some(timeout) => self.core.queue.drain_timeout(timeout),
            None => self.core.queue.drain(),
        }
    }

    /// Waits for every job queued before the call, giving up after
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Timeout` or `PumpError::Reentrant`.
    pub fn drain_within(&self, timeout: Duration) -> Result<(), PumpError> {
        self.core.queue.drain_timeout(timeout)
    }

    /// Stops the dispatch queue after running the jobs already queued.
    pub fn shutdown(&self) {
        self.core.queue.shutdown();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.core.queue.shutdown();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Dispatcher")
            .field("queue", &self.core.queue)
            .field("validator", &self.core.validator.is_some())
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}
