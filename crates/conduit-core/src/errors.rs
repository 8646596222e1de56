//! Error types surfaced by the dispatch core.
//!
//! Misuse of the API (`InvalidTag`, `InvalidState`) and synchronous send
//! failures are returned to the caller. Loss of a connection is delivered to
//! the connection's Error handler and to every outstanding reply callback.

use thiserror::Error;

use crate::connection::ConnectionId;
use crate::lifecycle::LifecycleState;

/// Errors raised by the host transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No service is published under the requested name.
    #[error("no service is listening on '{service}'")]
    UnknownService {
        /// Name that failed to resolve.
        service: String,
    },
    /// The transport does not know the handle.
    #[error("unknown transport handle {handle}")]
    UnknownHandle {
        /// Offending handle value.
        handle: u64,
    },
    /// The handle was cancelled and can no longer carry traffic.
    #[error("transport handle {handle} has been cancelled")]
    Cancelled {
        /// Cancelled handle value.
        handle: u64,
    },
    /// The transport refused the operation.
    #[error("transport rejected the operation: {reason}")]
    Rejected {
        /// Explanation supplied by the transport.
        reason: String,
    },
}

impl TransportError {
    /// Creates a rejection error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by connection management and request correlation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A handler was registered under a name that is not an event tag.
    #[error("invalid event tag '{tag}'")]
    InvalidTag {
        /// Rejected tag text.
        tag: String,
    },

    /// The connection is not in a state that permits the operation.
    #[error("cannot {operation} connection {connection} while it is {state}")]
    InvalidState {
        /// Connection the operation targeted.
        connection: ConnectionId,
        /// Lifecycle state observed when the operation was attempted.
        state: LifecycleState,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// The transport reported permanent failure of the connection.
    #[error("connection {connection} lost: {description}")]
    ConnectionLost {
        /// Connection that failed.
        connection: ConnectionId,
        /// Transport supplied description of the failure.
        description: String,
    },

    /// The transport refused a send synchronously.
    #[error("send on connection {connection} failed: {source}")]
    SendFailed {
        /// Connection the message was addressed to.
        connection: ConnectionId,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The transport could not open a listener or dial a service.
    #[error("service '{service}' is unavailable: {source}")]
    ServiceUnavailable {
        /// Requested service name.
        service: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },
}

impl DispatchError {
    /// Creates an invalid tag error.
    pub fn invalid_tag(tag: impl Into<String>) -> Self {
        Self::InvalidTag { tag: tag.into() }
    }

    /// Creates an invalid state error.
    #[must_use]
    pub const fn invalid_state(
        connection: ConnectionId,
        state: LifecycleState,
        operation: &'static str,
    ) -> Self {
        Self::InvalidState {
            connection,
            state,
            operation,
        }
    }

    /// Creates a connection lost error.
    pub fn connection_lost(connection: ConnectionId, description: impl Into<String>) -> Self {
        Self::ConnectionLost {
            connection,
            description: description.into(),
        }
    }

    /// Creates a send failure error.
    #[must_use]
    pub const fn send_failed(connection: ConnectionId, source: TransportError) -> Self {
        Self::SendFailed { connection, source }
    }

    /// Creates a service unavailable error.
    pub fn service_unavailable(service: impl Into<String>, source: TransportError) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            source,
        }
    }

    /// Whether the core would ever retry the failed operation on its own.
    ///
    /// Always `false`: reconnecting or resending is left to the application.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }

    /// Whether the error reports misuse of the API rather than a runtime
    /// failure.
    #[must_use]
    pub const fn is_programmer_error(&self) -> bool {
        matches!(self, Self::InvalidTag { .. } | Self::InvalidState { .. })
    }
}
