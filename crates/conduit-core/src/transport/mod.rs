//! Boundary with the host IPC transport.
//!
//! The core never touches sockets or kernel objects directly. A
//! [`HostTransport`] hands it opaque [`RawHandle`]s and reports activity on
//! them through the [`RawEventCallback`] installed for each handle. Callbacks
//! may be invoked from any thread; the core only enqueues work from them.

mod loopback;

use std::fmt;
use std::sync::Arc;

use crate::errors::TransportError;
use crate::event::Blob;

pub use loopback::LoopbackTransport;

/// Tracing target for transport operations.
pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Transport-issued identifier for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(u64);

impl RawHandle {
    /// Wraps a transport handle value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying handle value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "handle-{}", self.0)
    }
}

/// Error objects the host transport reports on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawError {
    /// The remote side went away; the handle may recover if re-used.
    ConnectionInterrupted,
    /// The handle is permanently unusable.
    ConnectionInvalid,
    /// The host is about to terminate the process.
    TerminationImminent,
}

impl RawError {
    /// Whether the error ends the life of the handle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ConnectionInvalid)
    }

    /// Stable text used when a transport has nothing better to say.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionInterrupted => "connection interrupted",
            Self::ConnectionInvalid => "connection invalid",
            Self::TerminationImminent => "termination imminent",
        }
    }
}

/// Objects delivered by the host transport to an event callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// A listener accepted a new peer endpoint.
    Connection(RawHandle),
    /// A message payload arrived.
    Dictionary(Blob),
    /// The transport reported an error on the handle.
    Error(RawError),
    /// An object of a type the core does not understand.
    Unknown {
        /// Transport-specific type name.
        kind: String,
    },
}

/// Callback invoked by the host transport for each raw event on a handle.
pub type RawEventCallback = Arc<dyn Fn(RawEvent) + Send + Sync + 'static>;

/// Operations the core consumes from the host IPC transport.
///
/// Implementations must deliver the events of a single handle in the order
/// they were produced, and must not deliver events for a handle before
/// [`HostTransport::resume`] has been called on it.
pub trait HostTransport: Send + Sync + 'static {
    /// Opens a listener endpoint published under `service`.
    ///
    /// # Errors
    ///
    /// Returns an error when the service cannot be published.
    fn accept_connection(&self, service: &str) -> Result<RawHandle, TransportError>;

    /// Opens an outbound peer endpoint to `service`.
    ///
    /// # Errors
    ///
    /// Returns an error when the service cannot be reached.
    fn dial(&self, service: &str) -> Result<RawHandle, TransportError>;

    /// Installs the callback receiving events for `handle`, replacing any
    /// previous one.
    fn set_event_callback(&self, handle: RawHandle, callback: RawEventCallback);

    /// Starts or restarts event delivery on `handle`.
    fn resume(&self, handle: RawHandle);

    /// Pauses event delivery on `handle`; events are held until resumed.
    fn suspend(&self, handle: RawHandle);

    /// Tears `handle` down and releases its event callback.
    fn cancel(&self, handle: RawHandle);

    /// Sends `message` without expecting a reply.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport refuses the message synchronously.
    fn send(&self, handle: RawHandle, message: Blob) -> Result<(), TransportError>;

    /// Sends `message` and invokes `on_reply` once with the correlated reply
    /// or with an error object if the handle fails first.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport refuses the message synchronously;
    /// `on_reply` is then never invoked.
    fn send_with_reply(
        &self,
        handle: RawHandle,
        message: Blob,
        on_reply: RawEventCallback,
    ) -> Result<(), TransportError>;

    /// Produces a human-readable description of an error event.
    fn describe_error(&self, event: &RawEvent) -> String {
        match event {
            RawEvent::Error(error) => error.as_str().to_owned(),
            RawEvent::Unknown { kind } => format!("unclassifiable event of kind '{kind}'"),
            RawEvent::Connection(handle) => format!("unexpected connection object {handle}"),
            RawEvent::Dictionary(_) => String::from("unexpected message object"),
        }
    }
}

impl<T> HostTransport for Arc<T>
where
    T: HostTransport,
{
    fn accept_connection(&self, service: &str) -> Result<RawHandle, TransportError> {
        (**self).accept_connection(service)
    }

    fn dial(&self, service: &str) -> Result<RawHandle, TransportError> {
        (**self).dial(service)
    }

    fn set_event_callback(&self, handle: RawHandle, callback: RawEventCallback) {
        (**self).set_event_callback(handle, callback);
    }

    fn resume(&self, handle: RawHandle) {
        (**self).resume(handle);
    }

    fn suspend(&self, handle: RawHandle) {
        (**self).suspend(handle);
    }

    fn cancel(&self, handle: RawHandle) {
        (**self).cancel(handle);
    }

    fn send(&self, handle: RawHandle, message: Blob) -> Result<(), TransportError> {
        (**self).send(handle, message)
    }

    fn send_with_reply(
        &self,
        handle: RawHandle,
        message: Blob,
        on_reply: RawEventCallback,
    ) -> Result<(), TransportError> {
        (**self).send_with_reply(handle, message, on_reply)
    }

    fn describe_error(&self, event: &RawEvent) -> String {
        (**self).describe_error(event)
    }
}
