//! Connection and event dispatch core for host IPC transports.
//!
//! A [`Dispatcher`] sits on top of a [`HostTransport`] and turns its raw
//! handles and callbacks into managed [`Connection`]s. Incoming objects are
//! classified into three event tags (new connection, message and error) and
//! handed to the handler registered for that tag on that connection. Every
//! handler runs on a serial [`DispatchQueue`], so application code observes
//! events one at a time and in arrival order.
//!
//! Listeners stamp a template of peer handlers onto each peer they accept,
//! activate it, and only then announce it to their own NewConnection
//! handler. Requests sent with [`Connection::send_with_reply`] are correlated
//! with their replies and settled exactly once, either with the reply or with
//! [`DispatchError::ConnectionLost`] when the connection is torn down first.
//!
//! Configuration comes from [`conduit_config`]; [`bootstrap_with`] loads it,
//! installs structured telemetry and assembles a dispatcher. Diagnostics for
//! dropped events and lifecycle changes flow through a [`DiagnosticSink`],
//! which by default emits `tracing` events.

mod bootstrap;
mod classifier;
mod connection;
mod correlator;
mod diagnostics;
mod dispatcher;
mod errors;
mod event;
mod lifecycle;
mod pump;
mod registry;
mod telemetry;
mod transport;
mod validation;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Runtime, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
    bootstrap_with_diagnostics,
};
pub use classifier::{Classified, classify};
pub use connection::{Connection, ConnectionId, Role};
pub use correlator::{CorrelationToken, ReplyOutcome};
pub use diagnostics::{DiagnosticSink, DropReason, StructuredDiagnostics};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use errors::{DispatchError, TransportError};
pub use event::{Blob, ErrorEvent, Event, EventTag};
pub use lifecycle::{INVALIDATED_BY_APPLICATION, LifecycleState};
pub use pump::{DispatchQueue, PumpError};
pub use registry::{EventHandler, HandlerSet, SharedHandler};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use transport::{
    HostTransport, LoopbackTransport, RawError, RawEvent, RawEventCallback, RawHandle,
};
pub use validation::{MessageValidator, SharedValidator};

#[cfg(test)]
mod tests;
