//! Dispatcher wired to a loopback transport and a manual queue.

use std::sync::Arc;

use rstest::fixture;

use crate::connection::Connection;
use crate::dispatcher::{Dispatcher, DispatcherBuilder};
use crate::event::EventTag;
use crate::pump::DispatchQueue;
use crate::registry::HandlerSet;
use crate::transport::{LoopbackTransport, RawHandle};
use crate::validation::MessageValidator;

use super::diagnostics::RecordingDiagnostics;
use super::observations::ObservationLog;

/// Service name published by most tests.
pub const SERVICE: &str = "org.conduit.test";

/// Dispatcher on a manual queue with recording handlers and diagnostics.
pub struct Harness {
    /// Loopback transport the dispatcher drives.
    pub transport: Arc<LoopbackTransport>,
    /// Every diagnostic signal the dispatcher emitted.
    pub diagnostics: Arc<RecordingDiagnostics>,
    /// Dispatcher under test.
    pub dispatcher: Dispatcher,
    /// Observations from the recording handlers.
    pub log: ObservationLog,
}

impl Harness {
    /// Harness with the default accept-all validator.
    pub fn new() -> Self {
        Self::assemble(None)
    }

    /// Harness whose dispatcher gates inbound messages through `validator`.
    pub fn with_validator(validator: impl MessageValidator) -> Self {
        Self::assemble(Some(Box::new(move |builder: DispatcherBuilder| {
            builder.validator(validator)
        })))
    }

    fn assemble(customise: Option<Box<dyn FnOnce(DispatcherBuilder) -> DispatcherBuilder>>) -> Self {
        let transport = Arc::new(LoopbackTransport::new());
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let mut builder = Dispatcher::builder(Arc::clone(&transport))
            .queue(DispatchQueue::manual("conduit-test"))
            .diagnostics(Arc::clone(&diagnostics));
        if let Some(customise) = customise {
            builder = customise(builder);
        }
        let dispatcher = builder.build().expect("manual queues never spawn threads");
        Self {
            transport,
            diagnostics,
            dispatcher,
            log: ObservationLog::default(),
        }
    }

    /// Drains until no job is left, including jobs queued by earlier jobs.
    pub fn settle(&self) {
        for _ in 0..64 {
            self.dispatcher.drain().expect("drain should succeed");
            if self.dispatcher.queue().pending() == 0 {
                return;
            }
        }
        panic!("dispatch queue did not settle");
    }

    /// Publishes [`SERVICE`] with recording peer handlers and recording
    /// NewConnection and Error handlers on the listener.
    pub fn listen(&self) -> Connection {
        let listener_handlers = HandlerSet::new()
            .on_new_connection(self.log.handler())
            .on_error(self.log.handler());
        self.dispatcher
            .listen(SERVICE, listener_handlers, self.log.peer_handlers())
            .expect("listen should succeed")
    }

    /// Dials [`SERVICE`] and activates the client with recording handlers.
    pub fn dial(&self) -> Connection {
        let client = self.dispatcher.dial(SERVICE).expect("dial should succeed");
        client
            .register(EventTag::Message, self.log.handler())
            .expect("register message handler");
        client
            .register(EventTag::Error, self.log.handler())
            .expect("register error handler");
        client.resume().expect("resume client");
        client
    }

    /// Server-side transport handle linked to `client`.
    pub fn server_handle(&self, client: &Connection) -> RawHandle {
        self.transport
            .remote_of(client.raw_handle())
            .expect("dialled clients have a linked peer")
    }

    /// Publishes, dials and settles, returning the client and the accepted
    /// server-side peer.
    pub fn connected_pair(&self) -> (Connection, Connection, Connection) {
        let listener = self.listen();
        let client = self.dial();
        self.settle();
        let peer = self
            .log
            .accepted()
            .into_iter()
            .last()
            .expect("listener should accept the peer");
        (listener, client, peer)
    }
}

/// Fresh [`Harness`] per test.
#[fixture]
pub fn harness() -> Harness {
    Harness::new()
}
