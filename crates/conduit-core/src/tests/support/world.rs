//! Scenario world shared by the connection lifecycle and reply suites.

use std::cell::RefCell;

use rstest::fixture;

use crate::connection::Connection;
use crate::correlator::CorrelationToken;
use crate::errors::DispatchError;

use super::harness_fixture::Harness;

/// Mutable state threaded through connection scenarios.
pub struct ConnectionWorld {
    /// Dispatcher and recorders backing the scenario.
    pub harness: Harness,
    /// Published listener, once connected.
    pub listener: Option<Connection>,
    /// Dialled client, once connected.
    pub client: Option<Connection>,
    /// Server-side peer accepted by the listener.
    pub peer: Option<Connection>,
    /// Last error returned by a refused operation.
    pub refusal: Option<DispatchError>,
    /// Results of sends issued by the scenario.
    pub send_results: Vec<Result<CorrelationToken, DispatchError>>,
}

impl ConnectionWorld {
    /// World with a fresh harness and nothing connected.
    pub fn new() -> Self {
        Self {
            harness: Harness::new(),
            listener: None,
            client: None,
            peer: None,
            refusal: None,
            send_results: Vec::new(),
        }
    }

    /// Publishes, dials and records the listener, client and peer.
    pub fn connect(&mut self) {
        let (listener, client, peer) = self.harness.connected_pair();
        self.listener = Some(listener);
        self.client = Some(client);
        self.peer = Some(peer);
    }

    /// Connected client.
    pub fn client(&self) -> &Connection {
        self.client.as_ref().expect("client should be connected")
    }

    /// Accepted server-side peer.
    pub fn peer(&self) -> &Connection {
        self.peer.as_ref().expect("peer should be accepted")
    }
}

/// Fresh [`ConnectionWorld`] per scenario.
#[fixture]
pub fn world() -> RefCell<ConnectionWorld> {
    RefCell::new(ConnectionWorld::new())
}
