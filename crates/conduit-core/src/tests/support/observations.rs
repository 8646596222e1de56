//! Recording handlers that capture what the application observed.

use std::sync::{Arc, Mutex};

use crate::connection::{Connection, ConnectionId};
use crate::correlator::ReplyOutcome;
use crate::event::Event;
use crate::registry::{EventHandler, HandlerSet};

/// Something a handler or reply callback saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// A listener announced an accepted peer.
    NewConnection {
        on: ConnectionId,
        peer: ConnectionId,
    },
    /// A message reached a handler.
    Message {
        on: ConnectionId,
        text: String,
    },
    /// An error reached a handler.
    Error {
        on: ConnectionId,
        description: String,
        terminal: bool,
    },
    /// A reply callback settled.
    Reply {
        label: String,
        outcome: Result<String, String>,
    },
}

/// Shared, ordered record of observations.
#[derive(Debug, Clone, Default)]
pub struct ObservationLog {
    entries: Arc<Mutex<Vec<Observation>>>,
    accepted: Arc<Mutex<Vec<Connection>>>,
}

impl ObservationLog {
    /// Every observation, in recording order.
    pub fn entries(&self) -> Vec<Observation> {
        self.entries
            .lock()
            .expect("observation mutex poisoned")
            .clone()
    }

    /// Peers handed to NewConnection handlers, in arrival order.
    pub fn accepted(&self) -> Vec<Connection> {
        self.accepted
            .lock()
            .expect("accepted mutex poisoned")
            .clone()
    }

    /// Message texts received on `connection`.
    pub fn messages_on(&self, connection: ConnectionId) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Observation::Message { on, text } if on == connection => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Error descriptions and terminal flags received on `connection`.
    pub fn errors_on(&self, connection: ConnectionId) -> Vec<(String, bool)> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Observation::Error {
                    on,
                    description,
                    terminal,
                } if on == connection => Some((description, terminal)),
                _ => None,
            })
            .collect()
    }

    /// Settled replies as `(label, outcome)` pairs.
    pub fn replies(&self) -> Vec<(String, Result<String, String>)> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Observation::Reply { label, outcome } => Some((label, outcome)),
                _ => None,
            })
            .collect()
    }

    /// Appends `observation`.
    pub fn record(&self, observation: Observation) {
        self.entries
            .lock()
            .expect("observation mutex poisoned")
            .push(observation);
    }

    /// Handler recording every event it receives.
    pub fn handler(&self) -> impl EventHandler {
        let log = self.clone();
        move |connection: &Connection, event: Event| log.observe(connection, event)
    }

    /// Handler set recording messages and errors, as stamped onto peers.
    pub fn peer_handlers(&self) -> HandlerSet {
        HandlerSet::new()
            .on_message(self.handler())
            .on_error(self.handler())
    }

    /// Reply callback recording its outcome under `label`.
    pub fn reply_callback(&self, label: &str) -> impl FnOnce(ReplyOutcome) + Send + 'static {
        let log = self.clone();
        let label = label.to_owned();
        move |outcome: ReplyOutcome| {
            let outcome = outcome
                .map(|blob| String::from_utf8_lossy(blob.as_bytes()).into_owned())
                .map_err(|error| error.to_string());
            log.record(Observation::Reply { label, outcome });
        }
    }

    fn observe(&self, connection: &Connection, event: Event) {
        let on = connection.id();
        let observation = match event {
            Event::NewConnection(peer) => {
                let observation = Observation::NewConnection { on, peer: peer.id() };
                self.accepted
                    .lock()
                    .expect("accepted mutex poisoned")
                    .push(peer);
                observation
            }
            Event::Message(blob) => Observation::Message {
                on,
                text: String::from_utf8_lossy(blob.as_bytes()).into_owned(),
            },
            Event::Error(error) => Observation::Error {
                on,
                description: error.description().to_owned(),
                terminal: error.is_terminal(),
            },
        };
        self.record(observation);
    }
}
