//! Classification of raw transport objects into event tags.

use crate::event::{Blob, ErrorEvent, EventTag};
use crate::transport::{HostTransport, RawEvent, RawHandle};

/// Raw event after classification, before peer handles are wrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Peer handle accepted by a listener.
    NewConnection(RawHandle),
    /// Message payload.
    Message(Blob),
    /// Error report, including events that could not be classified.
    Error(ErrorEvent),
}

impl Classified {
    /// Tag assigned by the classifier.
    #[must_use]
    pub const fn tag(&self) -> EventTag {
        match self {
            Self::NewConnection(_) => EventTag::NewConnection,
            Self::Message(_) => EventTag::Message,
            Self::Error(_) => EventTag::Error,
        }
    }

    /// Whether the event ends the life of its connection.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::Error(error) => error.is_terminal(),
            Self::NewConnection(_) | Self::Message(_) => false,
        }
    }
}

/// Assigns exactly one tag to `raw`.
///
/// Objects the core does not recognise become non-terminal error events so
/// that they travel the normal Error path instead of disappearing.
#[must_use]
pub fn classify(transport: &dyn HostTransport, raw: RawEvent) -> Classified {
    match raw {
        RawEvent::Connection(handle) => Classified::NewConnection(handle),
        RawEvent::Dictionary(blob) => Classified::Message(blob),
        RawEvent::Error(error) => {
            let description = transport.describe_error(&raw);
            if error.is_terminal() {
                Classified::Error(ErrorEvent::terminal(description))
            } else {
                Classified::Error(ErrorEvent::transient(description))
            }
        }
        RawEvent::Unknown { .. } => {
            Classified::Error(ErrorEvent::transient(transport.describe_error(&raw)))
        }
    }
}
