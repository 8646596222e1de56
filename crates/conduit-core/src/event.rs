//! Event vocabulary shared by the classifier, registry and handlers.

use std::fmt;

use crate::connection::Connection;
use crate::errors::DispatchError;

/// Opaque message payload. Encoding is the application's concern.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(Vec<u8>);

impl Blob {
    /// Wraps raw payload bytes.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrows the payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the blob, returning the payload bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Blob")
            .field("len", &self.0.len())
            .finish()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Blob {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl From<String> for Blob {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

/// Classification label attached to every incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventTag {
    /// A listener accepted a peer.
    NewConnection,
    /// A message payload arrived.
    Message,
    /// The transport reported an error.
    Error,
}

impl EventTag {
    /// Every tag, in registry order.
    pub const ALL: [Self; 3] = [Self::NewConnection, Self::Message, Self::Error];

    /// Parses a tag name (case-insensitive).
    ///
    /// Accepts `new-connection`, `message` and `error`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidTag` if the value names no tag.
    pub fn parse(value: &str) -> Result<Self, DispatchError> {
        match value.to_ascii_lowercase().as_str() {
            "new-connection" => Ok(Self::NewConnection),
            "message" => Ok(Self::Message),
            "error" => Ok(Self::Error),
            _ => Err(DispatchError::invalid_tag(value)),
        }
    }

    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NewConnection => "new-connection",
            Self::Message => "message",
            Self::Error => "error",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::NewConnection => 0,
            Self::Message => 1,
            Self::Error => 2,
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error reported on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    description: String,
    terminal: bool,
}

impl ErrorEvent {
    /// Builds a recoverable error event.
    pub fn transient(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            terminal: false,
        }
    }

    /// Builds an error event that ends the connection.
    pub fn terminal(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            terminal: true,
        }
    }

    /// Human-readable description supplied by the transport.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the connection is invalidated by this error.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.terminal
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.description)
    }
}

/// Event handed to a registered handler.
#[derive(Debug, Clone)]
pub enum Event {
    /// A peer accepted by a listener, already resumed.
    NewConnection(Connection),
    /// Message payload.
    Message(Blob),
    /// Error reported on the connection.
    Error(ErrorEvent),
}

impl Event {
    /// Tag under which the event is dispatched.
    #[must_use]
    pub const fn tag(&self) -> EventTag {
        match self {
            Self::NewConnection(_) => EventTag::NewConnection,
            Self::Message(_) => EventTag::Message,
            Self::Error(_) => EventTag::Error,
        }
    }

    /// Message payload, if this is a message event.
    #[must_use]
    pub const fn as_message(&self) -> Option<&Blob> {
        match self {
            Self::Message(blob) => Some(blob),
            Self::NewConnection(_) | Self::Error(_) => None,
        }
    }

    /// Error details, if this is an error event.
    #[must_use]
    pub const fn as_error(&self) -> Option<&ErrorEvent> {
        match self {
            Self::Error(error) => Some(error),
            Self::NewConnection(_) | Self::Message(_) => None,
        }
    }
}
