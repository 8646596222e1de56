//! Optional gate applied to incoming messages before dispatch.

use std::sync::Arc;

use crate::connection::Connection;
use crate::event::Blob;

/// Decides whether an incoming message may reach its handler.
///
/// Validators run on the dispatch queue for every inbound message event.
/// Replies to `send_with_reply` bypass them. Refused messages are reported to
/// the diagnostic sink as rejected.
pub trait MessageValidator: Send + Sync + 'static {
    /// Returns `true` to deliver `message`.
    fn validate(&self, connection: &Connection, message: &Blob) -> bool;
}

impl<F> MessageValidator for F
where
    F: Fn(&Connection, &Blob) -> bool + Send + Sync + 'static,
{
    fn validate(&self, connection: &Connection, message: &Blob) -> bool {
        self(connection, message)
    }
}

/// Shared handle to a validator.
pub type SharedValidator = Arc<dyn MessageValidator>;
