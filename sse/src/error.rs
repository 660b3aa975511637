//! Error types for the realtime SSE layer.

use crate::connection::ConnectionId;
use events::BusError;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// The connection was removed or never existed. Usually a subscription
    /// call racing a client disconnect; callers treat it as a no-op.
    ConnectionNotFound(ConnectionId),

    /// A connection with the same id is already registered. Ids are generated
    /// unique, so this indicates a programming error.
    DuplicateConnection(ConnectionId),

    /// Writing to the client stream failed. The connection has been torn down.
    ConnectionClosed(ConnectionId),

    /// Event type names end up on a single `event:` line and may not contain
    /// line breaks.
    InvalidEventType(String),

    /// The payload could not be encoded as JSON.
    Serialization(serde_json::Error),

    /// Publishing onto the event bus failed.
    Bus(BusError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionNotFound(id) => write!(f, "Connection not found: {id}"),
            Error::DuplicateConnection(id) => write!(f, "Connection already registered: {id}"),
            Error::ConnectionClosed(id) => write!(f, "Connection closed: {id}"),
            Error::InvalidEventType(event_type) => {
                write!(f, "Invalid event type: {event_type:?}")
            }
            Error::Serialization(err) => write!(f, "Serialization error: {err}"),
            Error::Bus(err) => write!(f, "Event bus error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Serialization(err) => Some(err),
            Error::Bus(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err)
    }
}

impl From<BusError> for Error {
    fn from(err: BusError) -> Self {
        Error::Bus(err)
    }
}
