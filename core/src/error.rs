use thiserror::Error;

use crate::registry::ConnectionId;

/// Failure reported by a message handler. The description ends up in the
/// payload of the error message routed to the error destination.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors raised inside the relay. None of them is fatal: callers either
/// log them or convert them into routed messages.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("handler for {destination} failed: {source}")]
    HandlerFailure {
        destination: String,
        #[source]
        source: HandlerError,
    },
    #[error("no handler bound to {0}")]
    NoMatchingHandler(String),
}
