//! Error types for RPC sessions.

use crate::protocol::MessageId;

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A method of this name is already exposed (or being exposed) locally.
    #[error("method \"{0}\" already exists")]
    AlreadyRegistered(String),

    /// The method is not exposed locally, or is already being withdrawn.
    #[error("{0} does not exist")]
    NotRegistered(String),

    /// No method of this name exists on the side asked to run it.
    #[error("{0} does not exist")]
    MethodNotFound(String),

    /// The peer announced a method whose name is already mirrored.
    #[error("{0} already exists")]
    Conflict(String),

    /// A correlation id was watched twice.
    #[error("Duplicate message id: {0}")]
    DuplicateId(MessageId),

    /// Failure value reported by the peer, or raised by a method.
    #[error("{}", describe(.0))]
    Rejected(Value),

    /// The peer's startup handler failed.
    #[error("Remote startup failed: {}", describe(.0))]
    Startup(Value),

    /// The transport ended before the operation completed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The session is already bound to a transport.
    #[error("Session already attached to a transport")]
    AlreadyAttached,

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// A method or startup handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// A call argument could not be decoded.
    #[error("Invalid argument {index}: {reason}")]
    InvalidArgument {
        /// Position of the argument.
        index: usize,
        /// Why decoding failed.
        reason: String,
    },
}

impl Error {
    /// Build an application failure carrying `value` as the reject payload.
    pub fn rejected(value: impl Into<Value>) -> Self {
        Self::Rejected(value.into())
    }

    /// Convert into the failure value sent on the wire.
    ///
    /// Peer-originated values pass through untouched so that a rejection
    /// relayed by a method reaches the next caller exactly as it was raised.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Rejected(value) | Self::Startup(value) => value,
            other => Value::String(other.to_string()),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_protocol_texts() {
        assert_eq!(Error::Conflict("f".into()).to_string(), "f already exists");
        assert_eq!(
            Error::MethodNotFound("f".into()).to_string(),
            "f does not exist"
        );
        assert_eq!(
            Error::AlreadyRegistered("f".into()).to_string(),
            "method \"f\" already exists"
        );
    }

    #[test]
    fn test_into_value_passes_peer_values_through() {
        let value = json!({ "code": 7 });
        assert_eq!(Error::Rejected(value.clone()).into_value(), value);
        assert_eq!(Error::Startup(value.clone()).into_value(), value);
        assert_eq!(
            Error::ConnectionClosed.into_value(),
            json!("Connection closed")
        );
    }

    #[test]
    fn test_rejected_display() {
        assert_eq!(Error::rejected("nope").to_string(), "nope");
        assert_eq!(Error::rejected(json!([1, 2])).to_string(), "[1,2]");
    }
}
