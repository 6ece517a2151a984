//! Protocol messages exchanged between peers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Correlation id linking a request to its terminal response.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A protocol message.
///
/// The wire form is a map tagged by `method`, e.g.
/// `{"method": "call", "id": "...", "name": "hello", "args": ["world"]}`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum Message {
    /// The sender's startup handler completed.
    RemoteReady,

    /// The sender's startup handler failed.
    RemoteError {
        /// Failure reported by the handler.
        error: Value,
    },

    /// The sender wants to expose `name`.
    Register {
        /// Correlation id.
        id: MessageId,
        /// Method name.
        name: String,
    },

    /// The sender wants to stop exposing `name`.
    Deregister {
        /// Correlation id.
        id: MessageId,
        /// Method name.
        name: String,
    },

    /// Invoke the receiver's method `name`.
    Call {
        /// Correlation id.
        id: MessageId,
        /// Method name.
        name: String,
        /// Ordered arguments.
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Terminal success for request `id`.
    Resolve {
        /// Correlation id of the request.
        id: MessageId,
        /// Result value; null for acknowledgements.
        #[serde(default)]
        result: Value,
    },

    /// Terminal failure for request `id`.
    Reject {
        /// Correlation id of the request.
        id: MessageId,
        /// Failure value.
        error: Value,
    },

    /// Non-terminal update for call `id`.
    Progress {
        /// Correlation id of the call.
        id: MessageId,
        /// Progress value.
        progress: Value,
    },
}

impl Message {
    /// The wire tag of this message.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::RemoteReady => "remote-ready",
            Self::RemoteError { .. } => "remote-error",
            Self::Register { .. } => "register",
            Self::Deregister { .. } => "deregister",
            Self::Call { .. } => "call",
            Self::Resolve { .. } => "resolve",
            Self::Reject { .. } => "reject",
            Self::Progress { .. } => "progress",
        }
    }

    /// The correlation id, absent only on handshake messages.
    #[must_use]
    pub const fn id(&self) -> Option<MessageId> {
        match self {
            Self::RemoteReady | Self::RemoteError { .. } => None,
            Self::Register { id, .. }
            | Self::Deregister { id, .. }
            | Self::Call { id, .. }
            | Self::Resolve { id, .. }
            | Self::Reject { id, .. }
            | Self::Progress { id, .. } => Some(*id),
        }
    }

    /// Whether this message settles a pending request.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolve { .. } | Self::Reject { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let id = MessageId::new();
        let call = Message::Call {
            id,
            name: "hello".to_string(),
            args: vec![json!("world")],
        };

        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["method"], "call");
        assert_eq!(value["id"], id.to_string());
        assert_eq!(value["args"], json!(["world"]));

        let ready = serde_json::to_value(Message::RemoteReady).unwrap();
        assert_eq!(ready, json!({ "method": "remote-ready" }));
    }

    #[test]
    fn test_ack_without_result() {
        let id = MessageId::new();
        let parsed: Message =
            serde_json::from_value(json!({ "method": "resolve", "id": id.to_string() })).unwrap();

        assert_eq!(
            parsed,
            Message::Resolve {
                id,
                result: Value::Null
            }
        );
        assert!(parsed.is_terminal());
    }

    #[test]
    fn test_tags_and_ids() {
        let id = MessageId::new();
        assert_eq!(Message::RemoteReady.id(), None);
        assert_eq!(
            Message::Progress {
                id,
                progress: json!(50)
            }
            .id(),
            Some(id)
        );
        assert_eq!(
            Message::RemoteError { error: json!("x") }.method(),
            "remote-error"
        );
        assert!(!Message::Progress {
            id,
            progress: Value::Null
        }
        .is_terminal());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let result: Result<Message, _> = serde_json::from_value(json!({ "method": "explode" }));
        assert!(result.is_err());
    }
}
