//! Protocol layer.
//!
//! The closed set of messages two sessions exchange. Encoding these onto
//! bytes is left to a collaborating codec (see `proven-bidi-rpc-stream`).

pub mod message;

pub use message::{Message, MessageId};
