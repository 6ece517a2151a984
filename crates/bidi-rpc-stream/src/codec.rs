//! CBOR encoding of protocol messages.

use crate::error::{Error, Result};

use bytes::Bytes;
use proven_bidi_rpc::Message;

/// Encode a message into CBOR bytes.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode(message: &Message) -> Result<Bytes> {
    let mut vec = Vec::new();
    ciborium::ser::into_writer(message, &mut vec)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(Bytes::from(vec))
}

/// Decode CBOR bytes into a message.
///
/// # Errors
///
/// Returns an error if the data is not a well-formed message.
pub fn decode(data: &[u8]) -> Result<Message> {
    ciborium::de::from_reader(data).map_err(|e| Error::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proven_bidi_rpc::MessageId;
    use serde_json::json;

    #[test]
    fn test_encode_decode() {
        let message = Message::Call {
            id: MessageId::new(),
            name: "hello".to_string(),
            args: vec![json!("world"), json!({ "nested": [1, 2.5, null] })],
        };

        let encoded = encode(&message).unwrap();
        assert_eq!(decode(&encoded).unwrap(), message);
    }

    #[test]
    fn test_wire_shape_is_tagged_map() {
        let encoded = encode(&Message::RemoteError {
            error: json!("bad"),
        })
        .unwrap();

        let raw: ciborium::Value = ciborium::de::from_reader(&encoded[..]).unwrap();
        let entries = raw.as_map().unwrap();
        let method = entries
            .iter()
            .find(|(key, _)| key.as_text() == Some("method"))
            .and_then(|(_, value)| value.as_text());
        assert_eq!(method, Some("remote-error"));
    }

    #[test]
    fn test_decode_error() {
        let result = decode(&[0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut vec = Vec::new();
        ciborium::ser::into_writer(&json!({ "method": "shutdown" }), &mut vec).unwrap();
        assert!(decode(&vec).is_err());
    }
}
