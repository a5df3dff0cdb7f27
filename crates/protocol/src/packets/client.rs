//! Client -> Server message parsing.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::kinds;
use crate::ProtocolError;

/// Raw envelope as received on the wire.
#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Payload of an `input` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct InputPayload {
    /// Client timestamp in milliseconds. Advisory only.
    pub t: i64,
    pub ax: f32,
    pub ay: f32,
    pub az: f32,
}

impl InputPayload {
    /// Acceleration vector carried by this input.
    #[inline]
    pub fn acceleration(&self) -> Vec3 {
        Vec3::new(self.ax, self.ay, self.az)
    }
}

/// Parsed client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Control input (`"input"`).
    Input(InputPayload),
    /// Any other discriminator. The payload is not inspected.
    Other(String),
}

impl ClientMessage {
    /// Parse a client message from raw bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_slice(data).map_err(ProtocolError::MalformedEnvelope)?;

        if envelope.kind != kinds::INPUT {
            return Ok(ClientMessage::Other(envelope.kind));
        }

        let payload: InputPayload = serde_json::from_value(envelope.data).map_err(|source| {
            ProtocolError::MalformedPayload {
                kind: envelope.kind,
                source,
            }
        })?;
        if !payload.acceleration().is_finite() {
            return Err(ProtocolError::NonFiniteInput);
        }
        Ok(ClientMessage::Input(payload))
    }

    /// Encode an input message the way a client sends it.
    pub fn encode_input(payload: &InputPayload) -> Result<String, ProtocolError> {
        let envelope = Envelope {
            kind: kinds::INPUT.to_string(),
            data: serde_json::to_value(payload).map_err(ProtocolError::Encode)?,
        };
        serde_json::to_string(&envelope).map_err(ProtocolError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_input() {
        let raw = br#"{"type":"input","data":{"t":42,"ax":1.5,"ay":0,"az":-2}}"#;
        let msg = ClientMessage::decode(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input(InputPayload { t: 42, ax: 1.5, ay: 0.0, az: -2.0 })
        );
    }

    #[test]
    fn test_decode_other_kind_ignores_payload() {
        let raw = br#"{"type":"chat","data":"hello"}"#;
        assert_eq!(
            ClientMessage::decode(raw).unwrap(),
            ClientMessage::Other("chat".to_string())
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            ClientMessage::decode(b"not json"),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            ClientMessage::decode(br#"{"type":"input","data":{"t":1,"ax":"fast"}}"#),
            Err(ProtocolError::MalformedPayload { .. })
        ));
        assert!(matches!(
            ClientMessage::decode(br#"{"type":"input"}"#),
            Err(ProtocolError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_overflowing_acceleration() {
        let raw = br#"{"type":"input","data":{"t":1,"ax":1e300,"ay":0,"az":0}}"#;
        assert!(ClientMessage::decode(raw).is_err());
    }

    #[test]
    fn test_encode_input() {
        let payload = InputPayload { t: 7, ax: 1.0, ay: 2.0, az: 3.0 };
        let text = ClientMessage::encode_input(&payload).unwrap();
        assert_eq!(
            ClientMessage::decode(text.as_bytes()).unwrap(),
            ClientMessage::Input(payload)
        );
    }
}
