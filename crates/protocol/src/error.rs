//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding or encoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    #[error("Malformed payload for message type {kind:?}: {source}")]
    MalformedPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Non-finite acceleration component in input")]
    NonFiniteInput,

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}
