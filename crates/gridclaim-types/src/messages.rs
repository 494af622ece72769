//! Inbound client messages.
//!
//! Clients send `{"type": "...", "payload": {...}}` envelopes. Parsing is
//! two-staged so that a malformed envelope, an unknown type and a bad
//! payload for a known type can each be reported with their own
//! [`ErrorCode`].

use serde::Deserialize;

use crate::events::ErrorCode;

/// A message a client may send over its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// Application-level keepalive; answered with `PONG`.
    Ping,
    /// Request ownership of a tile.
    ClaimTile {
        /// Requested tile id, unvalidated. Kept wide so out-of-range and
        /// negative ids reach the resolver as `INVALID_TILE` rather than a
        /// payload error.
        tile_id: i64,
    },
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The frame is not a JSON envelope with a string `type`.
    #[error("malformed frame: {0}")]
    BadFrame(#[source] serde_json::Error),

    /// The envelope `type` is not recognised.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The payload does not match the envelope `type`.
    #[error("invalid payload: {0}")]
    BadPayload(#[source] serde_json::Error),
}

impl ParseError {
    /// The wire error code reported back to the client.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BadFrame(_) => ErrorCode::BadFrame,
            Self::UnknownType(_) => ErrorCode::UnknownMessage,
            Self::BadPayload(_) => ErrorCode::BadPayload,
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimTileRequest {
    tile_id: i64,
}

impl ClientMessage {
    /// Parse the text of one inbound frame.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let envelope: RawEnvelope = serde_json::from_str(text).map_err(ParseError::BadFrame)?;
        match envelope.kind.as_str() {
            "PING" => Ok(Self::Ping),
            "CLAIM_TILE" => {
                let request: ClaimTileRequest =
                    serde_json::from_value(envelope.payload).map_err(ParseError::BadPayload)?;
                Ok(Self::ClaimTile {
                    tile_id: request.tile_id,
                })
            }
            _ => Err(ParseError::UnknownType(envelope.kind)),
        }
    }
}
