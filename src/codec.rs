//! Envelope encoding and validation.
//!
//! Outgoing intents are serialized straight from [`ClientMessage`]. Incoming
//! text goes through two stages so a failure can be classified: first the raw
//! `{type, payload}` envelope, then the typed [`ServerMessage`] for the tag.

use serde::Deserialize;
use tracing::warn;

use crate::error::{DecodeError, Result};
use crate::protocol::{ClientMessage, ServerMessage};

/// Untyped view of an incoming envelope.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<serde_json::Value>,
}

/// Serialize an outgoing intent into its JSON envelope.
///
/// # Errors
///
/// Returns [`ChessSyncError::Serialization`](crate::error::ChessSyncError::Serialization)
/// if serde fails, which only happens on a programming error.
pub fn encode(message: &ClientMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode and validate one incoming envelope.
///
/// # Errors
///
/// - [`DecodeError::Malformed`] when the text is not a JSON object envelope
/// - [`DecodeError::MissingType`] when `type` is absent or not a string
/// - [`DecodeError::UnknownType`] when `type` is outside the vocabulary
/// - [`DecodeError::InvalidPayload`] when the payload lacks required fields
pub fn decode(text: &str) -> std::result::Result<ServerMessage, DecodeError> {
    let raw: RawEnvelope =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind = match raw.kind {
        Some(serde_json::Value::String(kind)) => kind,
        _ => return Err(DecodeError::MissingType),
    };

    if !ServerMessage::TYPE_TAGS.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }

    serde_json::from_str::<ServerMessage>(text).map_err(|e| DecodeError::InvalidPayload {
        kind,
        detail: e.to_string(),
    })
}

/// Decode, logging and discarding anything invalid.
///
/// Returns the error as well so callers can surface it for diagnostics.
pub fn decode_or_log(text: &str) -> std::result::Result<ServerMessage, DecodeError> {
    decode(text).inspect_err(|e| warn!(error = %e, raw = %text, "discarding inbound message"))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{Color, Move, Square};

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    #[test]
    fn encode_move_submit() {
        let json = encode(&ClientMessage::Move(Move::new(sq("e2"), sq("e4")))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "MOVE", "payload": { "from": "e2", "to": "e4" } })
        );
    }

    #[test]
    fn decode_move_broadcast() {
        let msg = decode(r#"{"type":"MOVE","payload":{"from":"a2","to":"a4"}}"#).unwrap();
        assert_eq!(msg, ServerMessage::Move(Move::new(sq("a2"), sq("a4"))));
    }

    #[test]
    fn decode_accepts_payload_before_type() {
        let msg = decode(r#"{"payload":{"color":"white"},"type":"INIT_GAME"}"#).unwrap();
        match msg {
            ServerMessage::InitGame(p) => assert_eq!(p.color, Color::White),
            other => panic!("expected InitGame, got {other:?}"),
        }
    }

    #[test]
    fn decode_legacy_snapshot_alias() {
        let msg = decode(
            r#"{"type":"game_state","payload":{"fen":"8/8/8/8/8/8/8/K6k w - - 0 1","whiteTimeMs":1,"blackTimeMs":2}}"#,
        )
        .unwrap();
        assert_eq!(msg.type_tag(), "GAME_UPDATE");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(decode("{not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode("\"e2e4\""), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(matches!(
            decode(r#"{"payload":{}}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            decode(r#"{"type":7,"payload":{}}"#),
            Err(DecodeError::MissingType)
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        match decode(r#"{"type":"TELEPORT","payload":{}}"#) {
            Err(DecodeError::UnknownType(kind)) => assert_eq!(kind, "TELEPORT"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn move_without_to_is_invalid_payload() {
        match decode(r#"{"type":"MOVE","payload":{"from":"e2"}}"#) {
            Err(DecodeError::InvalidPayload { kind, .. }) => assert_eq!(kind, "MOVE"),
            other => panic!("expected InvalidPayload, got {other:?}"),
        }
    }

    #[test]
    fn bad_square_is_invalid_payload() {
        assert!(matches!(
            decode(r#"{"type":"MOVE","payload":{"from":"e9","to":"e4"}}"#),
            Err(DecodeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn snapshot_without_fen_is_invalid_payload() {
        assert!(matches!(
            decode(r#"{"type":"GAME_UPDATE","payload":{"whiteTimeMs":1,"blackTimeMs":1}}"#),
            Err(DecodeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn games_list_defaults_to_empty() {
        let msg = decode(r#"{"type":"GAMES_LIST","payload":{}}"#).unwrap();
        match msg {
            ServerMessage::GamesList(list) => assert!(list.games.is_empty()),
            other => panic!("expected GamesList, got {other:?}"),
        }
    }
}
