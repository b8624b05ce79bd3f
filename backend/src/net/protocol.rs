use super::error::ProtocolError;
use crate::game::core::{GameMode, RoundState};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const PROTOCOL_VERSION: u32 = 1;

/// Everything that crosses the link, one per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Host to client, after every state change
    StateSnapshot { state: RoundState },
    /// Client to host, a player 2 touch
    TouchEvent { timestamp: u64 },
    // Reserved: decoded and logged, no effect yet
    StartGame { mode: GameMode },
    ResetGame,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(default = "default_version")]
    v: u32,
    #[serde(flatten)]
    message: WireMessage,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

/// Serialize one message as a single `\n`-terminated JSON line.
pub fn encode_line(message: &WireMessage) -> Result<String, ProtocolError> {
    let envelope = Envelope {
        v: PROTOCOL_VERSION,
        message: message.clone(),
    };
    let mut line = serde_json::to_string(&envelope).map_err(ProtocolError::Encode)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line(line: &str) -> Result<WireMessage, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(line.trim_end()).map_err(ProtocolError::Decode)?;
    if envelope.v > PROTOCOL_VERSION {
        debug!(version = envelope.v, "Peer speaks a newer protocol");
    }
    Ok(envelope.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::core::{Color, GamePhase};

    #[test]
    fn touch_event_line_is_tagged_and_versioned() {
        let line = encode_line(&WireMessage::TouchEvent { timestamp: 42 }).unwrap();

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "touch_event");
        assert_eq!(value["v"], 1);
        assert_eq!(value["timestamp"], 42);
    }

    #[test]
    fn reset_game_has_no_payload() {
        let line = encode_line(&WireMessage::ResetGame).unwrap();
        assert_eq!(line, "{\"v\":1,\"type\":\"reset_game\"}\n");
    }

    #[test]
    fn snapshot_survives_the_wire() {
        let mut state = RoundState::new(GameMode::Confusion);
        state.score_p1 = 3;
        state.phase = GamePhase::Active;
        state.round_color = Color::Blue;
        state.target_text_color = Some(Color::Orange);
        state.move_history.push("P1 touched at 5".to_string());
        let message = WireMessage::StateSnapshot { state };

        let decoded = decode_line(&encode_line(&message).unwrap()).unwrap();

        assert_eq!(decoded, message);
    }

    #[test]
    fn missing_version_defaults_to_current() {
        let decoded = decode_line(r#"{"type":"touch_event","timestamp":7}"#).unwrap();
        assert_eq!(decoded, WireMessage::TouchEvent { timestamp: 7 });
    }

    #[test]
    fn newer_version_and_unknown_fields_still_decode() {
        let decoded =
            decode_line(r#"{"v":2,"type":"start_game","mode":"TIME_ATTACK","extra":true}"#)
                .unwrap();
        assert_eq!(
            decoded,
            WireMessage::StartGame {
                mode: GameMode::TimeAttack
            }
        );
    }

    #[test]
    fn snapshot_with_only_core_fields_decodes_with_defaults() {
        let line = r#"{"v":1,"type":"state_snapshot","state":{"score_p1":1,"score_p2":2,"phase":"WAITING","mode":"CLASSIC"}}"#;

        let WireMessage::StateSnapshot { state } = decode_line(line).unwrap() else {
            panic!("expected snapshot");
        };

        assert_eq!(state.scores(), (1, 2));
        assert_eq!(state.round_color, Color::Gray);
        assert!(state.move_history.is_empty());
    }

    #[test]
    fn unknown_discriminator_is_rejected() {
        let err = decode_line(r#"{"v":1,"type":"chat","text":"hi"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_line("not json").is_err());
        assert!(decode_line("").is_err());
    }
}
