//! WebSocket wire frames.
//!
//! Every frame, inbound or outbound, is a JSON object
//! `{type, eventId, data, timestamp}` with the timestamp in Unix
//! milliseconds. The only inbound type the hub itself interprets is `PING`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Enumerated frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Ping,
    Pong,
    UserMarkedAttending,
    VelvetHourParticipantJoined,
    VelvetHourSessionStarted,
    VelvetHourRoundStarted,
    VelvetHourMatchConfirmed,
    VelvetHourFeedbackSubmitted,
    VelvetHourSessionEnded,
    VelvetHourSessionReset,
    AttendanceStatsUpdate,
    VelvetHourStatusUpdate,
    AdminDisconnect,
}

impl MessageType {
    /// Wire name, used for metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::UserMarkedAttending => "USER_MARKED_ATTENDING",
            Self::VelvetHourParticipantJoined => "VELVET_HOUR_PARTICIPANT_JOINED",
            Self::VelvetHourSessionStarted => "VELVET_HOUR_SESSION_STARTED",
            Self::VelvetHourRoundStarted => "VELVET_HOUR_ROUND_STARTED",
            Self::VelvetHourMatchConfirmed => "VELVET_HOUR_MATCH_CONFIRMED",
            Self::VelvetHourFeedbackSubmitted => "VELVET_HOUR_FEEDBACK_SUBMITTED",
            Self::VelvetHourSessionEnded => "VELVET_HOUR_SESSION_ENDED",
            Self::VelvetHourSessionReset => "VELVET_HOUR_SESSION_RESET",
            Self::AttendanceStatsUpdate => "ATTENDANCE_STATS_UPDATE",
            Self::VelvetHourStatusUpdate => "VELVET_HOUR_STATUS_UPDATE",
            Self::AdminDisconnect => "ADMIN_DISCONNECT",
        }
    }
}

/// A frame as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub event_id: Uuid,
    #[serde(default)]
    pub data: Value,
    pub timestamp: i64,
}

impl WsMessage {
    pub fn new(message_type: MessageType, event_id: Uuid, data: Value, timestamp: i64) -> Self {
        Self {
            message_type,
            event_id,
            data,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_are_screaming_snake() {
        let frame = WsMessage::new(
            MessageType::VelvetHourRoundStarted,
            Uuid::nil(),
            json!({"roundNumber": 1}),
            1_700_000_000_000,
        );
        let text = serde_json::to_string(&frame).expect("serialize");
        assert!(text.contains("\"type\":\"VELVET_HOUR_ROUND_STARTED\""));
        assert!(text.contains("\"eventId\""));
        assert!(text.contains("\"timestamp\":1700000000000"));
    }

    #[test]
    fn ping_round_trips() {
        let text = r#"{"type":"PING","eventId":"00000000-0000-0000-0000-000000000000","data":null,"timestamp":0}"#;
        let frame: WsMessage = serde_json::from_str(text).expect("parse");
        assert_eq!(frame.message_type, MessageType::Ping);
        assert_eq!(frame.message_type.as_str(), "PING");
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        let text = r#"{"type":"NOT_A_THING","eventId":"00000000-0000-0000-0000-000000000000","data":null,"timestamp":0}"#;
        assert!(serde_json::from_str::<WsMessage>(text).is_err());
    }
}
