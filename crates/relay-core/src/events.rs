use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ConnectionId, SessionCode};

/// Events pushed from the relay to clients.
///
/// Serialized as `{"event": "<kebab-case name>", "data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Welcome {
        message: String,
        client_id: ConnectionId,
        timestamp: i64,
    },

    /// Only ever sent to the control connection that owns the session.
    #[serde(rename_all = "camelCase")]
    SessionCreated {
        code: SessionCode,
        ttl_ms: u64,
        expires_at: i64,
        resume_token: String,
    },

    SessionResumed { code: SessionCode },

    #[serde(rename_all = "camelCase")]
    DisplayJoined { connection_id: ConnectionId },

    SessionStale { code: SessionCode },

    #[serde(rename_all = "camelCase")]
    SessionExpiring { code: SessionCode, in_ms: u64 },

    SessionClosed { code: SessionCode },

    /// Relayed payload, already stamped with `code` and `receivedAt`.
    StreamingText(Map<String, Value>),

    FinalTranslation(Map<String, Value>),

    TextReceived { message: String, timestamp: i64 },

    TranslationReceived { message: String, timestamp: i64 },

    ClientCount { count: usize },
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::SessionCreated { .. } => "session-created",
            Self::SessionResumed { .. } => "session-resumed",
            Self::DisplayJoined { .. } => "display-joined",
            Self::SessionStale { .. } => "session-stale",
            Self::SessionExpiring { .. } => "session-expiring",
            Self::SessionClosed { .. } => "session-closed",
            Self::StreamingText(_) => "streaming-text",
            Self::FinalTranslation(_) => "final-translation",
            Self::TextReceived { .. } => "text-received",
            Self::TranslationReceived { .. } => "translation-received",
            Self::ClientCount { .. } => "client-count",
        }
    }}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_created_wire_shape() {
        let event = ServerEvent::SessionCreated {
            code: SessionCode::from_number(123_456),
            ttl_ms: 3_600_000,
            expires_at: 1_700_000_000_000,
            resume_token: "tok".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "session-created",
                "data": {
                    "code": "000123456",
                    "ttlMs": 3_600_000,
                    "expiresAt": 1_700_000_000_000i64,
                    "resumeToken": "tok",
                }
            })
        );
    }

    #[test]
    fn expiring_uses_camel_case() {
        let event = ServerEvent::SessionExpiring {
            code: SessionCode::from_number(1),
            in_ms: 60_000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "session-expiring");
        assert_eq!(value["data"]["inMs"], 60_000);
    }

    #[test]
    fn relayed_payload_is_flat() {
        let mut payload = Map::new();
        payload.insert("text".into(), json!("hola"));
        payload.insert("code".into(), json!("000000001"));
        let event = ServerEvent::StreamingText(payload);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "streaming-text");
        assert_eq!(value["data"]["text"], "hola");
        assert_eq!(value["data"]["code"], "000000001");
    }

    #[test]
    fn event_names_match_wire_tags() {
        let events = [
            ServerEvent::SessionStale { code: SessionCode::from_number(1) },
            ServerEvent::SessionClosed { code: SessionCode::from_number(1) },
            ServerEvent::ClientCount { count: 3 },
            ServerEvent::DisplayJoined { connection_id: ConnectionId::from_raw("conn_x") },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event"], event.event_name());
        }
    }

    #[test]
    fn deserializes_from_wire() {
        let raw = r#"{"event":"session-closed","data":{"code":"000000009"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event, ServerEvent::SessionClosed { code: SessionCode::from_number(9) });
    }
}
