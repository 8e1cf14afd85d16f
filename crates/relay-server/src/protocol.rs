use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use relay_core::{DirectoryError, ServerEvent};

/// Client → server frame: `{"event": "...", "data": ..., "ack": ...}`.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    /// Correlation id echoed in the acknowledgment. Absent means no ack is wanted.
    #[serde(default)]
    pub ack: Option<Value>,
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// String field of the data object, or the data itself when it is a bare string.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        match &self.data {
            Value::String(s) => Some(s.as_str()),
            other => other.get(key).and_then(Value::as_str),
        }
    }
}

/// Server → client acknowledgment: `{"event": "ack", "ack": <id>, "data": {"ok": ..., ...}}`.
#[derive(Debug, Serialize)]
pub struct AckFrame {
    event: &'static str,
    pub ack: Value,
    pub data: Value,
}

impl AckFrame {
    pub fn new(ack: Value, data: Value) -> Self {
        Self {
            event: "ack",
            ack,
            data,
        }
    }
}

/// `{"ok": true, ...fields}`.
pub fn ack_ok(fields: Value) -> Value {
    let mut data = match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    data.insert("ok".into(), Value::Bool(true));
    Value::Object(data)
}

/// `{"ok": false, "error": <wire code>, "message": ...}`.
pub fn ack_err(err: &DirectoryError) -> Value {
    json!({
        "ok": false,
        "error": err.code(),
        "message": err.to_string(),
    })
}

pub fn encode_event(event: &ServerEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}

pub fn encode_ack(frame: &AckFrame) -> Option<String> {
    serde_json::to_string(frame).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_client_frame() {
        let frame =
            ClientFrame::parse(r#"{"event":"session-join","data":{"code":"000123456"},"ack":7}"#)
                .unwrap();
        assert_eq!(frame.event, "session-join");
        assert_eq!(frame.data_str("code"), Some("000123456"));
        assert_eq!(frame.ack, Some(json!(7)));
    }

    #[test]
    fn frame_without_data_or_ack() {
        let frame = ClientFrame::parse(r#"{"event":"session-create"}"#).unwrap();
        assert!(frame.data.is_null());
        assert!(frame.ack.is_none());
        assert_eq!(frame.data_str("code"), None);
    }

    #[test]
    fn bare_string_data() {
        let frame = ClientFrame::parse(r#"{"event":"client-type","data":"display"}"#).unwrap();
        assert_eq!(frame.data_str("type"), Some("display"));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(ClientFrame::parse("not json").is_none());
        assert!(ClientFrame::parse(r#"{"data":{}}"#).is_none());
    }

    #[test]
    fn ack_shapes() {
        let ok = ack_ok(json!({"code": "000000001"}));
        assert_eq!(ok, json!({"ok": true, "code": "000000001"}));

        let err = ack_err(&DirectoryError::AlreadyBound);
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"], "already_has_control");

        let frame = encode_ack(&AckFrame::new(json!("a1"), ok)).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "ack");
        assert_eq!(value["ack"], "a1");
        assert_eq!(value["data"]["ok"], true);
    }
}
