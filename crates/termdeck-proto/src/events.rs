use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Session identifier, unique within one connection's lifetime and stable
/// for the life of the session. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

/// Events flowing client → server.
///
/// `open-session` is the only event without a `sessionId`: it allocates one,
/// and the server acknowledges with `session-opened` before any other event
/// referencing that id is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    OpenSession {
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
    },
    /// Raw terminal input, unbuffered; `data` is base64.
    #[serde(rename_all = "camelCase")]
    Input { session_id: SessionId, data: String },
    /// Values below 1 are treated as a no-op server-side: a transient
    /// 0-sized layout during UI reflow is expected, not a fault.
    #[serde(rename_all = "camelCase")]
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    #[serde(rename_all = "camelCase")]
    CloseSession { session_id: SessionId },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Events flowing server → client, each tagged with the originating
/// session so one connection can multiplex several visible tabs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Acknowledges `open-session` with the assigned id. `pid` is absent
    /// when the shell failed to start; the failure itself arrives as
    /// readable `output` text followed by `session-exit`.
    #[serde(rename_all = "camelCase")]
    SessionOpened {
        session_id: SessionId,
        cols: u16,
        rows: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },
    /// Raw terminal output; `data` is base64 and passed through unmodified.
    #[serde(rename_all = "camelCase")]
    Output { session_id: SessionId, data: String },
    #[serde(rename_all = "camelCase")]
    SessionExit {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        code: i32,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
}

impl ServerEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Encode raw terminal bytes for transport inside a JSON frame.
pub fn encode_bytes(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode a `data` payload back into raw bytes.
pub fn decode_bytes(data: &str) -> Result<Vec<u8>, ProtoError> {
    Ok(BASE64.decode(data)?)
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_session_defaults_geometry() {
        let event = ClientEvent::from_json(r#"{"type":"open-session"}"#).expect("parse");
        assert_eq!(
            event,
            ClientEvent::OpenSession {
                cols: DEFAULT_COLS,
                rows: DEFAULT_ROWS
            }
        );
    }

    #[test]
    fn test_input_wire_shape() {
        let event = ClientEvent::from_json(
            r#"{"type":"input","sessionId":"ab12cd34","data":"bHMgLWwK"}"#,
        )
        .expect("parse");
        match event {
            ClientEvent::Input { session_id, data } => {
                assert_eq!(session_id.as_str(), "ab12cd34");
                assert_eq!(decode_bytes(&data).expect("decode"), b"ls -l\n");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_resize_round_trip() {
        let event = ClientEvent::Resize {
            session_id: SessionId::new("ab12cd34"),
            cols: 120,
            rows: 40,
        };
        let json = event.to_json().expect("serialize");
        assert!(json.contains(r#""type":"resize""#), "{json}");
        assert!(json.contains(r#""sessionId":"ab12cd34""#), "{json}");
        assert_eq!(ClientEvent::from_json(&json).expect("parse"), event);
    }

    #[test]
    fn test_output_preserves_raw_bytes() {
        let raw: &[u8] = b"\x1b[31mred\x1b[0m\r\n";
        let event = ServerEvent::Output {
            session_id: SessionId::new("ab12cd34"),
            data: encode_bytes(raw),
        };
        let json = event.to_json().expect("serialize");
        match ServerEvent::from_json(&json).expect("parse") {
            ServerEvent::Output { data, .. } => {
                assert_eq!(decode_bytes(&data).expect("decode"), raw);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_session_opened_omits_absent_pid() {
        let event = ServerEvent::SessionOpened {
            session_id: SessionId::new("ab12cd34"),
            cols: 80,
            rows: 24,
            pid: None,
        };
        let json = event.to_json().expect("serialize");
        assert!(!json.contains("pid"), "{json}");
    }

    #[test]
    fn test_error_event_wire_shape() {
        let event = ServerEvent::Error {
            code: crate::error_codes::UNKNOWN_SESSION,
            message: "unknown session: ab12cd34".to_string(),
            session_id: Some(SessionId::new("ab12cd34")),
        };
        let json = event.to_json().expect("serialize");
        assert!(json.contains(r#""type":"error""#), "{json}");
        assert!(json.contains(r#""code":4704"#), "{json}");
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        assert!(ClientEvent::from_json(r#"{"type":"reboot"}"#).is_err());
        assert!(ClientEvent::from_json("not json at all").is_err());
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        assert!(decode_bytes("!!!not-base64!!!").is_err());
    }
}
