use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::protocol::{MessageType, RawFrame, frame_message};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KillSignal {
    Name(String),
    Number(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum ControlCommand {
    Resize {
        cols: u16,
        rows: u16,
    },
    Kill {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<KillSignal>,
    },
    ResetSize,
    UpdateTitle {
        title: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub app: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Every message that can travel over a session socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Stdin(String),
    Control(ControlCommand),
    Status(StatusUpdate),
    Heartbeat,
    Error(ErrorMessage),
}

impl Message {
    pub fn resize(cols: u16, rows: u16) -> Self {
        Message::Control(ControlCommand::Resize { cols, rows })
    }

    pub fn kill(signal: Option<KillSignal>) -> Self {
        Message::Control(ControlCommand::Kill { signal })
    }

    pub fn reset_size() -> Self {
        Message::Control(ControlCommand::ResetSize)
    }

    pub fn update_title(title: impl Into<String>) -> Self {
        Message::Control(ControlCommand::UpdateTitle {
            title: title.into(),
        })
    }

    pub fn status(app: impl Into<String>, status: impl Into<String>) -> Self {
        Message::Status(StatusUpdate {
            app: app.into(),
            status: status.into(),
            timestamp: Some(unix_millis()),
        })
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Message::Error(ErrorMessage {
            code: code.into(),
            message: message.into(),
            details: None,
        })
    }

    pub fn kind(&self) -> MessageType {
        match self {
            Message::Stdin(_) => MessageType::StdinData,
            Message::Control(_) => MessageType::ControlCmd,
            Message::Status(_) => MessageType::StatusUpdate,
            Message::Heartbeat => MessageType::Heartbeat,
            Message::Error(_) => MessageType::Error,
        }
    }

    /// Serialises the message into a complete wire frame.
    pub fn to_frame(&self) -> Vec<u8> {
        let payload = match self {
            Message::Stdin(text) => text.as_bytes().to_vec(),
            Message::Heartbeat => Vec::new(),
            Message::Control(cmd) => to_json(cmd),
            Message::Status(status) => to_json(status),
            Message::Error(err) => to_json(err),
        };
        frame_message(self.kind(), &payload)
    }

    pub fn decode(frame: RawFrame) -> Result<Self, ProtocolError> {
        let kind = frame.kind;
        let invalid = |e: serde_json::Error| ProtocolError::InvalidPayload {
            kind: kind.as_str(),
            reason: e.to_string(),
        };

        match kind {
            MessageType::StdinData => Ok(Message::Stdin(
                String::from_utf8_lossy(&frame.payload).into_owned(),
            )),
            MessageType::ControlCmd => serde_json::from_slice(&frame.payload)
                .map(Message::Control)
                .map_err(invalid),
            MessageType::StatusUpdate => serde_json::from_slice(&frame.payload)
                .map(Message::Status)
                .map_err(invalid),
            MessageType::Heartbeat => Ok(Message::Heartbeat),
            MessageType::Error => serde_json::from_slice(&frame.payload)
                .map(Message::Error)
                .map_err(invalid),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Vec<u8> {
    // Plain structs of strings and integers always serialise.
    serde_json::to_vec(value).unwrap_or_default()
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageParser;

    fn roundtrip(message: &Message) -> Message {
        let mut parser = MessageParser::default();
        parser.add_data(&message.to_frame());
        Message::decode(parser.next_frame().unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_control_commands_match_wire_format() {
        let json = serde_json::to_value(ControlCommand::Resize { cols: 80, rows: 24 }).unwrap();
        assert_eq!(json, serde_json::json!({"cmd": "resize", "cols": 80, "rows": 24}));

        let json = serde_json::to_value(ControlCommand::ResetSize).unwrap();
        assert_eq!(json, serde_json::json!({"cmd": "reset-size"}));

        let cmd: ControlCommand =
            serde_json::from_str(r#"{"cmd":"update-title","title":"hi"}"#).unwrap();
        assert_eq!(
            cmd,
            ControlCommand::UpdateTitle {
                title: "hi".into()
            }
        );
    }

    #[test]
    fn test_kill_signal_accepts_name_or_number() {
        let cmd: ControlCommand = serde_json::from_str(r#"{"cmd":"kill","signal":9}"#).unwrap();
        assert_eq!(
            cmd,
            ControlCommand::Kill {
                signal: Some(KillSignal::Number(9))
            }
        );
        let cmd: ControlCommand =
            serde_json::from_str(r#"{"cmd":"kill","signal":"SIGTERM"}"#).unwrap();
        assert_eq!(
            cmd,
            ControlCommand::Kill {
                signal: Some(KillSignal::Name("SIGTERM".into()))
            }
        );
        let cmd: ControlCommand = serde_json::from_str(r#"{"cmd":"kill"}"#).unwrap();
        assert_eq!(cmd, ControlCommand::Kill { signal: None });
    }

    #[test]
    fn test_decode_each_kind() {
        assert_eq!(
            roundtrip(&Message::Stdin("echo ✓\r".into())),
            Message::Stdin("echo ✓\r".into())
        );
        assert_eq!(roundtrip(&Message::Heartbeat), Message::Heartbeat);
        assert_eq!(roundtrip(&Message::resize(100, 30)), Message::resize(100, 30));

        match roundtrip(&Message::status("claude", "thinking")) {
            Message::Status(status) => {
                assert_eq!(status.app, "claude");
                assert_eq!(status.status, "thinking");
                assert!(status.timestamp.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }

        match roundtrip(&Message::error("E_BUSY", "busy")) {
            Message::Error(err) => assert_eq!(err.code, "E_BUSY"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_control_payload() {
        let frame = RawFrame {
            kind: MessageType::ControlCmd,
            payload: br#"{"cmd":"explode"}"#.to_vec(),
        };
        assert!(matches!(
            Message::decode(frame),
            Err(ProtocolError::InvalidPayload {
                kind: "control",
                ..
            })
        ));
    }
}
