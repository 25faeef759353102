//! WebSocket message types.
//!
//! A [`Message`] is a complete application message: a single unfragmented
//! frame or the reassembly of a fragmented one. Control traffic (ping, pong,
//! close) is surfaced through dedicated listeners instead.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CloseCode, WsError, WsResult};
use crate::frame::Opcode;

/// A complete WebSocket data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message.
    Binary(Bytes),
}

impl Message {
    /// Create a new text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a new binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Check if this is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Check if this is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// The opcode this message is sent with.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Text(_) => Opcode::Text,
            Self::Binary(_) => Opcode::Binary,
        }
    }

    /// Get the message payload as text.
    ///
    /// Returns `None` if this is not a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// Get the message payload as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    /// Convert the message into text.
    ///
    /// Returns `None` if this is not a text message.
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// Convert the message into its payload bytes.
    pub fn into_payload(self) -> Bytes {
        match self {
            Self::Text(s) => Bytes::from(s),
            Self::Binary(b) => b,
        }
    }

    /// Try to parse the text message as JSON.
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> WsResult<T> {
        let text = self
            .as_text()
            .ok_or_else(|| WsError::invalid_payload("not a text message"))?;
        serde_json::from_str(text).map_err(|e| WsError::invalid_payload(e.to_string()))
    }

    /// Create a text message from a JSON-serializable value.
    pub fn from_json<T: Serialize>(value: &T) -> WsResult<Self> {
        let text = serde_json::to_string(value).map_err(|e| WsError::internal(e.to_string()))?;
        Ok(Self::Text(text))
    }

    /// Get the length of the message payload in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Check if the message payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

/// How a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFrame {
    /// The close code.
    pub code: u16,
    /// The close reason.
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame.
    pub fn new(code: impl Into<u16>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// A normal closure with no reason.
    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "")
    }

    /// The close code as a known [`CloseCode`], if it is one.
    pub fn close_code(&self) -> Option<CloseCode> {
        CloseCode::from_u16(self.code)
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text() {
        let msg = Message::text("hello");
        assert!(msg.is_text());
        assert!(!msg.is_binary());
        assert_eq!(msg.opcode(), Opcode::Text);
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(msg.len(), 5);
    }

    #[test]
    fn test_message_binary() {
        let msg = Message::binary(vec![1u8, 2, 3]);
        assert!(msg.is_binary());
        assert_eq!(msg.opcode(), Opcode::Binary);
        assert_eq!(msg.as_text(), None);
        assert_eq!(msg.as_bytes(), &[1, 2, 3]);
        assert_eq!(msg.into_payload(), Bytes::from_static(&[1, 2, 3]));
    }

    #[test]
    fn test_message_json() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Chat {
            room: String,
            body: String,
        }

        let value = Chat {
            room: "lobby".to_string(),
            body: "hi".to_string(),
        };
        let msg = Message::from_json(&value).unwrap();
        let parsed: Chat = msg.json().unwrap();
        assert_eq!(parsed, value);

        let err = Message::binary(vec![0u8]).json::<Chat>().unwrap_err();
        assert!(matches!(err, WsError::InvalidPayload(_)));
    }

    #[test]
    fn test_message_from() {
        assert_eq!(Message::from("a"), Message::text("a"));
        assert_eq!(Message::from(vec![1u8]), Message::binary(vec![1u8]));
        assert!(Message::text("").is_empty());
    }

    #[test]
    fn test_close_frame_display() {
        assert_eq!(CloseFrame::normal().to_string(), "1000");
        assert_eq!(
            CloseFrame::new(CloseCode::GoingAway, "heartbeat timeout").to_string(),
            "1001: heartbeat timeout"
        );
        assert_eq!(CloseFrame::new(4000u16, "").close_code(), None);
    }
}
