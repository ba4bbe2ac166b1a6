//! Data types shared across the Chatlog engine.
//!
//! Everything here is owned data: values handed to callers are copies, never
//! references into the engine's caches.

use std::path::PathBuf;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// A session derived from the history log.
///
/// Sessions are not stored anywhere; they are rebuilt from history entries
/// on every listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier (file name of the session log without extension).
    pub id: String,

    /// Summary text of the first history entry seen for this session.
    pub display: String,

    /// Timestamp of the first history entry seen for this session.
    pub timestamp: i64,

    /// Project path the session belongs to.
    pub project: String,

    /// Last segment of [`Session::project`].
    pub project_name: String,
}

/// The record types the readers care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    Summary,
}

impl MessageKind {
    /// Maps a record's `type` value to a kind; other types yield `None`.
    #[must_use]
    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }

    /// Whether this kind is a conversational turn (user or assistant).
    #[must_use]
    pub fn is_turn(self) -> bool {
        matches!(self, Self::User | Self::Assistant)
    }
}

/// A single record from a session log.
///
/// The engine only interprets the `type` field; the rest of the record is
/// passed through untouched and serializes back to the original object.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    kind: MessageKind,
    record: Value,
}

impl ConversationMessage {
    /// Wraps a parsed record if its `type` is one of the known kinds.
    #[must_use]
    pub fn from_record(record: Value) -> Option<Self> {
        let kind = record
            .get("type")
            .and_then(Value::as_str)
            .and_then(MessageKind::from_type)?;
        Some(Self { kind, record })
    }

    /// Parses one line of a session log.
    ///
    /// Returns `Err` when the line is not valid JSON and `Ok(None)` when it is
    /// valid JSON without a known `type`.
    pub fn parse_line(line: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        let record: Value = serde_json::from_slice(line)?;
        Ok(Self::from_record(record))
    }

    /// The record's type tag.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The full record as read from disk.
    #[must_use]
    pub fn record(&self) -> &Value {
        &self.record
    }

    /// Consumes the message, returning the raw record.
    #[must_use]
    pub fn into_record(self) -> Value {
        self.record
    }
}

impl Serialize for ConversationMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.record.serialize(serializer)
    }
}

/// Result of an incremental read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    /// New user/assistant messages, in file order.
    pub messages: Vec<ConversationMessage>,

    /// Byte offset to pass to the next read.
    pub next_offset: u64,
}

impl StreamChunk {
    /// A chunk with no messages.
    #[must_use]
    pub fn empty(next_offset: u64) -> Self {
        Self {
            messages: Vec::new(),
            next_offset,
        }
    }
}

/// Change notifications emitted by the watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeEvent {
    /// The history log was created or appended to.
    HistoryChanged,

    /// A session log was created or appended to.
    #[serde(rename_all = "camelCase")]
    SessionChanged {
        /// Session id (file name without extension).
        session_id: String,
        /// Absolute path of the session log.
        path: PathBuf,
    },

    /// A session inside the project directory changed.
    #[serde(rename_all = "camelCase")]
    ProjectChanged {
        /// Name of the project directory.
        project_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_kind_from_type() {
        assert_eq!(MessageKind::from_type("user"), Some(MessageKind::User));
        assert_eq!(MessageKind::from_type("assistant"), Some(MessageKind::Assistant));
        assert_eq!(MessageKind::from_type("summary"), Some(MessageKind::Summary));
        assert_eq!(MessageKind::from_type("progress"), None);
        assert_eq!(MessageKind::from_type("User"), None);
    }

    #[test]
    fn test_parse_line_known_type() {
        let msg = ConversationMessage::parse_line(br#"{"type":"user","message":{"content":"hi"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(msg.kind(), MessageKind::User);
        assert_eq!(msg.record()["message"]["content"], "hi");
    }

    #[test]
    fn test_parse_line_unknown_type() {
        let parsed = ConversationMessage::parse_line(br#"{"type":"file-history-snapshot"}"#).unwrap();
        assert!(parsed.is_none());

        let untyped = ConversationMessage::parse_line(b"42").unwrap();
        assert!(untyped.is_none());
    }

    #[test]
    fn test_parse_line_invalid_json() {
        assert!(ConversationMessage::parse_line(br#"{"type":"us"#).is_err());
        assert!(ConversationMessage::parse_line(b"").is_err());
    }

    #[test]
    fn test_message_serializes_as_raw_record() {
        let record = json!({"type": "assistant", "uuid": "u1", "extra": [1, 2]});
        let msg = ConversationMessage::from_record(record.clone()).unwrap();
        assert_eq!(serde_json::to_value(&msg).unwrap(), record);
        assert_eq!(msg.into_record(), record);
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let session = Session {
            id: "s1".to_string(),
            display: "fix the build".to_string(),
            timestamp: 1_738_567_268_363,
            project: "/home/user/app".to_string(),
            project_name: "app".to_string(),
        };
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["projectName"], "app");
        assert_eq!(value["timestamp"], 1_738_567_268_363_i64);
    }

    #[test]
    fn test_change_event_serialization() {
        let event = ChangeEvent::SessionChanged {
            session_id: "s1".to_string(),
            path: PathBuf::from("/r/projects/-p/s1.jsonl"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "sessionChanged");
        assert_eq!(value["sessionId"], "s1");

        let value = serde_json::to_value(ChangeEvent::HistoryChanged).unwrap();
        assert_eq!(value, json!({"type": "historyChanged"}));

        let value = serde_json::to_value(ChangeEvent::ProjectChanged {
            project_id: "-p".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "projectChanged", "projectId": "-p"}));
    }

    #[test]
    fn test_stream_chunk_empty() {
        let chunk = StreamChunk::empty(17);
        assert!(chunk.messages.is_empty());
        assert_eq!(chunk.next_offset, 17);
    }
}
