// Envelope type and classification for chat and control traffic

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved payload token for a handshake request.
pub const PING: &str = "ping";
/// Reserved payload token for a handshake reply.
pub const PONG: &str = "pong";

/// Closed set of envelope subjects. The wire representation is the
/// plain string form, so any peer speaking the protocol can classify
/// an envelope without knowing this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Subject {
    Handshake,
    ClosingRoom,
    Admin,
    Untitled,
    Named(String),
}

impl Subject {
    pub fn as_str(&self) -> &str {
        match self {
            Subject::Handshake => "handshake",
            Subject::ClosingRoom => "closing_room",
            Subject::Admin => "admin",
            Subject::Untitled => "untitled",
            Subject::Named(name) => name,
        }
    }
}

impl From<&str> for Subject {
    fn from(raw: &str) -> Self {
        match raw {
            "handshake" => Subject::Handshake,
            "closing_room" => Subject::ClosingRoom,
            "admin" => Subject::Admin,
            "untitled" => Subject::Untitled,
            other => Subject::Named(other.to_string()),
        }
    }
}

impl From<String> for Subject {
    fn from(raw: String) -> Self {
        Subject::from(raw.as_str())
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.as_str().to_string()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who an envelope is addressed to: everyone on the channel, or one
/// specific participant. Wire form is `"all"` or the peer id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    All,
    Peer(String),
}

impl From<String> for Recipient {
    fn from(raw: String) -> Self {
        if raw == "all" {
            Recipient::All
        } else {
            Recipient::Peer(raw)
        }
    }
}

impl From<Recipient> for String {
    fn from(recipient: Recipient) -> Self {
        match recipient {
            Recipient::All => "all".to_string(),
            Recipient::Peer(id) => id,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::All => f.write_str("all"),
            Recipient::Peer(id) => f.write_str(id),
        }
    }
}

/// One chat or control envelope. Values are copied across the channel
/// boundary and never mutated after receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub subject: Subject,
    pub payload: Value,
    pub room: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<Recipient>,
    pub timestamp: SystemTime,
}

impl Envelope {
    pub fn new(
        subject: Subject,
        payload: Value,
        room: Option<String>,
        sender: Option<String>,
        recipient: Option<Recipient>,
    ) -> Self {
        Self {
            subject,
            payload,
            room,
            sender,
            recipient,
            timestamp: SystemTime::now(),
        }
    }

    /// A plain chat envelope: untitled subject, no addressing.
    pub fn create(payload: impl Into<Value>, room: impl Into<String>) -> Self {
        Self::new(
            Subject::Untitled,
            payload.into(),
            Some(room.into()),
            None,
            None,
        )
    }

    /// Refresh the timestamp. Called exactly once, immediately before
    /// the envelope is handed to the transport.
    pub fn touch(&mut self) {
        self.timestamp = SystemTime::now();
    }

    /// Decode from a raw string: structured JSON first; anything that
    /// fails to decode becomes the payload of an untitled envelope.
    /// Empty input carries nothing and decodes to `None`.
    pub fn parse(raw: &str) -> Option<Envelope> {
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Some(Self::from_value(value)),
            Err(_) => Some(Self::new(
                Subject::Untitled,
                Value::String(raw.to_string()),
                None,
                None,
                None,
            )),
        }
    }

    /// Rebuild from an already-decoded wire value. Thorough records
    /// come back field for field, partially valid ones get defaults for
    /// the gaps, and anything else is re-serialized whole as the
    /// payload of an untitled envelope. Total: no input shape panics.
    pub fn from_value(value: Value) -> Envelope {
        let Value::Object(ref fields) = value else {
            return Self::wrap(value);
        };
        let payload = fields.get("payload").cloned().unwrap_or(Value::Null);
        if !non_empty(&payload) {
            return Self::wrap(value);
        }

        let subject = fields
            .get("subject")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(Subject::from)
            .unwrap_or(Subject::Untitled);
        let room = fields
            .get("room")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let sender = fields
            .get("sender")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let recipient = fields
            .get("recipient")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|raw| Recipient::from(raw.to_string()));
        let timestamp = fields
            .get("timestamp")
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
            .unwrap_or_else(SystemTime::now);

        Envelope {
            subject,
            payload,
            room,
            sender,
            recipient,
            timestamp,
        }
    }

    fn wrap(value: Value) -> Envelope {
        let text = serde_json::to_string(&value).unwrap_or_default();
        Self::new(Subject::Untitled, Value::String(text), None, None, None)
    }

    /// An envelope carries something: its payload is non-empty.
    pub fn is_valid(&self) -> bool {
        non_empty(&self.payload)
    }

    /// Valid, and all of subject, room, sender, recipient are present.
    /// Only thorough envelopes participate in the handshake protocol.
    pub fn is_thorough(&self) -> bool {
        self.is_valid()
            && !self.subject.as_str().is_empty()
            && self.room.as_deref().is_some_and(|r| !r.is_empty())
            && self.sender.as_deref().is_some_and(|s| !s.is_empty())
            && self.has_recipient()
    }

    pub fn is_public(&self) -> bool {
        matches!(self.recipient, Some(Recipient::All))
    }

    pub fn is_ping(&self) -> bool {
        self.subject == Subject::Handshake && self.payload.as_str() == Some(PING)
    }

    pub fn is_pong(&self) -> bool {
        self.subject == Subject::Handshake && self.payload.as_str() == Some(PONG)
    }

    fn has_recipient(&self) -> bool {
        match &self.recipient {
            Some(Recipient::All) => true,
            Some(Recipient::Peer(id)) => !id.is_empty(),
            None => false,
        }
    }
}

/// Empty-payload rule shared by validity checks and outbound wrapping:
/// null, `false`, zero, and the empty string carry nothing.
pub(crate) fn non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
