// Broadcast room: one channel subscription plus a single inbound handler

use std::sync::{Arc, OnceLock, Weak};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::channel::{ChannelHandle, ChannelSpace};
use crate::message::{self, Envelope};

/// Inbound delivery callback. Frames arrive verbatim as wire values;
/// parsing them is the handler's business.
pub type RoomHandler = Box<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room name must not be empty")]
    InvalidName,
}

/// Anything a room can transmit: a prepared envelope, or raw content
/// that gets wrapped on the way out.
pub enum Outbound {
    Envelope(Envelope),
    Raw(Value),
}

impl From<Envelope> for Outbound {
    fn from(envelope: Envelope) -> Self {
        Outbound::Envelope(envelope)
    }
}

impl From<Value> for Outbound {
    fn from(value: Value) -> Self {
        Outbound::Raw(value)
    }
}

impl From<&str> for Outbound {
    fn from(text: &str) -> Self {
        Outbound::Raw(Value::String(text.to_string()))
    }
}

impl From<String> for Outbound {
    fn from(text: String) -> Self {
        Outbound::Raw(Value::String(text))
    }
}

/// A named broadcast room. Owns at most one channel subscription and
/// forwards every inbound frame to its handler. A closed room cannot
/// send or receive; reopening means constructing a new room under the
/// same name.
pub struct Room {
    name: String,
    handle: Mutex<Option<ChannelHandle>>,
    handler: OnceLock<RoomHandler>,
}

impl Room {
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
    }

    /// Subscribe to the named channel and start listening. The handler
    /// may also be attached later via [`Room::attach_handler`].
    pub async fn open(
        space: &ChannelSpace,
        name: &str,
        handler: Option<RoomHandler>,
    ) -> Result<Arc<Room>, RoomError> {
        if !Self::is_valid_name(name) {
            return Err(RoomError::InvalidName);
        }

        let room = Arc::new(Room {
            name: name.to_string(),
            handle: Mutex::new(None),
            handler: OnceLock::new(),
        });
        if let Some(handler) = handler {
            room.attach_handler(handler);
        }

        let channel = space.subscribe(name).await;
        let inbound: Weak<Room> = Arc::downgrade(&room);
        channel
            .on_message(Box::new(move |value| {
                if let Some(room) = inbound.upgrade() {
                    room.deliver(value);
                }
            }))
            .await;
        *room.handle.lock().await = Some(channel);

        Ok(room)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Attach the inbound handler. First writer wins: succeeds only if
    /// no handler is attached yet, and never replaces one.
    pub fn attach_handler(&self, handler: RoomHandler) -> bool {
        self.handler.set(handler).is_ok()
    }

    /// Release the channel subscription. A second close reports false.
    pub async fn close(&self) -> bool {
        let mut handle = self.handle.lock().await;
        match handle.take() {
            Some(channel) => {
                channel.close();
                true
            }
            None => false,
        }
    }

    /// Fan data out to every other subscriber of this room's channel.
    /// Envelopes are re-stamped on the way out; raw values are wrapped
    /// as untitled chat for this room. False when the room is closed or
    /// the raw data carries nothing, with no transport call made.
    pub async fn send(&self, data: impl Into<Outbound>) -> bool {
        let handle = self.handle.lock().await;
        let Some(channel) = handle.as_ref() else {
            return false;
        };

        let envelope = match data.into() {
            Outbound::Envelope(mut envelope) => {
                envelope.touch();
                envelope
            }
            Outbound::Raw(value) => {
                if !message::non_empty(&value) {
                    return false;
                }
                Envelope::create(value, self.name.clone())
            }
        };

        match serde_json::to_value(&envelope) {
            Ok(wire) => channel.send(wire),
            Err(error) => {
                tracing::warn!("failed to encode envelope for room {}: {}", self.name, error);
                false
            }
        }
    }

    fn deliver(&self, value: Value) {
        if let Some(handler) = self.handler.get() {
            handler(value);
        }
    }
}
