// Named broadcast channels shared by every execution context in a process

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Callback invoked with every frame delivered to a subscriber.
pub type MessageCallback = Box<dyn Fn(Value) + Send + Sync>;

/// Buffered frames per channel before slow receivers start lagging.
const CHANNEL_CAPACITY: usize = 128;

/// One frame on the wire: the payload plus the identity of the handle
/// that sent it, so receive pumps can drop a sender's own frames.
#[derive(Debug, Clone)]
struct Frame {
    origin: Uuid,
    data: Value,
}

/// Registry of named fan-out channels. Every subscriber to the same
/// name hears every other subscriber's frames, never its own. One
/// space is shared by all contexts that should hear each other;
/// cloning is cheap.
#[derive(Clone, Default)]
pub struct ChannelSpace {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Frame>>>>,
}

impl ChannelSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the named channel, creating it on first use.
    pub async fn subscribe(&self, name: &str) -> ChannelHandle {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        drop(channels);

        let handle = ChannelHandle {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tx: tx.clone(),
            callback: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
        };
        handle.spawn_pump(tx.subscribe());
        handle
    }
}

/// A single subscription to a named channel.
pub struct ChannelHandle {
    id: Uuid,
    name: String,
    tx: broadcast::Sender<Frame>,
    callback: Arc<RwLock<Option<MessageCallback>>>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Fan a value out to every other subscriber of this channel.
    /// Best effort: false when nobody is left listening.
    pub fn send(&self, data: Value) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let frame = Frame {
            origin: self.id,
            data,
        };
        self.tx.send(frame).is_ok()
    }

    /// Install the delivery callback for inbound frames.
    pub async fn on_message(&self, callback: MessageCallback) {
        let mut slot = self.callback.write().await;
        *slot = Some(callback);
    }

    /// Stop listening and release the subscription. Idempotent: a
    /// second close reports false.
    pub fn close(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    fn spawn_pump(&self, mut rx: broadcast::Receiver<Frame>) {
        let own_id = self.id;
        let name = self.name.clone();
        let callback = self.callback.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Ok(frame) => {
                            if frame.origin == own_id {
                                continue;
                            }
                            let callback = callback.read().await;
                            if let Some(deliver) = callback.as_ref() {
                                deliver(frame.data);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                "channel {} receiver lagged, {} frames skipped",
                                name,
                                skipped
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
