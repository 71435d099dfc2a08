// Presence hub: room registry plus the peer-discovery handshake

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::channel::ChannelSpace;
use crate::message::{Envelope, Recipient, Subject, PING, PONG};
use crate::room::{Outbound, Room, RoomHandler};

/// Reserved control channel. The suffix keeps application room names
/// out of its namespace, and [`Hub::add_room`] rejects it outright.
const INTERNAL_ROOM: &str = "hub-internal";

/// Grace period between a close notice and the actual teardown, so the
/// notice can propagate before the channel is released.
const CLOSE_GRACE: Duration = Duration::from_millis(3693);

/// Jitter window for handshake replies. Peers answering the same
/// broadcast draw a uniform delay from this range so their replies do
/// not land at once.
const REPLY_JITTER_MS: Range<u64> = 369..3963;

/// Lifecycle of a hub. `init` moves it to `Ready` exactly once; it
/// never goes back.
enum Lifecycle {
    Uninitialized,
    Ready(Session),
}

/// Everything that exists only after `init`: this context's identity,
/// the handshake mode, and the control room.
struct Session {
    id: Uuid,
    continuous: bool,
    control: Arc<Room>,
}

/// Per-context presence and room-management hub.
///
/// One hub per execution context: it multiplexes named broadcast rooms,
/// discovers peer hubs on the same [`ChannelSpace`] through a ping/pong
/// handshake, and coordinates room teardown across contexts. Cloning is
/// cheap; clones share state.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    space: ChannelSpace,
    // Handed to spawned tasks and handlers so pending work never keeps
    // a dropped hub alive.
    weak: Weak<HubInner>,
    state: RwLock<Lifecycle>,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    participants: RwLock<HashSet<String>>,
}

impl Hub {
    /// A hub starts uninitialized; every operation is a graceful no-op
    /// until [`Hub::init`] runs.
    pub fn new(space: ChannelSpace) -> Self {
        Self {
            inner: Arc::new_cyclic(|weak| HubInner {
                space,
                weak: weak.clone(),
                state: RwLock::new(Lifecycle::Uninitialized),
                rooms: RwLock::new(HashMap::new()),
                participants: RwLock::new(HashSet::new()),
            }),
        }
    }

    /// Join the mesh: generate this context's identity, open the
    /// control room, and announce ourselves with a public ping. Runs
    /// its side effects at most once; a second call reports false.
    ///
    /// With `continuous_handshake` on, known peers are re-pinged
    /// indefinitely with randomized backoff; off means a single
    /// discovery round.
    pub async fn init(&self, continuous_handshake: bool) -> bool {
        self.inner.init(continuous_handshake).await
    }

    /// This context's participant identity, once initialized.
    pub async fn id(&self) -> Option<Uuid> {
        self.inner.session().await.map(|(id, _)| id)
    }

    /// Peers discovered through the handshake so far.
    pub async fn participants(&self) -> Vec<String> {
        self.inner.participants.read().await.iter().cloned().collect()
    }

    /// Create and register a new room. False on an invalid or reserved
    /// name, or when the room already exists.
    pub async fn add_room(&self, name: &str) -> bool {
        self.inner.add_room(name).await
    }

    /// Look up a registered room.
    pub async fn get_room(&self, name: &str) -> Option<Arc<Room>> {
        self.inner.get_room(name).await
    }

    /// Attach `handler` to the named room. One shot: false if the room
    /// is unknown or already has a handler.
    pub async fn adjust_room(&self, name: &str, handler: RoomHandler) -> bool {
        match self.inner.get_room(name).await {
            Some(room) => {
                tracing::debug!("adjusting room {}", name);
                room.attach_handler(handler)
            }
            None => false,
        }
    }

    /// Send a prepared envelope into the room it names.
    pub async fn echo(&self, envelope: Envelope) -> bool {
        let Some(name) = envelope.room.clone() else {
            return false;
        };
        let Some(room) = self.inner.get_room(&name).await else {
            return false;
        };
        tracing::debug!("echoing in room {}", name);
        room.send(envelope).await
    }

    /// Send into a room resolved by name directly.
    pub async fn echo_in_room(&self, name: &str, data: impl Into<Outbound>) -> bool {
        let Some(room) = self.inner.get_room(name).await else {
            return false;
        };
        tracing::debug!("echoing in room {}", name);
        room.send(data).await
    }

    /// Close a room. With `notify`, peers first get a closing notice on
    /// the control channel and remaining room subscribers an admin
    /// message; the actual teardown runs after a fixed grace delay, and
    /// the room stays resolvable until it fires.
    pub async fn close_room(&self, name: &str, notify: bool) -> bool {
        self.inner.close_room(name, notify).await
    }
}

impl HubInner {
    async fn init(&self, continuous_handshake: bool) -> bool {
        let mut state = self.state.write().await;
        if matches!(*state, Lifecycle::Ready(_)) {
            return false;
        }

        let id = Uuid::new_v4();
        let weak = self.weak.clone();
        let handler: RoomHandler = Box::new(move |value| {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(async move {
                    inner.on_control(value).await;
                });
            }
        });
        let control = match Room::open(&self.space, INTERNAL_ROOM, Some(handler)).await {
            Ok(room) => room,
            Err(error) => {
                tracing::warn!("control room failed to open: {}", error);
                return false;
            }
        };

        *state = Lifecycle::Ready(Session {
            id,
            continuous: continuous_handshake,
            control,
        });
        drop(state);

        tracing::info!("hub {} initialized, arranging handshakes", id);
        self.send_control(Subject::Handshake, Value::from(PING), Recipient::All)
            .await;
        true
    }

    async fn session(&self) -> Option<(Uuid, bool)> {
        match &*self.state.read().await {
            Lifecycle::Ready(session) => Some((session.id, session.continuous)),
            Lifecycle::Uninitialized => None,
        }
    }

    async fn add_room(&self, name: &str) -> bool {
        if self.session().await.is_none() {
            return false;
        }
        if !Room::is_valid_name(name) || name == INTERNAL_ROOM {
            return false;
        }

        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(name) {
            tracing::debug!("room {} already exists", name);
            return false;
        }
        match Room::open(&self.space, name, None).await {
            Ok(room) => {
                rooms.insert(name.to_string(), room);
                tracing::info!("room {} has been added", name);
                true
            }
            Err(error) => {
                tracing::warn!("failed to open room {}: {}", name, error);
                false
            }
        }
    }

    async fn get_room(&self, name: &str) -> Option<Arc<Room>> {
        if self.session().await.is_none() || !Room::is_valid_name(name) {
            return None;
        }
        self.rooms.read().await.get(name).cloned()
    }

    async fn close_room(&self, name: &str, notify: bool) -> bool {
        let Some(room) = self.get_room(name).await else {
            return false;
        };

        if notify {
            self.send_control(
                Subject::ClosingRoom,
                Value::String(name.to_string()),
                Recipient::All,
            )
            .await;
            room.send(Envelope::new(
                Subject::Admin,
                Value::String("closing room".to_string()),
                None,
                None,
                None,
            ))
            .await;
        }

        let inner = self.weak.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(CLOSE_GRACE).await;
            room.close().await;
            if let Some(inner) = inner.upgrade() {
                inner.rooms.write().await.remove(&name);
            }
            tracing::info!("room {} has been closed", name);
        });
        true
    }

    /// Compose and send one control envelope on the internal room.
    async fn send_control(&self, subject: Subject, payload: Value, recipient: Recipient) {
        let (id, control) = match &*self.state.read().await {
            Lifecycle::Ready(session) => (session.id, session.control.clone()),
            Lifecycle::Uninitialized => return,
        };
        tracing::debug!("sending {}.{} to {}", subject, payload, recipient);
        control
            .send(Envelope::new(
                subject,
                payload,
                Some(INTERNAL_ROOM.to_string()),
                Some(id.to_string()),
                Some(recipient),
            ))
            .await;
    }

    /// Schedule a control envelope after a delay. Fire and forget:
    /// once scheduled it cannot be cancelled, but it holds only a weak
    /// reference, so a dropped hub makes it inert.
    fn send_control_later(
        &self,
        delay: Duration,
        subject: Subject,
        payload: Value,
        recipient: Recipient,
    ) {
        let inner = self.weak.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.send_control(subject, payload, recipient).await;
            }
        });
    }

    /// Handshake reception. Every inbound control frame lands here;
    /// anything that is not a thorough envelope is inert noise.
    async fn on_control(&self, value: Value) {
        let message = Envelope::from_value(value);
        if !message.is_thorough() {
            tracing::debug!("discarding non-thorough control traffic");
            return;
        }
        let Some((own_id, continuous)) = self.session().await else {
            return;
        };
        // Thoroughness guarantees a sender past this point.
        let Some(sender) = message.sender.clone() else {
            return;
        };

        if message.is_public() {
            if message.is_ping() {
                tracing::debug!("received {}.{} from {}", message.subject, PING, sender);
                self.remember(&sender).await;
                self.send_control(Subject::Handshake, Value::from(PONG), Recipient::Peer(sender))
                    .await;
            } else if message.subject == Subject::ClosingRoom && self.knows(&sender).await {
                if let Some(room) = message.payload.as_str() {
                    self.close_room(room, false).await;
                }
            }
            return;
        }

        if message.recipient != Some(Recipient::Peer(own_id.to_string())) {
            return;
        }

        if message.is_ping() {
            if continuous {
                tracing::debug!("received {}.{} from {}", message.subject, PING, sender);
                self.send_control_later(
                    reply_jitter(),
                    Subject::Handshake,
                    Value::from(PONG),
                    Recipient::Peer(sender),
                );
            }
            return;
        }

        if message.is_pong() {
            if self.remember(&sender).await {
                tracing::debug!("discovered participant {}", sender);
                if continuous {
                    self.send_control(
                        Subject::Handshake,
                        Value::from(PING),
                        Recipient::Peer(sender),
                    )
                    .await;
                }
            } else if continuous {
                self.send_control_later(
                    reply_jitter(),
                    Subject::Handshake,
                    Value::from(PING),
                    Recipient::Peer(sender),
                );
            }
        }
    }

    /// Record a participant. True when it was newly discovered.
    async fn remember(&self, sender: &str) -> bool {
        self.participants.write().await.insert(sender.to_string())
    }

    async fn knows(&self, sender: &str) -> bool {
        self.participants.read().await.contains(sender)
    }
}

fn reply_jitter() -> Duration {
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(REPLY_JITTER_MS))
}
