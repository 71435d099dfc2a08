// Integration tests for the presence hub and handshake protocol

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hubbub::channel::MessageCallback;
use hubbub::message::{Envelope, Recipient, Subject};
use hubbub::room::RoomHandler;
use hubbub::{ChannelSpace, Hub};
use serde_json::Value;

/// Collects every frame delivered to a passive channel subscriber.
fn frame_collector() -> (MessageCallback, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: MessageCallback = Box::new(move |value| {
        sink.lock().unwrap().push(value);
    });
    (callback, seen)
}

fn room_collector() -> (RoomHandler, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: RoomHandler = Box::new(move |value| {
        sink.lock().unwrap().push(value);
    });
    (handler, seen)
}

/// Let spawned protocol tasks drain. Runs under paused time, so this
/// advances the virtual clock only once everything is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn pongs_to(frames: &[Value], recipient: &str) -> usize {
    frames
        .iter()
        .map(|frame| Envelope::from_value(frame.clone()))
        .filter(|envelope| {
            envelope.is_pong()
                && envelope.recipient == Some(Recipient::Peer(recipient.to_string()))
        })
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_handshake_converges() {
    let space = ChannelSpace::new();
    let observer = space.subscribe("hub-internal").await;
    let (callback, frames) = frame_collector();
    observer.on_message(callback).await;

    // B joins first and pings into the void; A's ping then triggers
    // exactly one discovery round.
    let b = Hub::new(space.clone());
    assert!(b.init(false).await);
    settle().await;

    let a = Hub::new(space.clone());
    assert!(a.init(false).await);
    settle().await;

    let a_id = a.id().await.unwrap().to_string();
    let b_id = b.id().await.unwrap().to_string();

    assert_eq!(a.participants().await, vec![b_id.clone()]);
    assert_eq!(b.participants().await, vec![a_id.clone()]);

    let baseline = {
        let frames = frames.lock().unwrap();
        assert_eq!(pongs_to(&frames, &a_id), 1);
        assert_eq!(pongs_to(&frames, &b_id), 0);
        frames.len()
    };

    // Single-shot mode: nothing further happens, ever.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(frames.lock().unwrap().len(), baseline);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_handshake_keeps_pinging() {
    let space = ChannelSpace::new();
    let observer = space.subscribe("hub-internal").await;
    let (callback, frames) = frame_collector();
    observer.on_message(callback).await;

    let a = Hub::new(space.clone());
    assert!(a.init(true).await);
    settle().await;
    let b = Hub::new(space.clone());
    assert!(b.init(true).await);
    settle().await;

    assert_eq!(a.participants().await.len(), 1);
    assert_eq!(b.participants().await.len(), 1);

    // The jittered liveness loop keeps producing traffic.
    let baseline = frames.lock().unwrap().len();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(frames.lock().unwrap().len() > baseline);
}

#[tokio::test(start_paused = true)]
async fn test_close_notice_propagates_without_storm() {
    let space = ChannelSpace::new();
    let observer = space.subscribe("hub-internal").await;
    let (callback, frames) = frame_collector();
    observer.on_message(callback).await;

    let a = Hub::new(space.clone());
    a.init(false).await;
    settle().await;
    let b = Hub::new(space.clone());
    b.init(false).await;
    settle().await;

    assert!(a.add_room("lobby").await);
    assert!(b.add_room("lobby").await);
    let (handler, b_inbox) = room_collector();
    assert!(b.adjust_room("lobby", handler).await);

    assert!(a.close_room("lobby", true).await);
    settle().await;

    // B saw the admin notice in the room and scheduled its own
    // teardown; both registries still resolve during the grace delay.
    {
        let inbox = b_inbox.lock().unwrap();
        let admin = Envelope::from_value(inbox[0].clone());
        assert_eq!(admin.subject, Subject::Admin);
        assert_eq!(admin.payload, Value::String("closing room".into()));
    }
    assert!(a.get_room("lobby").await.is_some());
    assert!(b.get_room("lobby").await.is_some());

    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert!(a.get_room("lobby").await.is_none());
    assert!(b.get_room("lobby").await.is_none());

    // The network-notified path closed quietly: one notice total.
    let closings = frames
        .lock()
        .unwrap()
        .iter()
        .map(|frame| Envelope::from_value(frame.clone()))
        .filter(|envelope| envelope.subject == Subject::ClosingRoom)
        .count();
    assert_eq!(closings, 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_room_grace_delay() {
    let space = ChannelSpace::new();
    let hub = Hub::new(space);
    hub.init(false).await;

    assert!(!hub.close_room("missing", true).await);

    assert!(hub.add_room("brief").await);
    assert!(hub.close_room("brief", true).await);

    // Still resolvable for the whole grace window.
    tokio::time::sleep(Duration::from_millis(3600)).await;
    assert!(hub.get_room("brief").await.is_some());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(hub.get_room("brief").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sending_on_closed_room_makes_no_transport_call() {
    let space = ChannelSpace::new();
    let hub = Hub::new(space.clone());
    hub.init(false).await;
    hub.add_room("quiet").await;

    let room = hub.get_room("quiet").await.unwrap();
    hub.close_room("quiet", false).await;
    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert!(hub.get_room("quiet").await.is_none());

    let observer = space.subscribe("quiet").await;
    let (callback, frames) = frame_collector();
    observer.on_message(callback).await;

    assert!(!room.send("too late").await);
    settle().await;
    assert!(frames.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_chat_crosses_contexts() {
    let space = ChannelSpace::new();
    let a = Hub::new(space.clone());
    a.init(false).await;
    let b = Hub::new(space.clone());
    b.init(false).await;
    settle().await;

    assert!(a.add_room("lobby").await);
    assert!(b.add_room("lobby").await);
    let (handler, b_inbox) = room_collector();
    assert!(b.adjust_room("lobby", handler).await);

    assert!(a.echo(Envelope::create("hi there", "lobby")).await);
    assert!(a.echo_in_room("lobby", "and again").await);
    settle().await;

    let inbox = b_inbox.lock().unwrap();
    assert_eq!(inbox.len(), 2);
    let first = Envelope::from_value(inbox[0].clone());
    assert_eq!(first.payload, Value::String("hi there".into()));
    assert_eq!(first.room.as_deref(), Some("lobby"));
    let second = Envelope::from_value(inbox[1].clone());
    assert_eq!(second.payload, Value::String("and again".into()));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_control_traffic_is_inert() {
    let space = ChannelSpace::new();
    let hub = Hub::new(space.clone());
    hub.init(false).await;
    settle().await;

    // A buggy peer floods the control channel with junk: no panics, no
    // participants, no replies.
    let rogue = space.subscribe("hub-internal").await;
    let observer = space.subscribe("hub-internal").await;
    let (callback, frames) = frame_collector();
    observer.on_message(callback).await;

    rogue.send(Value::Null);
    rogue.send(Value::String("not an envelope".into()));
    rogue.send(serde_json::json!({ "payload": "" }));
    rogue.send(serde_json::json!({ "payload": "x", "sender": "ghost" }));
    rogue.send(serde_json::json!([1, 2, 3]));
    settle().await;

    assert!(hub.participants().await.is_empty());
    // Only the rogue's own frames crossed the channel; the hub never
    // replied to any of them.
    assert_eq!(frames.lock().unwrap().len(), 5);
}
