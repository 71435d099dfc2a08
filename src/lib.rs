//! hubbub - Peer presence and room coordination over broadcast channels
//!
//! This library coordinates independent execution contexts that cannot
//! share memory but can all subscribe to named broadcast channels. Each
//! context owns one [`Hub`], which multiplexes access to named rooms,
//! discovers peer hubs through a ping/pong handshake on a reserved
//! control channel, and coordinates room teardown across contexts.

pub mod channel;
pub mod cli;
pub mod hub;
pub mod message;
pub mod room;

pub use channel::{ChannelHandle, ChannelSpace};
pub use hub::Hub;
pub use message::{Envelope, Recipient, Subject};
pub use room::{Room, RoomError, RoomHandler};
