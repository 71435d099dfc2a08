// CLI for the in-process demo

use clap::Parser;

/// Demo: several hub contexts in one process discover each other over
/// a shared channel space, exchange chat in a room, and tear it down.
#[derive(Debug, Parser)]
#[command(name = "hubbub")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Number of hub contexts to spin up
    #[arg(short, long, default_value = "3")]
    pub contexts: usize,

    /// Keep re-pinging known peers with randomized backoff instead of
    /// running a single discovery round
    #[arg(long)]
    pub continuous: bool,

    /// Chat room the contexts open and talk in
    #[arg(short, long, default_value = "lobby")]
    pub room: String,

    /// Message the first context sends into the room
    #[arg(short, long, default_value = "hello from the first context")]
    pub message: String,

    /// How long to wait for discovery and delivery, in milliseconds
    #[arg(long, default_value = "500")]
    pub settle_ms: u64,
}
