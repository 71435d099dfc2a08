//! hubbub demo - several hub contexts in one process
//!
//! Spins up N hubs sharing one channel space, lets the handshake
//! discover everyone, opens a chat room, sends one message from the
//! first context, and finally closes the room with notification so the
//! teardown propagates to every peer.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, warn};

use hubbub::cli::Cli;
use hubbub::{ChannelSpace, Envelope, Hub};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.contexts == 0 {
        bail!("need at least one context");
    }

    let space = ChannelSpace::new();
    let mut hubs = Vec::with_capacity(cli.contexts);
    for index in 0..cli.contexts {
        let hub = Hub::new(space.clone());
        hub.init(cli.continuous).await;
        if let Some(id) = hub.id().await {
            info!("context {} joined as {}", index, id);
        }
        hubs.push(hub);
    }

    tokio::time::sleep(Duration::from_millis(cli.settle_ms)).await;
    for (index, hub) in hubs.iter().enumerate() {
        info!(
            "context {} knows {} peer(s)",
            index,
            hub.participants().await.len()
        );
    }

    for (index, hub) in hubs.iter().enumerate() {
        if !hub.add_room(&cli.room).await {
            warn!("context {} could not open room {}", index, cli.room);
            continue;
        }
        if index > 0 {
            hub.adjust_room(
                &cli.room,
                Box::new(move |value| {
                    let envelope = Envelope::from_value(value);
                    info!(
                        "context {} heard {}: {}",
                        index, envelope.subject, envelope.payload
                    );
                }),
            )
            .await;
        }
    }

    let first = &hubs[0];
    if !first
        .echo(Envelope::create(cli.message.clone(), cli.room.clone()))
        .await
    {
        warn!("message did not go out");
    }
    tokio::time::sleep(Duration::from_millis(cli.settle_ms)).await;

    info!("closing room {}", cli.room);
    first.close_room(&cli.room, true).await;

    // Past the grace delay every context should have torn the room down.
    tokio::time::sleep(Duration::from_millis(4200)).await;
    for (index, hub) in hubs.iter().enumerate() {
        let open = hub.get_room(&cli.room).await.is_some();
        info!("context {} room open: {}", index, open);
    }

    Ok(())
}
