//! Cyan Desktop: headless client driving the sync layer against a
//! simulated engine.
//!
//! Usage: `cyan-desktop [config.json]`. Without a config file the defaults
//! from `SyncConfig::default()` apply. Set `RUST_LOG=debug` to follow every
//! event through the bridges.

mod demo_engine;

use std::error::Error;
use std::sync::Arc;

use cyan_sync::{ChatScope, EngineLink, Session, SyncConfig};
use log::info;
use uuid::Uuid;

use demo_engine::DemoEngine;

fn load_config() -> Result<SyncConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            let config = SyncConfig::from_json(&json)?;
            info!("Loaded config from {path}");
            Ok(config)
        }
        None => Ok(SyncConfig::default()),
    }
}

fn log_tree(session: &Session) {
    let tree = session.tree();
    for group in tree.groups() {
        info!("▸ {} [{}] {:?}", group.name, group.id, group.sync);
        for ws in tree.workspaces_in(&group.id) {
            info!("  ▸ {} [{}] {:?}", ws.name, ws.id, ws.sync);
            for board in tree.boards_in(&ws.id) {
                info!("    • {} ({}) [{}] {:?}", board.name, board.board_type, board.id, board.sync);
            }
        }
    }
}

/// Let a few bridge ticks pass, then apply what they delivered.
async fn settle(session: &mut Session) -> usize {
    tokio::time::sleep(session.config().poll_interval * 3).await;
    session.pump()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    info!("Starting Cyan Desktop...");
    let config = load_config()?;
    let node_id = format!("node-{}", Uuid::new_v4());

    let engine = Arc::new(DemoEngine::new(node_id.clone()));
    let link = EngineLink::new(engine.clone());
    let mut session = Session::connect(&link, config, node_id)?;

    session.start().await;
    settle(&mut session).await;
    log_tree(&session);

    let Some(workspace_id) = session.tree().workspaces().first().map(|w| w.id.clone()) else {
        info!("Engine returned an empty tree; nothing to do");
        session.shutdown();
        return Ok(());
    };

    // Optimistic tree edit: visible immediately, confirmed on the next tick.
    let group_id = session.tree().groups()[0].id.clone();
    let outcome = session.tree_mut().create_workspace(&group_id, "Scratch")?;
    info!("Created workspace optimistically as {:?}", outcome.temp_id);

    session.chat_mut().set_scope(ChatScope::Workspace(workspace_id.clone()));
    session.chat_mut().send_message(&workspace_id, "hello from the desktop client", None)?;

    session.grid_mut().set_workspace(&workspace_id);
    settle(&mut session).await;

    if let Some(board_id) = session.grid().boards().first().map(|b| b.id.clone()) {
        session.grid_mut().set_rating(&board_id, 4)?;
        session.grid_mut().set_labels(&board_id, &["pinned".to_string()])?;
    }

    engine.receive_direct("peer-bob", "are you around?");
    session.direct_mut().send("peer-bob", "yes, syncing now")?;

    let applied = settle(&mut session).await;
    info!("Applied {applied} events");
    log_tree(&session);

    for message in session.chat().messages() {
        info!("chat {} {}: {} {:?}", message.id, message.author, message.body, message.sync);
    }
    for card in session.grid().boards() {
        info!("grid {} rating={} labels={:?} {:?}", card.name, card.rating, card.labels, card.sync);
    }
    for summary in session.direct().conversations() {
        info!(
            "dm {} unread={} last={:?}",
            summary.peer_id, summary.unread_count, summary.last_message
        );
    }

    info!(
        "still pending: tree={} chat={}",
        session.tree().pending_count(),
        session.chat().pending_count()
    );

    session.shutdown();
    Ok(())
}
