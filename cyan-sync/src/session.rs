//! One client session: a store per subsystem over a shared engine link.

use std::time::Instant;

use cyan_core::protocol::Subsystem;

use crate::bridge::BridgeState;
use crate::channel::EngineLink;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::store::{BoardGridStore, ChatStore, DirectMessageStore, Store, TreeStore};

pub struct Session {
    config: SyncConfig,
    local_node_id: String,
    tree: TreeStore,
    chat: ChatStore,
    grid: BoardGridStore,
    direct: DirectMessageStore,
}

impl Session {
    /// Claim the `file_tree`, `chat_panel`, `board_grid` and `network`
    /// subsystems on `link` and build their stores. Nothing is polled until
    /// [`start`](Self::start).
    pub fn connect(
        link: &EngineLink,
        config: SyncConfig,
        local_node_id: impl Into<String>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let local_node_id = local_node_id.into();

        let tree = TreeStore::new(link.open_channel(Subsystem::FILE_TREE)?, &config);
        let chat = ChatStore::new(
            link.open_channel(Subsystem::CHAT_PANEL)?,
            &config,
            local_node_id.clone(),
        );
        let grid = BoardGridStore::new(link.open_channel(Subsystem::BOARD_GRID)?, &config);
        let direct = DirectMessageStore::new(
            link.open_channel(Subsystem::NETWORK)?,
            &config,
            local_node_id.clone(),
        );

        Ok(Self {
            config,
            local_node_id,
            tree,
            chat,
            grid,
            direct,
        })
    }

    /// Start every bridge, wait out the startup grace period, then ask the
    /// engine for the tree. Returns whether the snapshot request was accepted.
    pub async fn start(&mut self) -> bool {
        self.tree.start();
        self.chat.start();
        self.grid.start();
        self.direct.start();
        log::info!("session {} started", self.local_node_id);

        tokio::time::sleep(self.config.startup_grace).await;

        if self.config.seed_demo && !self.tree.seed_demo_if_empty() {
            log::warn!("engine rejected SeedDemoIfEmpty");
        }
        let requested = self.tree.request_snapshot();
        if !requested {
            log::warn!("engine rejected the initial snapshot request");
        }
        requested
    }

    pub fn stop(&mut self) {
        self.tree.stop();
        self.chat.stop();
        self.grid.stop();
        self.direct.stop();
    }

    /// Dispose every store. Channels are released when the session drops.
    pub fn shutdown(&mut self) {
        self.tree.dispose();
        self.chat.dispose();
        self.grid.dispose();
        self.direct.dispose();
        log::info!("session {} shut down", self.local_node_id);
    }

    pub fn is_running(&self) -> bool {
        self.tree.state() == BridgeState::Running
    }

    /// Apply everything the bridges have delivered so far.
    pub fn pump(&mut self) -> usize {
        self.tree.pump() + self.chat.pump() + self.grid.pump() + self.direct.pump()
    }

    /// Drain every bridge on this thread and apply the results.
    pub fn sync_now(&mut self) -> usize {
        self.tree.sync_now() + self.chat.sync_now() + self.grid.sync_now() + self.direct.sync_now()
    }

    /// Expire stale ledger entries in every store as of `now`. [`pump`](Self::pump)
    /// already does this with the current time.
    pub fn expire_pending(&mut self, now: Instant) -> usize {
        self.tree.expire_pending(now)
            + self.chat.expire_pending(now)
            + self.grid.expire_pending(now)
            + self.direct.expire_pending(now)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    pub fn tree(&self) -> &TreeStore {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut TreeStore {
        &mut self.tree
    }

    pub fn chat(&self) -> &ChatStore {
        &self.chat
    }

    pub fn chat_mut(&mut self) -> &mut ChatStore {
        &mut self.chat
    }

    pub fn grid(&self) -> &BoardGridStore {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut BoardGridStore {
        &mut self.grid
    }

    pub fn direct(&self) -> &DirectMessageStore {
        &self.direct
    }

    pub fn direct_mut(&mut self) -> &mut DirectMessageStore {
        &mut self.direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use cyan_core::protocol::TreeCommand;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_millis(5),
            startup_grace: Duration::from_millis(1),
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_connect_claims_all_subsystems() {
        let engine = Arc::new(MemoryEngine::new());
        let link = EngineLink::new(engine);
        let session = Session::connect(&link, SyncConfig::default(), "node-a").unwrap();

        for subsystem in [
            Subsystem::FILE_TREE,
            Subsystem::CHAT_PANEL,
            Subsystem::BOARD_GRID,
            Subsystem::NETWORK,
        ] {
            assert!(link.is_claimed(subsystem));
        }
        assert!(matches!(
            Session::connect(&link, SyncConfig::default(), "node-b"),
            Err(SyncError::SubsystemClaimed(_))
        ));

        drop(session);
        assert!(!link.is_claimed(Subsystem::FILE_TREE));
    }

    #[test]
    fn test_connect_rejects_invalid_config() {
        let link = EngineLink::new(Arc::new(MemoryEngine::new()));
        let config = SyncConfig {
            poll_interval: Duration::ZERO,
            ..SyncConfig::default()
        };
        assert!(matches!(
            Session::connect(&link, config, "node-a"),
            Err(SyncError::InvalidConfig(_))
        ));
        assert!(!link.is_claimed(Subsystem::FILE_TREE));
    }

    #[tokio::test]
    async fn test_start_seeds_then_requests_snapshot() {
        let engine = Arc::new(MemoryEngine::new());
        let link = EngineLink::new(engine.clone());
        let mut session = Session::connect(&link, fast_config(), "node-a").unwrap();

        assert!(session.start().await);
        assert!(session.is_running());

        let sent: Vec<TreeCommand> = engine.sent_commands(Subsystem::FILE_TREE);
        assert_eq!(sent, vec![TreeCommand::SeedDemoIfEmpty, TreeCommand::Snapshot]);

        session.shutdown();
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_start_without_seed() {
        let engine = Arc::new(MemoryEngine::new());
        let link = EngineLink::new(engine.clone());
        let config = SyncConfig {
            seed_demo: false,
            ..fast_config()
        };
        let mut session = Session::connect(&link, config, "node-a").unwrap();
        session.start().await;

        let sent: Vec<TreeCommand> = engine.sent_commands(Subsystem::FILE_TREE);
        assert_eq!(sent, vec![TreeCommand::Snapshot]);
        session.shutdown();
    }

    #[test]
    fn test_sync_now_routes_events_to_stores() {
        let engine = Arc::new(MemoryEngine::new());
        let link = EngineLink::new(engine.clone());
        let mut session = Session::connect(&link, SyncConfig::default(), "node-a").unwrap();

        engine.push_event(Subsystem::FILE_TREE, r#"{"type":"GroupCreated","id":"g1","name":"Eng"}"#);
        engine.push_event(
            Subsystem::NETWORK,
            r#"{"type":"DirectMessage","id":"d1","peer_id":"bob","author":"bob","message":"hi","timestamp":5}"#,
        );
        engine.push_event(Subsystem::BOARD_GRID, "not json");

        assert_eq!(session.sync_now(), 2);
        assert!(session.tree().group("g1").is_some());
        assert_eq!(session.direct().total_unread(), 1);
    }
}
