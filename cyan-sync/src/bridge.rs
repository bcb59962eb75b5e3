//! Polling bridge: turns one subsystem's poll-only queue into an event stream.
//!
//! ```text
//!   Bridge::send(cmd) ──encode──► Channel::send ──► engine
//!
//!   tokio interval (100ms)
//!        │ tick
//!        ▼
//!   drain loop: poll ─► decode ─► publish ─┐   until poll() is empty
//!        ▲                                  │
//!        └──────────────────────────────────┘
//!                                           ├──► Subscription #1
//!                                           └──► Subscription #2   (registration order)
//! ```
//!
//! One tick flushes everything queued, so N events accumulated between ticks
//! are delivered together and in FIFO order. A payload that fails to decode
//! is logged and skipped; it never ends the tick early. The timer task and a
//! caller's [`Bridge::drain`] serialize on one lock, so two passes never
//! interleave between poll and publish.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use cyan_core::protocol::{decode, encode, Protocol};
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::channel::Channel;
use crate::config::BridgeConfig;

/// Bridge lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Running,
}

/// Counters for monitoring a bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub ticks: u64,
    pub delivered: u64,
    pub dropped_payloads: u64,
    pub sends: u64,
    pub rejected_sends: u64,
}

/// Lock-free counters, read through [`Bridge::stats`].
#[derive(Default)]
struct AtomicBridgeStats {
    ticks: AtomicU64,
    delivered: AtomicU64,
    dropped_payloads: AtomicU64,
    sends: AtomicU64,
    rejected_sends: AtomicU64,
}

/// State shared between the bridge handle and its polling task.
struct Shared<P: Protocol> {
    channel: Channel,
    /// Held for a whole drain pass.
    draining: Mutex<()>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<P::Event>>>,
    stats: AtomicBridgeStats,
}

impl<P: Protocol> Shared<P> {
    fn subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<P::Event>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Poll until empty, publishing every decodable event.
    fn drain(&self) -> usize {
        let _pass = self
            .draining
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        let subsystem = self.channel.subsystem();
        let mut delivered = 0;

        while let Some(payload) = self.channel.poll() {
            match decode::<P::Event>(&payload) {
                Ok(event) => {
                    log::debug!("[{subsystem}] event {event:?}");
                    self.publish(event);
                    delivered += 1;
                }
                Err(e) => {
                    log::warn!("[{subsystem}] dropping payload: {e}");
                    self.stats.dropped_payloads.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.stats.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    fn publish(&self, event: P::Event) {
        // Receivers that were dropped fall out here.
        self.subscribers()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Command sender plus polling consumer for one subsystem.
pub struct Bridge<P: Protocol> {
    shared: Arc<Shared<P>>,
    config: BridgeConfig,
    task: Option<JoinHandle<()>>,
}

impl<P: Protocol> Bridge<P> {
    /// Wrap a channel. The bridge starts in [`BridgeState::Stopped`].
    pub fn new(channel: Channel, config: BridgeConfig) -> Self {
        debug_assert_eq!(channel.subsystem(), P::SUBSYSTEM);
        Self {
            shared: Arc::new(Shared {
                channel,
                draining: Mutex::new(()),
                subscribers: Mutex::new(Vec::new()),
                stats: AtomicBridgeStats::default(),
            }),
            config,
            task: None,
        }
    }

    /// Begin draining on the configured interval. No-op when already running.
    ///
    /// Must be called from within a tokio runtime; otherwise the bridge logs
    /// and stays stopped.
    pub fn start(&mut self) {
        if self.state() == BridgeState::Running {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("[{}] cannot start bridge: {e}", P::SUBSYSTEM);
                return;
            }
        };

        let shared = self.shared.clone();
        let period = self.config.poll_interval;
        self.task = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                shared.drain();
            }
        }));
        log::info!("[{}] bridge started ({period:?} interval)", P::SUBSYSTEM);
    }

    /// Cancel the polling task. Subscribers stay registered.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::info!("[{}] bridge stopped", P::SUBSYSTEM);
        }
    }

    /// Stop and drop every subscriber.
    pub fn dispose(&mut self) {
        self.stop();
        self.shared.subscribers().clear();
    }

    pub fn state(&self) -> BridgeState {
        match &self.task {
            Some(task) if !task.is_finished() => BridgeState::Running,
            _ => BridgeState::Stopped,
        }
    }

    /// Encode and hand a command to the engine. No retry on rejection.
    pub fn send(&self, command: &P::Command) -> bool {
        let accepted = self.shared.channel.send(&encode(command));
        self.shared.stats.sends.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.shared.stats.rejected_sends.fetch_add(1, Ordering::Relaxed);
            log::warn!("[{}] boundary rejected {command:?}", P::SUBSYSTEM);
        }
        accepted
    }

    /// Run one drain pass on the caller's thread. Returns events delivered.
    pub fn drain(&self) -> usize {
        self.shared.drain()
    }

    /// Register a new subscriber; it sees every event published from now on.
    pub fn subscribe(&self) -> Subscription<P::Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers().push(tx);
        Subscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.shared.subscribers();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    pub fn config(&self) -> BridgeConfig {
        self.config
    }

    pub fn stats(&self) -> BridgeStats {
        let stats = &self.shared.stats;
        BridgeStats {
            ticks: stats.ticks.load(Ordering::Relaxed),
            delivered: stats.delivered.load(Ordering::Relaxed),
            dropped_payloads: stats.dropped_payloads.load(Ordering::Relaxed),
            sends: stats.sends.load(Ordering::Relaxed),
            rejected_sends: stats.rejected_sends.load(Ordering::Relaxed),
        }
    }
}

impl<P: Protocol> Drop for Bridge<P> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Event stream handed out by [`Bridge::subscribe`].
#[derive(Debug)]
pub struct Subscription<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Next already-delivered event, without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event. `None` once the bridge is disposed or dropped.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }
}

impl<E> Stream for Subscription<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EngineLink;
    use crate::engine::MemoryEngine;
    use cyan_core::protocol::{FileTreeProtocol, Subsystem, TreeCommand, TreeEvent};
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    fn bridge_with_engine(interval_ms: u64) -> (Arc<MemoryEngine>, Bridge<FileTreeProtocol>) {
        let engine = Arc::new(MemoryEngine::new());
        let link = EngineLink::new(engine.clone());
        let channel = link.open_channel(Subsystem::FILE_TREE).unwrap();
        let config = BridgeConfig {
            poll_interval: Duration::from_millis(interval_ms),
        };
        (engine, Bridge::new(channel, config))
    }

    fn deleted(id: &str) -> String {
        format!(r#"{{"type":"GroupDeleted","id":"{id}"}}"#)
    }

    #[test]
    fn test_drain_delivers_all_in_order() {
        let (engine, bridge) = bridge_with_engine(100);
        let mut sub = bridge.subscribe();

        for i in 0..5 {
            engine.push_event(Subsystem::FILE_TREE, deleted(&format!("g{i}")));
        }
        assert_eq!(bridge.drain(), 5);
        assert_eq!(engine.queued(Subsystem::FILE_TREE), 0);

        for i in 0..5 {
            assert_eq!(
                sub.try_recv(),
                Some(TreeEvent::GroupDeleted { id: format!("g{i}") })
            );
        }
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_malformed_payload_does_not_stop_drain() {
        let (engine, bridge) = bridge_with_engine(100);
        let mut sub = bridge.subscribe();

        engine.push_event(Subsystem::FILE_TREE, deleted("a"));
        engine.push_event(Subsystem::FILE_TREE, "{{{ not json");
        engine.push_event(Subsystem::FILE_TREE, r#"{"no_type":true}"#);
        engine.push_event(Subsystem::FILE_TREE, deleted("b"));

        assert_eq!(bridge.drain(), 2);
        assert_eq!(sub.try_recv(), Some(TreeEvent::GroupDeleted { id: "a".into() }));
        assert_eq!(sub.try_recv(), Some(TreeEvent::GroupDeleted { id: "b".into() }));

        let stats = bridge.stats();
        assert_eq!(stats.dropped_payloads, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.ticks, 1);
    }

    #[test]
    fn test_fan_out_registration_order_and_pruning() {
        let (engine, bridge) = bridge_with_engine(100);
        let mut first = bridge.subscribe();
        let second = bridge.subscribe();
        let mut third = bridge.subscribe();
        drop(second);

        engine.push_event(Subsystem::FILE_TREE, deleted("x"));
        bridge.drain();

        assert!(first.try_recv().is_some());
        assert!(third.try_recv().is_some());
        assert_eq!(bridge.subscriber_count(), 2);
    }

    #[test]
    fn test_send_reports_rejection() {
        let engine = Arc::new(MemoryEngine::not_ready());
        let link = EngineLink::new(engine.clone());
        let bridge: Bridge<FileTreeProtocol> = Bridge::new(
            link.open_channel(Subsystem::FILE_TREE).unwrap(),
            BridgeConfig::default(),
        );

        assert!(!bridge.send(&TreeCommand::Snapshot));
        engine.set_ready(true);
        assert!(bridge.send(&TreeCommand::Snapshot));

        let stats = bridge.stats();
        assert_eq!(stats.sends, 2);
        assert_eq!(stats.rejected_sends, 1);
        assert_eq!(engine.sent(Subsystem::FILE_TREE), vec![r#"{"type":"Snapshot"}"#.to_string()]);
    }

    #[test]
    fn test_start_without_runtime_stays_stopped() {
        let (_engine, mut bridge) = bridge_with_engine(10);
        bridge.start();
        assert_eq!(bridge.state(), BridgeState::Stopped);
    }

    #[tokio::test]
    async fn test_timer_delivers_events() {
        let (engine, mut bridge) = bridge_with_engine(10);
        let mut sub = bridge.subscribe();
        bridge.start();
        assert_eq!(bridge.state(), BridgeState::Running);

        engine.push_event(Subsystem::FILE_TREE, deleted("g1"));
        engine.push_event(Subsystem::FILE_TREE, deleted("g2"));

        let first = timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
        assert_eq!(first, Some(TreeEvent::GroupDeleted { id: "g1".into() }));
        let second = timeout(Duration::from_secs(2), sub.next()).await.unwrap();
        assert_eq!(second, Some(TreeEvent::GroupDeleted { id: "g2".into() }));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_resumes() {
        let (engine, mut bridge) = bridge_with_engine(10);
        let mut sub = bridge.subscribe();

        bridge.start();
        bridge.start();
        assert_eq!(bridge.state(), BridgeState::Running);

        bridge.stop();
        bridge.stop();
        assert_eq!(bridge.state(), BridgeState::Stopped);

        engine.push_event(Subsystem::FILE_TREE, deleted("late"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.try_recv().is_none());
        assert_eq!(engine.queued(Subsystem::FILE_TREE), 1);

        bridge.start();
        let event = timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
        assert_eq!(event, Some(TreeEvent::GroupDeleted { id: "late".into() }));
    }

    #[tokio::test]
    async fn test_dispose_closes_subscriptions() {
        let (_engine, mut bridge) = bridge_with_engine(10);
        let mut sub = bridge.subscribe();
        bridge.start();
        bridge.dispose();

        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert_eq!(bridge.subscriber_count(), 0);
        let end = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert!(end.is_none());
    }
}
