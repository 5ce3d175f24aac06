//! Periodic match building and per-player match notifications

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::game::commands::{CommandSender, WorldCommand};
use crate::game::constants::matchmaking::NEW_SESSION_STATE;
use crate::game::world::WorldError;
use crate::lobby::matchmaker::Matchmaker;
use crate::metrics::Metrics;
use crate::net::protocol::ServerMessage;

/// A formed match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFound {
    pub players: [String; 2],
    /// Session key, the two names joined with `_`
    pub game_key: String,
}

impl MatchFound {
    pub fn new(players: [String; 2]) -> Self {
        let game_key = format!("{}_{}", players[0], players[1]);
        Self { players, game_key }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::MatchFound {
            match_list: self.players.clone(),
            game_key: self.game_key.clone(),
        }
    }
}

/// One-shot match notification per waiting player.
///
/// Dropping the receiver (for example on disconnect) cancels the wait; the
/// stale sender is discarded on the next notify.
#[derive(Debug, Default)]
pub struct MatchNotifier {
    waiting: Mutex<HashMap<String, oneshot::Sender<MatchFound>>>,
}

impl MatchNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next match involving `name`, replacing any earlier wait
    pub fn register(&self, name: &str) -> oneshot::Receiver<MatchFound> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(name.to_string(), tx);
        rx
    }

    pub fn cancel(&self, name: &str) {
        self.waiting.lock().remove(name);
    }

    /// Deliver `found` to both players. Returns how many were still waiting.
    pub fn notify(&self, found: &MatchFound) -> usize {
        let mut waiting = self.waiting.lock();
        found
            .players
            .iter()
            .filter_map(|name| waiting.remove(name))
            .map(|tx| tx.send(found.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.lock().len()
    }
}

/// Turns matchmaker pairs into sessions and notifications
pub struct MatchBuilder {
    matchmaker: Arc<dyn Matchmaker>,
    notifier: Arc<MatchNotifier>,
    commands: CommandSender,
    metrics: Arc<Metrics>,
}

impl MatchBuilder {
    pub fn new(
        matchmaker: Arc<dyn Matchmaker>,
        notifier: Arc<MatchNotifier>,
        commands: CommandSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            matchmaker,
            notifier,
            commands,
            metrics,
        }
    }

    /// Form matches once, creating a session for each before notifying
    pub async fn build_matches(&self) -> Vec<MatchFound> {
        let pairs = self.matchmaker.build_matches();
        self.metrics
            .matchmaking_queue
            .store(self.matchmaker.pending_count() as u64, Ordering::Relaxed);

        let mut formed = Vec::with_capacity(pairs.len());
        for players in pairs {
            let found = MatchFound::new(players);
            let create = WorldCommand::CreateSession {
                key: found.game_key.clone(),
                state: NEW_SESSION_STATE.to_string(),
            };

            match self.commands.request(create).await {
                Ok(Ok(_)) | Ok(Err(WorldError::SessionExists(_))) => {}
                Ok(Err(e)) => {
                    warn!("Could not create session {}: {}", found.game_key, e);
                    continue;
                }
                Err(e) => {
                    warn!("Could not create session {}: {}", found.game_key, e);
                    continue;
                }
            }

            let delivered = self.notifier.notify(&found);
            info!(
                "Match found: {} vs {} -> {} ({} notified)",
                found.players[0], found.players[1], found.game_key, delivered
            );
            self.metrics.matches_formed.fetch_add(1, Ordering::Relaxed);
            formed.push(found);
        }

        formed
    }

    /// Build matches every `period` until `shutdown` flips to true
    pub fn spawn(self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Match builder started ({} ms)", period.as_millis());

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.build_matches().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Match builder stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::commands::CommandBuffer;
    use crate::game::scheduler::Scheduler;
    use crate::game::systems::collision::ResetPolicy;
    use crate::lobby::matchmaker::EloQueue;
    use crate::net::broadcast::ChannelBroadcaster;

    #[test]
    fn test_match_found_key_and_message() {
        let found = MatchFound::new(["alice".to_string(), "bob".to_string()]);
        assert_eq!(found.game_key, "alice_bob");

        let json = crate::net::protocol::encode(&found.to_message()).unwrap();
        assert_eq!(
            json,
            r#"{"command":"matchFound","matchList":["alice","bob"],"gameKey":"alice_bob"}"#
        );
    }

    #[tokio::test]
    async fn test_notifier_delivers_to_both() {
        let notifier = MatchNotifier::new();
        let alice = notifier.register("alice");
        let bob = notifier.register("bob");
        let found = MatchFound::new(["alice".to_string(), "bob".to_string()]);

        assert_eq!(notifier.notify(&found), 2);
        assert_eq!(alice.await.unwrap(), found);
        assert_eq!(bob.await.unwrap().game_key, "alice_bob");
        assert_eq!(notifier.waiting_count(), 0);
    }

    #[test]
    fn test_notifier_dropped_receiver_cancels() {
        let notifier = MatchNotifier::new();
        let alice = notifier.register("alice");
        drop(alice);
        let _bob = notifier.register("bob");

        let found = MatchFound::new(["alice".to_string(), "bob".to_string()]);
        assert_eq!(notifier.notify(&found), 1);

        notifier.register("carol");
        notifier.cancel("carol");
        assert_eq!(notifier.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_build_matches_creates_session_and_notifies() {
        let metrics = Arc::new(Metrics::new());
        let scheduler = Scheduler::new(
            CommandBuffer::new(16),
            Arc::new(ChannelBroadcaster::new(16)),
            metrics.clone(),
            ResetPolicy::default(),
        );
        let commands = scheduler.command_sender();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = scheduler.spawn(Duration::from_millis(5), shutdown_rx);

        let queue = Arc::new(EloQueue::new(100.0, Duration::from_secs(10)));
        queue.enqueue("alice", 100.0);
        queue.enqueue("bob", 120.0);
        let notifier = Arc::new(MatchNotifier::new());
        let alice = notifier.register("alice");

        let builder = MatchBuilder::new(queue.clone(), notifier.clone(), commands.clone(), metrics.clone());
        let formed = builder.build_matches().await;

        assert_eq!(formed.len(), 1);
        assert_eq!(alice.await.unwrap().game_key, "alice_bob");
        assert_eq!(metrics.matches_formed.load(Ordering::Relaxed), 1);

        // The session now exists
        let again = commands
            .request(WorldCommand::CreateSession {
                key: "alice_bob".to_string(),
                state: "new".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(again, Err(WorldError::SessionExists("alice_bob".to_string())));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
