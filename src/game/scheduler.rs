//! Fixed-rate simulation driver
//!
//! The scheduler is the only writer of the [`World`]. Each tick it applies
//! queued commands, advances every session in parallel, then publishes the
//! world frame and any collision events.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashSet;
use rand::Rng;
use rayon::prelude::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::commands::{CommandBuffer, CommandSender};
use crate::game::constants::{broadcast::MIN_FRAME_LEN, timing};
use crate::game::state::Session;
use crate::game::sweep::SweepIndex;
use crate::game::systems::collision::{self, CollisionEvent, ResetPolicy};
use crate::game::systems::movement;
use crate::game::world::World;
use crate::metrics::Metrics;
use crate::net::broadcast::Broadcast;
use crate::net::protocol::{encode, ServerMessage};

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub commands_applied: usize,
    pub commands_failed: usize,
    pub collisions: Vec<CollisionEvent>,
    /// Serialized frame length, whether or not it was published
    pub frame_bytes: usize,
    pub frame_published: bool,
}

/// Owns the world and drives it
pub struct Scheduler {
    world: World,
    commands: CommandBuffer,
    broadcaster: Arc<dyn Broadcast>,
    metrics: Arc<Metrics>,
    reset_policy: ResetPolicy,
}

impl Scheduler {
    pub fn new(
        commands: CommandBuffer,
        broadcaster: Arc<dyn Broadcast>,
        metrics: Arc<Metrics>,
        reset_policy: ResetPolicy,
    ) -> Self {
        Self {
            world: World::new(),
            commands,
            broadcaster,
            metrics,
            reset_policy,
        }
    }

    /// Producer handle for connection tasks and the match builder
    pub fn command_sender(&self) -> CommandSender {
        self.commands.sender()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Apply every queued command. Returns (applied, failed).
    pub fn apply_pending_commands<R: Rng + ?Sized>(&mut self, rng: &mut R) -> (usize, usize) {
        let mut applied = 0;
        let mut failed = 0;

        for message in self.commands.drain() {
            let kind = message.command.kind();
            let result = self.world.apply(message.command, rng);

            match &result {
                Ok(_) => applied += 1,
                Err(e) => {
                    warn!("Command {} failed: {}", kind, e);
                    failed += 1;
                }
            }

            if let Some(reply) = message.reply {
                // The requester may have disconnected meanwhile
                let _ = reply.send(result);
            }
        }

        self.metrics.commands_applied.fetch_add(applied as u64, Ordering::Relaxed);
        self.metrics.commands_failed.fetch_add(failed as u64, Ordering::Relaxed);
        (applied, failed)
    }

    /// Run one full tick
    pub fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let (commands_applied, commands_failed) = self.apply_pending_commands(&mut rand::thread_rng());

        let policy = self.reset_policy;
        let collisions: Vec<CollisionEvent> = self
            .world
            .sessions_mut()
            .par_values_mut()
            .flat_map_iter(|session| step_session(session, policy, &mut rand::thread_rng()))
            .collect();

        let (frame_bytes, frame_published) = self.publish_frame();
        self.publish_collisions(&collisions);

        self.metrics.record_tick_time(started.elapsed());
        self.metrics.record_world(
            self.world.session_count(),
            self.world.active_player_count(),
            self.world.connection_count(),
        );

        TickReport {
            commands_applied,
            commands_failed,
            collisions,
            frame_bytes,
            frame_published,
        }
    }

    /// Publish the world frame unless it is trivially small
    fn publish_frame(&self) -> (usize, bool) {
        let frame = match self.world.frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to serialize world frame: {}", e);
                return (0, false);
            }
        };

        let bytes = frame.len();
        self.metrics.frame_bytes.store(bytes as u64, Ordering::Relaxed);
        if bytes <= MIN_FRAME_LEN {
            self.metrics.frames_skipped.fetch_add(1, Ordering::Relaxed);
            return (bytes, false);
        }

        self.broadcaster.publish(Arc::from(frame));
        self.metrics.frames_published.fetch_add(1, Ordering::Relaxed);
        (bytes, true)
    }

    fn publish_collisions(&self, collisions: &[CollisionEvent]) {
        for event in collisions {
            info!("{} crossed the trail of {}", event.collider, event.crossed);
            match encode(&ServerMessage::from(event)) {
                Ok(payload) => {
                    self.broadcaster.publish(Arc::from(payload));
                }
                Err(e) => warn!("Failed to encode collision event: {}", e),
            }
        }

        let count = collisions.len() as u64;
        self.metrics.collisions_total.fetch_add(count, Ordering::Relaxed);
        self.metrics.resets_total.fetch_add(count, Ordering::Relaxed);
    }

    /// Drive ticks at `period` until `shutdown` flips to true
    pub fn spawn(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let ticks_per_log = (timing::STATS_LOG_INTERVAL_SECS * 1000 / period.as_millis().max(1) as u64).max(1);
            let start = Instant::now();
            let mut tick_count: u64 = 0;

            info!("Simulation loop started ({} ms tick)", period.as_millis());

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let report = self.tick();
                tick_count += 1;

                if report.commands_failed > 0 || !report.collisions.is_empty() {
                    debug!(
                        "Tick {}: {} commands ({} failed), {} collisions",
                        tick_count,
                        report.commands_applied + report.commands_failed,
                        report.commands_failed,
                        report.collisions.len()
                    );
                }

                if tick_count % ticks_per_log == 0 {
                    info!(
                        "Simulation: {}s, tick {}, {} sessions, {} players, {} connections | p95 {}us",
                        start.elapsed().as_secs(),
                        tick_count,
                        self.world.session_count(),
                        self.world.active_player_count(),
                        self.world.connection_count(),
                        self.metrics.tick_time_p95_us.load(Ordering::Relaxed)
                    );
                }
            }

            info!("Simulation loop stopped after {} ticks", tick_count);
        })
    }
}

/// Advance one session by a tick.
///
/// Players are processed in name order. For each player the tentative next
/// position is computed, collisions against its trail are resolved, then the
/// move is committed. A player relocated during this tick is not moved again
/// in it, whether its turn comes before or after the reset, so its next tick
/// is always consumed by spawn suppression.
pub fn step_session<R: Rng + ?Sized>(
    session: &mut Session,
    policy: ResetPolicy,
    rng: &mut R,
) -> Vec<CollisionEvent> {
    let mut index = SweepIndex::new();
    let mut events = Vec::new();
    let mut relocated: HashSet<String> = HashSet::new();

    for name in session.sorted_names() {
        let next = match session.get_player(&name) {
            Some(player) => movement::next_position(player),
            None => continue,
        };

        let hits = collision::resolve(session, &name, &mut index, policy, rng);
        relocated.extend(hits.iter().map(|event| policy.target(event).to_string()));
        events.extend(hits);

        if relocated.contains(&name) {
            continue;
        }
        if let Some(player) = session.get_player_mut(&name) {
            movement::advance(player, next);
        }
    }

    events
}
