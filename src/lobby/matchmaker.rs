//! In-memory Elo matchmaking queue

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tracing::debug;

/// Source of player pairs for the match builder
pub trait Matchmaker: Send + Sync {
    /// Queue a player, updating its Elo if already known
    fn enqueue(&self, name: &str, elo: f64);

    /// Remove a player from the pending queue
    fn cancel(&self, name: &str);

    /// Pair up as many pending players as possible
    fn build_matches(&self) -> Vec<[String; 2]>;

    fn pending_count(&self) -> usize;
}

/// Unordered pair key
fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    elo: HashMap<String, f64>,
    /// Waiting players, oldest first
    pending: VecDeque<String>,
    last_played: HashMap<(String, String), Instant>,
    blocked: HashSet<(String, String)>,
}

/// FIFO queue matched by Elo distance.
///
/// Two players match when their Elo differs by at most `threshold`, they
/// have not played each other within `cooldown`, and neither has blocked the
/// other. Each pending player is considered in arrival order against
/// candidates sorted by ascending Elo.
#[derive(Debug)]
pub struct EloQueue {
    state: Mutex<QueueState>,
    threshold: f64,
    cooldown: Duration,
}

impl EloQueue {
    pub fn new(threshold: f64, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            threshold,
            cooldown,
        }
    }

    /// Stop `a` and `b` from ever being paired
    pub fn block(&self, a: &str, b: &str) {
        self.state.lock().blocked.insert(pair(a, b));
    }

    pub fn elo(&self, name: &str) -> Option<f64> {
        self.state.lock().elo.get(name).copied()
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.state.lock().pending.iter().any(|p| p == name)
    }

    /// Pair players as of `now`
    pub fn build_matches_at(&self, now: Instant) -> Vec<[String; 2]> {
        let mut state = self.state.lock();
        let cooldown = self.cooldown;
        state
            .last_played
            .retain(|_, at| now.saturating_duration_since(*at) <= cooldown);

        let mut matched: HashSet<String> = HashSet::new();
        let mut pairs = Vec::new();

        let waiting: Vec<String> = state.pending.iter().cloned().collect();
        for name in &waiting {
            if matched.contains(name) {
                continue;
            }
            let Some(&elo) = state.elo.get(name) else {
                continue;
            };

            let mut candidates: Vec<(&String, f64)> = waiting
                .iter()
                .filter(|other| *other != name && !matched.contains(*other))
                .filter_map(|other| state.elo.get(other).map(|&e| (other, e)))
                .filter(|(_, other_elo)| (other_elo - elo).abs() <= self.threshold)
                .collect();
            candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

            let opponent = candidates.into_iter().map(|(other, _)| other).find(|other| {
                let key = pair(name, other);
                let recent = state
                    .last_played
                    .get(&key)
                    .is_some_and(|at| now.saturating_duration_since(*at) <= self.cooldown);
                !recent && !state.blocked.contains(&key)
            });

            if let Some(opponent) = opponent {
                debug!("Matched {} with {}", name, opponent);
                matched.insert(name.clone());
                matched.insert(opponent.clone());
                pairs.push([name.clone(), opponent.clone()]);
            }
        }

        state.pending.retain(|p| !matched.contains(p));
        state.elo.retain(|name, _| !matched.contains(name));
        for [a, b] in &pairs {
            state.last_played.insert(pair(a, b), now);
        }
        pairs
    }
}

impl Matchmaker for EloQueue {
    fn enqueue(&self, name: &str, elo: f64) {
        let mut state = self.state.lock();
        state.elo.insert(name.to_string(), elo);
        if !state.pending.iter().any(|p| p == name) {
            state.pending.push_back(name.to_string());
        }
    }

    fn cancel(&self, name: &str) {
        let mut state = self.state.lock();
        state.pending.retain(|p| p != name);
        state.elo.remove(name);
    }

    fn build_matches(&self) -> Vec<[String; 2]> {
        self.build_matches_at(Instant::now())
    }

    fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}
