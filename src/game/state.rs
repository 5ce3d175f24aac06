//! Game state definitions
//!
//! Players, their trails, and sessions. Field names serialize in PascalCase
//! because the web client reads the world frame with those keys.

use hashbrown::HashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::constants::{arena, facing};
use crate::util::geometry::Point;

/// Identifies a transport connection
pub type ConnectionId = Uuid;

/// Session lookup key (e.g. `alice_bob` for matched sessions)
pub type SessionKey = String;

/// A recorded trail vertex
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PathPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PathPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Projection onto the arena plane
    #[inline]
    pub fn planar(&self) -> Point {
        Point::new(self.x, self.z)
    }
}

/// Player state
///
/// The trail always holds at least one point. The last trail point plus the
/// current position form the live segment, which is only stored once the
/// next heading change promotes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Player {
    /// Display name, unique within a session
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Current heading (radians)
    pub rotation: f64,
    /// Heading at the end of the previous tick
    pub last_rotation: f64,
    /// Turn points, oldest first
    pub path_points: Vec<PathPoint>,
    /// Skip the next tick's movement
    pub just_spawned: bool,
}

impl Player {
    /// Create a player at a fixed position facing front, with a one-point trail
    pub fn new_at(name: impl Into<String>, x: f64, z: f64) -> Self {
        Self {
            name: name.into(),
            x,
            y: 0.0,
            z,
            rotation: facing::FRONT,
            last_rotation: facing::FRONT,
            path_points: vec![PathPoint::new(x, 0.0, z)],
            just_spawned: true,
        }
    }

    /// Create a player at a uniformly random position inside the arena
    pub fn spawn<R: Rng + ?Sized>(name: impl Into<String>, rng: &mut R) -> Self {
        let (x, z) = random_arena_position(rng);
        Self::new_at(name, x, z)
    }

    /// Current position on the arena plane
    #[inline]
    pub fn planar(&self) -> Point {
        Point::new(self.x, self.z)
    }

    /// Most recent trail vertex
    #[inline]
    pub fn last_path_point(&self) -> Option<&PathPoint> {
        self.path_points.last()
    }

    /// Whether the trail has at least one stored segment
    #[inline]
    pub fn has_trail(&self) -> bool {
        self.path_points.len() >= 2
    }
}

/// Uniform random `(x, z)` in `[LOWER_LIMIT, UPPER_LIMIT]`, drawn per axis
pub fn random_arena_position<R: Rng + ?Sized>(rng: &mut R) -> (f64, f64) {
    let x = rng.gen_range(arena::LOWER_LIMIT..=arena::UPPER_LIMIT);
    let z = rng.gen_range(arena::LOWER_LIMIT..=arena::UPPER_LIMIT);
    (x, z)
}

/// One arena instance: the players sharing collision and broadcast scope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Session {
    /// Key under which the world holds this session
    #[serde(skip)]
    pub key: SessionKey,
    /// Free-form state tag, opaque to the simulation
    pub state: String,
    /// Players by name
    pub players: HashMap<String, Player>,
}

impl Session {
    pub fn new(key: impl Into<SessionKey>, state: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: state.into(),
            players: HashMap::new(),
        }
    }

    #[inline]
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn get_player(&self, name: &str) -> Option<&Player> {
        self.players.get(name)
    }

    pub fn get_player_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.players.get_mut(name)
    }

    /// Player names in a stable order, used as the per-tick processing order
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.players.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_player_invariants() {
        let player = Player::new_at("alice", 1.5, -2.0);
        assert_eq!(player.path_points, vec![PathPoint::new(1.5, 0.0, -2.0)]);
        assert_eq!(player.rotation, facing::FRONT);
        assert_eq!(player.last_rotation, facing::FRONT);
        assert!(player.just_spawned);
        assert!(!player.has_trail());
    }

    #[test]
    fn test_spawn_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for i in 0..200 {
            let player = Player::spawn(format!("p{}", i), &mut rng);
            assert!(player.x.abs() <= arena::BOUNDARY);
            assert!(player.z.abs() <= arena::BOUNDARY);
            assert_eq!(player.path_points.len(), 1);
        }
    }

    #[test]
    fn test_player_serializes_pascal_case() {
        let player = Player::new_at("bob", 0.5, 0.25);
        let value = serde_json::to_value(&player).unwrap();
        assert_eq!(value["Name"], "bob");
        assert_eq!(value["X"], 0.5);
        assert_eq!(value["Z"], 0.25);
        assert_eq!(value["PathPoints"][0]["Z"], 0.25);
        assert_eq!(value["JustSpawned"], true);
        assert!(value.get("LastRotation").is_some());
    }

    #[test]
    fn test_session_serialization_skips_key() {
        let mut session = Session::new("alice_bob", "new");
        session
            .players
            .insert("alice".to_string(), Player::new_at("alice", 0.0, 0.0));

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["State"], "new");
        assert!(value["Players"]["alice"].is_object());
        assert!(value.get("Key").is_none());
    }

    #[test]
    fn test_sorted_names() {
        let mut session = Session::new("s", "new");
        for name in ["carol", "alice", "bob"] {
            session.players.insert(name.to_string(), Player::new_at(name, 0.0, 0.0));
        }
        assert_eq!(session.sorted_names(), vec!["alice", "bob", "carol"]);
    }
}
