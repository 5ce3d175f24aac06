//! Trail collision resolution
//!
//! For an acting player P, every other player Q's newest movement segment
//! (Q's last trail point to Q's projected next position) is tested against
//! P's whole trail, including P's live segment. A hit names Q as the
//! collider and P as the crossed player. Which of the two is sent back to a
//! random spawn is governed by [`ResetPolicy`].

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::debug;

use crate::game::constants::facing;
use crate::game::state::{random_arena_position, PathPoint, Player, Session};
use crate::game::sweep::SweepIndex;
use crate::game::systems::movement::next_position;
use crate::util::geometry::{Point, Segment};

/// Who is relocated when a crossing is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetPolicy {
    /// Reset the player whose trail was crossed (P). Historical behavior.
    #[default]
    ResetCrossed,
    /// Reset the player whose newest segment did the crossing (Q)
    ResetCrosser,
}

impl FromStr for ResetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crossed" | "reset_crossed" => Ok(ResetPolicy::ResetCrossed),
            "crosser" | "reset_crosser" => Ok(ResetPolicy::ResetCrosser),
            other => Err(format!("unknown reset policy '{}'", other)),
        }
    }
}

impl ResetPolicy {
    /// Name of the player this policy relocates for `event`
    pub fn target<'a>(&self, event: &'a CollisionEvent) -> &'a str {
        match self {
            ResetPolicy::ResetCrossed => &event.crossed,
            ResetPolicy::ResetCrosser => &event.collider,
        }
    }
}

/// A detected crossing, published to every client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionEvent {
    /// Player whose newest segment crossed the trail
    pub collider: String,
    /// Player whose trail was crossed
    pub crossed: String,
    /// Milliseconds since the Unix epoch
    pub time: u64,
}

impl CollisionEvent {
    pub fn new(collider: impl Into<String>, crossed: impl Into<String>) -> Self {
        Self {
            collider: collider.into(),
            crossed: crossed.into(),
            time: epoch_millis(),
        }
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Segments between consecutive trail points, followed by the live segment
/// from the last trail point to `live_end`.
pub fn trail_segments(player: &Player, live_end: Point) -> Vec<Segment> {
    let mut segments: Vec<Segment> = player
        .path_points
        .windows(2)
        .map(|pair| Segment::new(pair[0].planar(), pair[1].planar()))
        .collect();

    if let Some(last) = player.last_path_point() {
        segments.push(Segment::new(last.planar(), live_end));
    }
    segments
}

/// Send a player back to a random spawn with a fresh two-point trail
pub fn reset_player<R: Rng + ?Sized>(player: &mut Player, rng: &mut R) {
    let (x, z) = random_arena_position(rng);
    player.path_points = vec![PathPoint::new(x, 0.0, z), PathPoint::new(x, 0.0, z)];
    player.x = x;
    player.y = 0.0;
    player.z = z;
    player.rotation = facing::FRONT;
    player.last_rotation = facing::FRONT;
    player.just_spawned = true;
}

/// Test every other player's newest segment against `acting`'s trail and
/// apply `policy` to each hit.
///
/// `index` is reused between queries and reset before each one. The acting
/// player's segments are built once, before any reset in this call.
pub fn resolve<R: Rng + ?Sized>(
    session: &mut Session,
    acting: &str,
    index: &mut SweepIndex,
    policy: ResetPolicy,
    rng: &mut R,
) -> Vec<CollisionEvent> {
    let acting_segments = match session.get_player(acting) {
        Some(player) if player.has_trail() => trail_segments(player, player.planar()),
        _ => return Vec::new(),
    };

    let mut events = Vec::new();
    for other_name in session.sorted_names() {
        if other_name == acting {
            continue;
        }

        let newest = match session.get_player(&other_name) {
            Some(other) if other.has_trail() => {
                let (next_x, next_z) = next_position(other);
                match other.last_path_point() {
                    Some(last) => Segment::new(last.planar(), Point::new(next_x, next_z)),
                    None => continue,
                }
            }
            _ => continue,
        };

        index.reset();
        index.extend(acting_segments.iter().copied());
        if index.query_intersection(&newest).is_none() {
            continue;
        }

        debug!("{} crossed the trail of {} in {}", other_name, acting, session.key);

        let event = CollisionEvent::new(other_name.clone(), acting);
        if let Some(player) = session.get_player_mut(policy.target(&event)) {
            reset_player(player, rng);
        }
        events.push(event);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::arena::BOUNDARY;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Player with an explicit trail, already past spawn suppression
    fn trailed(name: &str, points: &[(f64, f64)], heading: f64) -> Player {
        let (x, z) = *points.last().unwrap();
        let mut player = Player::new_at(name, x, z);
        player.path_points = points.iter().map(|&(x, z)| PathPoint::new(x, 0.0, z)).collect();
        player.rotation = heading;
        player.last_rotation = heading;
        player.just_spawned = false;
        player
    }

    fn session_with(players: Vec<Player>) -> Session {
        let mut session = Session::new("arena", "new");
        for player in players {
            session.players.insert(player.name.clone(), player);
        }
        session
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("crossed".parse::<ResetPolicy>(), Ok(ResetPolicy::ResetCrossed));
        assert_eq!("Crosser".parse::<ResetPolicy>(), Ok(ResetPolicy::ResetCrosser));
        assert!("both".parse::<ResetPolicy>().is_err());
        assert_eq!(ResetPolicy::default(), ResetPolicy::ResetCrossed);
    }

    #[test]
    fn test_policy_target() {
        let event = CollisionEvent::new("bob", "alice");
        assert_eq!(ResetPolicy::ResetCrossed.target(&event), "alice");
        assert_eq!(ResetPolicy::ResetCrosser.target(&event), "bob");
    }

    #[test]
    fn test_trail_segments_include_live_segment() {
        let mut player = trailed("a", &[(0.0, 0.0), (0.0, 2.0), (2.0, 2.0)], facing::RIGHT);
        player.x = 3.0;
        player.z = 2.0;

        let segments = trail_segments(&player, player.planar());
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::from_coords(0.0, 0.0, 0.0, 2.0));
        assert_eq!(segments[2], Segment::from_coords(2.0, 2.0, 3.0, 2.0));
    }

    #[test]
    fn test_reset_player_bounds_and_trail() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut player = trailed("a", &[(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)], 1.0);

        for _ in 0..100 {
            reset_player(&mut player, &mut rng);
            assert!(player.x >= -BOUNDARY && player.x <= BOUNDARY);
            assert!(player.z >= -BOUNDARY && player.z <= BOUNDARY);
            assert_eq!(player.path_points.len(), 2);
            assert_eq!(player.path_points[0], player.path_points[1]);
            assert_eq!(player.path_points[0], PathPoint::new(player.x, 0.0, player.z));
            assert_eq!(player.rotation, facing::FRONT);
            assert_eq!(player.last_rotation, facing::FRONT);
            assert!(player.just_spawned);
        }
    }

    /// `alice` owns a vertical trail along x = 0. `bob` runs along z = 1
    /// heading right and his next step carries him across x = 0.
    fn crossing_session() -> Session {
        let alice = trailed("alice", &[(0.0, -4.0), (0.0, 4.0)], facing::FRONT);
        let mut bob = trailed("bob", &[(-4.0, 1.0), (-2.0, 1.0)], facing::RIGHT);
        bob.x = -0.05;
        bob.z = 1.0;
        session_with(vec![alice, bob])
    }

    #[test]
    fn test_resolve_reset_crossed() {
        let mut session = crossing_session();
        let mut index = SweepIndex::new();
        let mut rng = StdRng::seed_from_u64(1);
        let bob_before = session.get_player("bob").cloned().unwrap();

        let events = resolve(&mut session, "alice", &mut index, ResetPolicy::ResetCrossed, &mut rng);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].collider, "bob");
        assert_eq!(events[0].crossed, "alice");
        assert!(events[0].time > 0);

        let alice = session.get_player("alice").unwrap();
        assert!(alice.just_spawned);
        assert_eq!(alice.path_points.len(), 2);
        assert_eq!(session.get_player("bob").unwrap(), &bob_before);
    }

    #[test]
    fn test_resolve_reset_crosser() {
        let mut session = crossing_session();
        let mut index = SweepIndex::new();
        let mut rng = StdRng::seed_from_u64(2);
        let alice_before = session.get_player("alice").cloned().unwrap();

        let events = resolve(&mut session, "alice", &mut index, ResetPolicy::ResetCrosser, &mut rng);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].collider, "bob");
        let bob = session.get_player("bob").unwrap();
        assert!(bob.just_spawned);
        assert_eq!(bob.path_points.len(), 2);
        assert_eq!(session.get_player("alice").unwrap(), &alice_before);
    }

    #[test]
    fn test_resolve_not_reversed() {
        // bob's trail is not crossed by alice's newest segment
        let mut session = crossing_session();
        let mut index = SweepIndex::new();
        let mut rng = StdRng::seed_from_u64(3);

        let events = resolve(&mut session, "bob", &mut index, ResetPolicy::ResetCrossed, &mut rng);
        assert!(events.is_empty());
        assert!(!session.get_player("bob").unwrap().just_spawned);
    }

    #[test]
    fn test_resolve_skips_short_trails() {
        let alice = trailed("alice", &[(0.0, -4.0), (0.0, 4.0)], facing::FRONT);
        let mut bob = trailed("bob", &[(-2.0, 1.0)], facing::RIGHT);
        bob.x = -0.05;
        bob.z = 1.0;
        let mut session = session_with(vec![alice, bob]);
        let mut index = SweepIndex::new();
        let mut rng = StdRng::seed_from_u64(4);

        let events = resolve(&mut session, "alice", &mut index, ResetPolicy::ResetCrossed, &mut rng);
        assert!(events.is_empty());
    }

    #[test]
    fn test_resolve_unknown_player() {
        let mut session = crossing_session();
        let mut index = SweepIndex::new();
        let mut rng = StdRng::seed_from_u64(5);
        assert!(resolve(&mut session, "nobody", &mut index, ResetPolicy::ResetCrossed, &mut rng).is_empty());
    }

    #[test]
    fn test_resolve_far_apart() {
        let alice = trailed("alice", &[(-6.0, -6.0), (-6.0, -2.0)], facing::FRONT);
        let bob = trailed("bob", &[(4.0, 4.0), (6.0, 4.0)], facing::RIGHT);
        let mut session = session_with(vec![alice, bob]);
        let mut index = SweepIndex::new();
        let mut rng = StdRng::seed_from_u64(6);

        for name in ["alice", "bob"] {
            let events = resolve(&mut session, name, &mut index, ResetPolicy::ResetCrossed, &mut rng);
            assert!(events.is_empty());
        }
    }
}
