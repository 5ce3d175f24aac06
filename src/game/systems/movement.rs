//! Per-player kinematics
//!
//! Each tick a player steps `SPEED * DELTA` along its heading. Trail
//! vertices are only recorded at turns, and a freshly (re)spawned player
//! skips one tick so its spawn point is not overwritten by drift.

use crate::game::constants::{arena::BOUNDARY, facing, movement};
use crate::game::state::{PathPoint, Player};
use crate::util::geometry::round4;

/// Result of committing one tick for a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Spawn suppression consumed the tick
    Suppressed,
    /// Position committed
    Moved {
        /// A turn was recorded as a new trail vertex
        vertex_added: bool,
        /// The arena boundary clamped the player and changed its heading
        reflected: bool,
    },
}

/// Tentative next `(x, z)` from heading and speed, rounded to 4 decimals
#[inline]
pub fn next_position(player: &Player) -> (f64, f64) {
    let step = movement::SPEED * movement::DELTA;
    let x = round4(player.x + player.rotation.sin() * step);
    let z = round4(player.z + player.rotation.cos() * step);
    (x, z)
}

/// Clamp a player back into the arena and turn it toward the interior.
///
/// Axes are handled independently. When both are out of bounds the z-axis
/// heading overwrites the x-axis heading (last write wins).
///
/// Returns true if either axis was clamped.
pub fn apply_boundary_reflection(player: &mut Player) -> bool {
    let mut reflected = false;

    if player.x.abs() > BOUNDARY {
        if player.x > 0.0 {
            player.rotation = facing::LEFT;
            player.x = BOUNDARY;
        } else {
            player.rotation = facing::RIGHT;
            player.x = -BOUNDARY;
        }
        reflected = true;
    }

    if player.z.abs() > BOUNDARY {
        if player.z > 0.0 {
            player.rotation = facing::BACK;
            player.z = BOUNDARY;
        } else {
            player.rotation = facing::FRONT;
            player.z = -BOUNDARY;
        }
        reflected = true;
    }

    reflected
}

/// Commit a tick for `player` using the tentative position `next`.
///
/// Order: spawn suppression, position, turn vertex, heading bookkeeping,
/// then boundary reflection. A reflection changes the heading after the
/// bookkeeping, so the wall contact point becomes a vertex on the next tick.
pub fn advance(player: &mut Player, next: (f64, f64)) -> StepOutcome {
    if player.just_spawned {
        player.just_spawned = false;
        return StepOutcome::Suppressed;
    }

    let origin = PathPoint::new(player.x, player.y, player.z);
    player.x = next.0;
    player.z = next.1;

    let vertex_added = player.rotation != player.last_rotation;
    if vertex_added {
        player.path_points.push(origin);
    }
    player.last_rotation = player.rotation;

    let reflected = apply_boundary_reflection(player);

    StepOutcome::Moved {
        vertex_added,
        reflected,
    }
}

/// Compute and commit one tick
pub fn step(player: &mut Player) -> StepOutcome {
    let next = next_position(player);
    advance(player, next)
}
