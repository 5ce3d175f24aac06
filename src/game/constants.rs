//! Game constants
//!
//! Movement and arena values are shared with the web client; changing them
//! changes how trails render, so keep them in sync.

/// Movement constants
pub mod movement {
    /// Distance units per simulation step multiplier
    pub const SPEED: f64 = 0.50;
    /// Tick-relative step size. Independent of the wall-clock tick period.
    pub const DELTA: f64 = 0.25;
}

/// Arena bounds
pub mod arena {
    /// Half-width of the square arena on both x and z
    pub const BOUNDARY: f64 = 8.0;
    /// Lower spawn limit
    pub const LOWER_LIMIT: f64 = -BOUNDARY;
    /// Upper spawn limit
    pub const UPPER_LIMIT: f64 = BOUNDARY;
}

/// Canonical headings (radians). The client renders with y-up and measures
/// heading from +z, so "front" is a full turn rather than zero.
pub mod facing {
    use std::f64::consts::PI;

    /// Facing +z. Default heading on spawn and after reset.
    pub const FRONT: f64 = 2.0 * PI;
    /// Facing -x
    pub const LEFT: f64 = -PI / 2.0;
    /// Facing -z
    pub const BACK: f64 = FRONT + PI;
    /// Facing +x
    pub const RIGHT: f64 = FRONT + PI / 2.0;
}

/// Scheduling constants
pub mod timing {
    /// Simulation tick period in milliseconds
    pub const TICK_INTERVAL_MS: u64 = 30;
    /// Match-building period in milliseconds
    pub const MATCH_INTERVAL_MS: u64 = 1000;
    /// Seconds between periodic stats log lines
    pub const STATS_LOG_INTERVAL_SECS: u64 = 30;
}

/// Broadcast constants
pub mod broadcast {
    /// Frames at or below this many bytes (e.g. `{}`) are not published
    pub const MIN_FRAME_LEN: usize = 4;
}

/// Matchmaking constants
pub mod matchmaking {
    /// Elo assigned to players queued through `findGame`
    pub const DEFAULT_ELO: f64 = 100.0;
    /// Maximum Elo difference for a match
    pub const ELO_THRESHOLD: f64 = 100.0;
    /// Two players who just played are not re-paired within this window
    pub const RECENT_MATCH_COOLDOWN_SECS: u64 = 10;
    /// State tag given to sessions created by the match builder
    pub const NEW_SESSION_STATE: &str = "new";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_step_length() {
        assert_eq!(movement::SPEED * movement::DELTA, 0.125);
    }

    #[test]
    fn test_facings_point_inward() {
        // sin/cos of each facing gives the (x, z) step direction
        assert!(facing::LEFT.sin() < 0.0);
        assert!(facing::RIGHT.sin() > 0.0);
        assert!(facing::FRONT.cos() > 0.0);
        assert!(facing::BACK.cos() < 0.0);
        assert!((facing::BACK - 3.0 * PI).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_symmetric() {
        assert_eq!(arena::LOWER_LIMIT, -arena::UPPER_LIMIT);
    }
}
