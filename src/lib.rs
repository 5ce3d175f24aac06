//! Trail Arena Server Library
//!
//! Real-time simulation core for a light-trail arena game: players move at
//! constant speed inside a bounded square, leave a trail of vertices behind
//! them, and are relocated when a trail is crossed.

pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod util;
