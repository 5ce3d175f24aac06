//! Matchmaking
//!
//! Players wait in an Elo queue; the match builder periodically pairs them,
//! creates a session for each pair and notifies both players.

pub mod match_builder;
pub mod matchmaker;
