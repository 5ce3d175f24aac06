use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::{matchmaking, timing};
use crate::game::systems::collision::ResetPolicy;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the game and metrics listeners to
    pub bind_address: IpAddr,
    /// Game transport port
    pub port: u16,
    /// Metrics endpoint port
    pub metrics_port: u16,
    /// Simulation tick period
    pub tick_interval_ms: u64,
    /// Match-building period
    pub match_interval_ms: u64,
    /// Maximum Elo difference for a match
    pub elo_threshold: f64,
    /// Seconds before two players can be paired again
    pub recent_match_cooldown_secs: u64,
    /// Who is relocated on a trail crossing
    pub reset_policy: ResetPolicy,
    /// Bound of the world command queue
    pub command_queue_capacity: usize,
    /// Frames buffered per broadcast subscriber before it lags
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            metrics_port: 9090,
            tick_interval_ms: timing::TICK_INTERVAL_MS,
            match_interval_ms: timing::MATCH_INTERVAL_MS,
            elo_threshold: matchmaking::ELO_THRESHOLD,
            recent_match_cooldown_secs: matchmaking::RECENT_MATCH_COOLDOWN_SECS,
            reset_policy: ResetPolicy::default(),
            command_queue_capacity: 1024,
            broadcast_capacity: 256,
        }
    }
}

/// Invalid configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} cannot be 0")]
    Zero(&'static str),
    #[error("port and metrics_port must differ (both {0})")]
    PortClash(u16),
    #[error("elo_threshold must be a non-negative number, got {0}")]
    EloThreshold(f64),
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load config through `lookup`, warning about and skipping invalid values
    pub fn load_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_with(&lookup, "BIND_ADDRESS", &mut config.bind_address, |_| true);
        override_with(&lookup, "PORT", &mut config.port, |p| *p > 0);
        override_with(&lookup, "METRICS_PORT", &mut config.metrics_port, |p| *p > 0);
        override_with(&lookup, "TICK_INTERVAL_MS", &mut config.tick_interval_ms, |v| *v > 0);
        override_with(&lookup, "MATCH_INTERVAL_MS", &mut config.match_interval_ms, |v| *v > 0);
        override_with(&lookup, "ELO_THRESHOLD", &mut config.elo_threshold, |v| {
            v.is_finite() && *v >= 0.0
        });
        override_with(
            &lookup,
            "RECENT_MATCH_COOLDOWN_SECS",
            &mut config.recent_match_cooldown_secs,
            |_| true,
        );
        override_with(&lookup, "RESET_POLICY", &mut config.reset_policy, |_| true);
        override_with(
            &lookup,
            "COMMAND_QUEUE_CAPACITY",
            &mut config.command_queue_capacity,
            |v| *v > 0 && *v <= 1_000_000,
        );
        override_with(&lookup, "BROADCAST_CAPACITY", &mut config.broadcast_capacity, |v| {
            *v > 0 && *v <= 65_536
        });

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Zero("port"));
        }
        if self.metrics_port == self.port {
            return Err(ConfigError::PortClash(self.port));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Zero("tick_interval_ms"));
        }
        if self.match_interval_ms == 0 {
            return Err(ConfigError::Zero("match_interval_ms"));
        }
        if self.command_queue_capacity == 0 {
            return Err(ConfigError::Zero("command_queue_capacity"));
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Zero("broadcast_capacity"));
        }
        if !self.elo_threshold.is_finite() || self.elo_threshold < 0.0 {
            return Err(ConfigError::EloThreshold(self.elo_threshold));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn match_interval(&self) -> Duration {
        Duration::from_millis(self.match_interval_ms)
    }

    pub fn recent_match_cooldown(&self) -> Duration {
        Duration::from_secs(self.recent_match_cooldown_secs)
    }
}

/// Replace `slot` with the parsed variable when it parses and passes `accept`
fn override_with<F, T, A>(lookup: &F, key: &str, slot: &mut T, accept: A)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    A: Fn(&T) -> bool,
{
    let Some(raw) = lookup(key) else {
        return;
    };

    match raw.trim().parse::<T>() {
        Ok(parsed) if accept(&parsed) => *slot = parsed,
        Ok(_) => tracing::warn!("{} value '{}' out of range, using default", key, raw),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
    }
}
