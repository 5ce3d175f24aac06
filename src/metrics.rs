//! Prometheus-compatible metrics endpoint
//!
//! Exposes simulation counters in Prometheus text format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Samples kept for tick-time percentiles
const TICK_HISTORY_LEN: usize = 1000;

/// Metrics registry for the arena server
#[derive(Debug)]
pub struct Metrics {
    // World
    pub sessions_active: AtomicU64,
    pub players_active: AtomicU64,
    pub connections_active: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Simulation
    pub collisions_total: AtomicU64,
    pub resets_total: AtomicU64,

    // Command queue
    pub commands_applied: AtomicU64,
    pub commands_failed: AtomicU64,
    pub commands_rejected: AtomicU64,

    // Broadcast
    pub frames_published: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub frame_bytes: AtomicU64,

    // Matchmaking
    pub matches_formed: AtomicU64,
    pub matchmaking_queue: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_active: AtomicU64::new(0),
            players_active: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            collisions_total: AtomicU64::new(0),
            resets_total: AtomicU64::new(0),
            commands_applied: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            frame_bytes: AtomicU64::new(0),
            matches_formed: AtomicU64::new(0),
            matchmaking_queue: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY_LEN)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY_LEN {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let last = sorted.len() - 1;
            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(last)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(last)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted[last], Ordering::Relaxed);
        }
    }

    /// Snapshot world sizes after a tick
    pub fn record_world(&self, sessions: usize, players: usize, connections: usize) {
        self.sessions_active.store(sessions as u64, Ordering::Relaxed);
        self.players_active.store(players as u64, Ordering::Relaxed);
        self.connections_active.store(connections as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("trail_arena_sessions", "Active sessions", "gauge",
            self.sessions_active.load(Ordering::Relaxed));
        metric!("trail_arena_players", "Players inside a session", "gauge",
            self.players_active.load(Ordering::Relaxed));
        metric!("trail_arena_connections_active", "Connected clients", "gauge",
            self.connections_active.load(Ordering::Relaxed));

        metric!("trail_arena_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("trail_arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("trail_arena_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("trail_arena_tick_time_max_microseconds", "Maximum tick time in the window", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("trail_arena_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("trail_arena_collisions_total", "Trail crossings detected", "counter",
            self.collisions_total.load(Ordering::Relaxed));
        metric!("trail_arena_resets_total", "Players sent back to spawn", "counter",
            self.resets_total.load(Ordering::Relaxed));

        metric!("trail_arena_commands_applied_total", "World commands applied", "counter",
            self.commands_applied.load(Ordering::Relaxed));
        metric!("trail_arena_commands_failed_total", "World commands that returned an error", "counter",
            self.commands_failed.load(Ordering::Relaxed));
        metric!("trail_arena_commands_rejected_total", "Commands dropped by a full queue", "counter",
            self.commands_rejected.load(Ordering::Relaxed));

        metric!("trail_arena_frames_published_total", "World frames broadcast", "counter",
            self.frames_published.load(Ordering::Relaxed));
        metric!("trail_arena_frames_skipped_total", "Empty world frames not broadcast", "counter",
            self.frames_skipped.load(Ordering::Relaxed));
        metric!("trail_arena_frame_bytes", "Size of the last world frame", "gauge",
            self.frame_bytes.load(Ordering::Relaxed));

        metric!("trail_arena_matches_formed_total", "Matches formed", "counter",
            self.matches_formed.load(Ordering::Relaxed));
        metric!("trail_arena_matchmaking_queue", "Players waiting for a match", "gauge",
            self.matchmaking_queue.load(Ordering::Relaxed));

        metric!("trail_arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON view of the same counters
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "world": {
                "sessions": self.sessions_active.load(Ordering::Relaxed),
                "players": self.players_active.load(Ordering::Relaxed),
                "connections": self.connections_active.load(Ordering::Relaxed),
            },
            "performance": {
                "tick_time_us": self.tick_time_us.load(Ordering::Relaxed),
                "tick_time_p95_us": self.tick_time_p95_us.load(Ordering::Relaxed),
                "tick_time_p99_us": self.tick_time_p99_us.load(Ordering::Relaxed),
                "tick_time_max_us": self.tick_time_max_us.load(Ordering::Relaxed),
                "tick_count": self.tick_count.load(Ordering::Relaxed),
            },
            "simulation": {
                "collisions": self.collisions_total.load(Ordering::Relaxed),
                "resets": self.resets_total.load(Ordering::Relaxed),
                "frames_published": self.frames_published.load(Ordering::Relaxed),
                "frames_skipped": self.frames_skipped.load(Ordering::Relaxed),
            },
            "matchmaking": {
                "matches": self.matches_formed.load(Ordering::Relaxed),
                "queue": self.matchmaking_queue.load(Ordering::Relaxed),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, bind_address: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", bind_address, port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = render_response(&metrics, &request);

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

fn render_response(metrics: &Metrics, request: &str) -> String {
    let (content_type, body) = if request.starts_with("GET /metrics/json") {
        ("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        ("text/plain", "OK".to_string())
    } else {
        return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
    };

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}
