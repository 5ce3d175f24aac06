use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trail_arena_server::config::ServerConfig;
use trail_arena_server::game::commands::CommandBuffer;
use trail_arena_server::game::scheduler::Scheduler;
use trail_arena_server::lobby::match_builder::{MatchBuilder, MatchNotifier};
use trail_arena_server::lobby::matchmaker::{EloQueue, Matchmaker};
use trail_arena_server::metrics::{self, Metrics};
use trail_arena_server::net::broadcast::ChannelBroadcaster;
use trail_arena_server::net::transport::{self, ServerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Trail Arena Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ServerConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: {}:{}, tick={}ms, match={}ms, reset={:?}",
        config.bind_address, config.port, config.tick_interval_ms, config.match_interval_ms, config.reset_policy
    );

    // Initialize metrics
    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_bind = config.bind_address.to_string();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, &metrics_bind, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Simulation
    let broadcaster = ChannelBroadcaster::new(config.broadcast_capacity);
    let scheduler = Scheduler::new(
        CommandBuffer::new(config.command_queue_capacity),
        Arc::new(broadcaster.clone()),
        metrics.clone(),
        config.reset_policy,
    );
    let commands = scheduler.command_sender();
    let simulation = scheduler.spawn(config.tick_interval(), shutdown_rx.clone());

    // Matchmaking
    let matchmaker: Arc<dyn Matchmaker> =
        Arc::new(EloQueue::new(config.elo_threshold, config.recent_match_cooldown()));
    let notifier = Arc::new(MatchNotifier::new());
    let match_builder = MatchBuilder::new(matchmaker.clone(), notifier.clone(), commands.clone(), metrics.clone())
        .spawn(config.match_interval(), shutdown_rx.clone());

    // Transport
    let listener = TcpListener::bind((config.bind_address, config.port)).await?;
    let context = ServerContext {
        commands,
        broadcaster,
        matchmaker,
        notifier,
        metrics,
    };
    let server = tokio::spawn(transport::serve(listener, context, shutdown_rx));

    info!("Server ready on tcp://{}:{}", config.bind_address, config.port);

    // Shutdown signal handler
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }

    info!("Shutting down...");
    shutdown_tx.send(true)?;

    if let Err(e) = simulation.await {
        error!("Simulation task failed: {}", e);
    }
    if let Err(e) = match_builder.await {
        error!("Match builder task failed: {}", e);
    }
    match server.await {
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("Server stopped");
    Ok(())
}
