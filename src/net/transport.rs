//! Newline-delimited TCP transport
//!
//! Each line from a client is one text command. Each line to a client is a
//! JSON payload: world frames and collision events from the broadcast
//! fan-out, plus replies addressed to that connection only.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use hashbrown::HashSet;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::commands::{CommandOutcome, CommandQueueError, CommandSender, WorldCommand};
use crate::game::constants::matchmaking::DEFAULT_ELO;
use crate::game::state::ConnectionId;
use crate::lobby::match_builder::MatchNotifier;
use crate::lobby::matchmaker::Matchmaker;
use crate::metrics::Metrics;
use crate::net::broadcast::ChannelBroadcaster;
use crate::net::protocol::{encode, ClientCommand, ServerMessage, PONG};

/// Replies queued per connection before new ones are dropped
const OUTBOUND_CAPACITY: usize = 64;

/// Longest accepted command line in bytes
const MAX_LINE_LEN: usize = 1024;

/// Handles shared by every connection
#[derive(Clone)]
pub struct ServerContext {
    pub commands: CommandSender,
    pub broadcaster: ChannelBroadcaster,
    pub matchmaker: Arc<dyn Matchmaker>,
    pub notifier: Arc<MatchNotifier>,
    pub metrics: Arc<Metrics>,
}

/// Accept connections until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    context: ServerContext,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("Transport listening on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                };

                let context = context.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, context).await {
                        warn!("Connection {} error: {}", peer, e);
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Transport stopped");
    Ok(())
}

/// Per-connection state owned by the read loop
struct Connection {
    id: ConnectionId,
    name: String,
    context: ServerContext,
    outbound: mpsc::Sender<Arc<str>>,
    match_wait: Option<JoinHandle<()>>,
    /// Every name this connection put in the matchmaking queue
    queued: HashSet<String>,
}

/// One read from a client
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line(String),
    /// Longer than `MAX_LINE_LEN`; the rest of it was discarded
    TooLong,
    /// Not valid UTF-8
    Invalid,
    Eof,
}

/// Read one newline-terminated line, never buffering more than
/// `MAX_LINE_LEN + 1` bytes of it
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_LINE_LEN as u64 + 1;

    buf.clear();
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }

    let terminated = buf.last() == Some(&b'\n');
    if !terminated && read > MAX_LINE_LEN {
        loop {
            buf.clear();
            let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
            if read == 0 || buf.last() == Some(&b'\n') {
                break;
            }
        }
        return Ok(LineRead::TooLong);
    }

    if terminated {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    match std::str::from_utf8(buf) {
        Ok(line) => Ok(LineRead::Line(line.to_string())),
        Err(_) => Ok(LineRead::Invalid),
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: ServerContext,
) -> anyhow::Result<()> {
    let id = Uuid::new_v4();
    let name = id.to_string();
    let (reader, writer) = stream.into_split();

    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_loop(writer, outbound_rx, context.broadcaster.subscribe()));

    context
        .commands
        .request(WorldCommand::Connect {
            connection: id,
            name: name.clone(),
        })
        .await??;
    info!("Connection {} from {}", id, peer);

    let mut connection = Connection {
        id,
        name,
        context,
        outbound,
        match_wait: None,
        queued: HashSet::new(),
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(MAX_LINE_LEN);
    let result = loop {
        let line = match read_line(&mut reader, &mut buf).await {
            Ok(LineRead::Line(line)) => line,
            Ok(LineRead::TooLong) => {
                warn!("Dropping line over {} bytes from {}", MAX_LINE_LEN, id);
                continue;
            }
            Ok(LineRead::Invalid) => {
                debug!("Dropping non UTF-8 line from {}", id);
                continue;
            }
            Ok(LineRead::Eof) => break Ok(()),
            Err(e) => break Err(e.into()),
        };

        match line.parse::<ClientCommand>() {
            Ok(command) => connection.handle(command).await,
            Err(e) => {
                debug!("Rejected input from {}: {}", id, e);
                connection.reply(&ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        }
    };

    connection.close().await;
    drop(connection);
    if let Err(e) = writer_task.await {
        debug!("Writer task for {} ended abnormally: {}", id, e);
    }
    result
}

impl Connection {
    async fn handle(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Ping => self.send(Arc::from(PONG)),
            ClientCommand::JoinGame { key } => {
                self.submit(WorldCommand::Join { connection: self.id, key }).await;
            }
            ClientCommand::LeaveGame { key } => {
                self.submit(WorldCommand::Leave { connection: self.id, key }).await;
            }
            ClientCommand::StartGame { key } => {
                self.submit(WorldCommand::StartSession { connection: self.id, key }).await;
            }
            ClientCommand::Rotate { angle } => {
                self.submit(WorldCommand::Rotate { connection: self.id, angle }).await;
            }
            ClientCommand::SetPlayerName { name } => {
                let rename = WorldCommand::Rename {
                    connection: self.id,
                    name,
                };
                if let Some(CommandOutcome::Renamed { name }) = self.submit(rename).await {
                    self.name = name.clone();
                    self.reply(&ServerMessage::PlayerNameSet { name });
                }
            }
            ClientCommand::FindGame => {
                let name = self.name.clone();
                self.queue_for_match(&name, DEFAULT_ELO);
            }
            ClientCommand::AddPlayer { name, elo } => {
                self.queue_for_match(&name, elo);
            }
        }
    }

    /// Apply a world command and report failures to the client
    async fn submit(&self, command: WorldCommand) -> Option<CommandOutcome> {
        match self.context.commands.request(command).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                self.reply(&ServerMessage::Error {
                    message: e.to_string(),
                });
                None
            }
            Err(e) => {
                self.count_rejected(&e);
                warn!("Command queue unavailable for {}: {}", self.id, e);
                self.reply(&ServerMessage::Error {
                    message: e.to_string(),
                });
                None
            }
        }
    }

    /// Enqueue `name` and forward its match notification to this client
    fn queue_for_match(&mut self, name: &str, elo: f64) {
        info!("{} looking for a match (elo {})", name, elo);
        let found = self.context.notifier.register(name);
        self.context.matchmaker.enqueue(name, elo);
        self.queued.insert(name.to_string());

        let outbound = self.outbound.clone();
        let previous = self.match_wait.replace(tokio::spawn(async move {
            let Ok(found) = found.await else {
                return;
            };
            match encode(&found.to_message()) {
                Ok(payload) => {
                    let _ = outbound.send(Arc::from(payload)).await;
                }
                Err(e) => warn!("Failed to encode match notification: {}", e),
            }
        }));
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn count_rejected(&self, error: &CommandQueueError) {
        if matches!(error, CommandQueueError::Full) {
            self.context.metrics.commands_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn reply(&self, message: &ServerMessage) {
        match encode(message) {
            Ok(payload) => self.send(Arc::from(payload)),
            Err(e) => warn!("Failed to encode reply: {}", e),
        }
    }

    fn send(&self, payload: Arc<str>) {
        if self.outbound.try_send(payload).is_err() {
            debug!("Outbound queue full for {}, dropping reply", self.id);
        }
    }

    /// Leave matchmaking and the world
    async fn close(&mut self) {
        if let Some(wait) = self.match_wait.take() {
            wait.abort();
        }
        self.queued.insert(self.name.clone());
        for name in self.queued.drain() {
            self.context.matchmaker.cancel(&name);
            self.context.notifier.cancel(&name);
        }

        let disconnect = WorldCommand::Disconnect { connection: self.id };
        if let Err(e) = self.context.commands.try_send(disconnect) {
            self.count_rejected(&e);
            warn!("Could not queue disconnect for {}: {}", self.id, e);
        }
        info!("Connection {} closed", self.id);
    }
}

/// Forward replies and broadcast payloads to the socket, one per line
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Arc<str>>,
    mut broadcasts: broadcast::Receiver<Arc<str>>,
) {
    loop {
        let payload = tokio::select! {
            reply = outbound.recv() => match reply {
                Some(payload) => payload,
                None => break,
            },
            frame = broadcasts.recv() => match frame {
                Ok(payload) => payload,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Client lagged, skipped {} broadcasts", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        if writer.write_all(payload.as_bytes()).await.is_err()
            || writer.write_all(b"\n").await.is_err()
        {
            break;
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, BufReader, Lines};
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::time::timeout;

    use crate::game::commands::CommandBuffer;
    use crate::game::scheduler::Scheduler;
    use crate::game::systems::collision::ResetPolicy;
    use crate::lobby::match_builder::MatchBuilder;
    use crate::lobby::matchmaker::EloQueue;
    use crate::metrics::Metrics;

    struct Harness {
        addr: SocketAddr,
        context: ServerContext,
        metrics: Arc<Metrics>,
        shutdown: watch::Sender<bool>,
    }

    async fn start() -> Harness {
        let metrics = Arc::new(Metrics::new());
        let broadcaster = ChannelBroadcaster::new(256);
        let scheduler = Scheduler::new(
            CommandBuffer::new(256),
            Arc::new(broadcaster.clone()),
            metrics.clone(),
            ResetPolicy::default(),
        );
        let context = ServerContext {
            commands: scheduler.command_sender(),
            broadcaster,
            matchmaker: Arc::new(EloQueue::new(100.0, Duration::from_secs(10))),
            notifier: Arc::new(MatchNotifier::new()),
            metrics: metrics.clone(),
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        scheduler.spawn(Duration::from_millis(5), shutdown_rx.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, context.clone(), shutdown_rx));

        Harness {
            addr,
            context,
            metrics,
            shutdown,
        }
    }

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, writer) = stream.into_split();
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
        }

        /// Read lines until one satisfies `predicate`
        async fn wait_for<F: Fn(&str) -> bool>(&mut self, predicate: F) -> String {
            timeout(Duration::from_secs(5), async {
                loop {
                    let line = self.lines.next_line().await.unwrap().unwrap();
                    if predicate(&line) {
                        return line;
                    }
                }
            })
            .await
            .expect("timed out waiting for line")
        }
    }

    #[tokio::test]
    async fn test_read_line_limits_length() {
        let oversized = "x".repeat(MAX_LINE_LEN * 3);
        let input = format!("ping\r\n{}\nfindGame\ntail", oversized);
        let mut reader = input.as_bytes();
        let mut buf = Vec::new();

        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), LineRead::Line("ping".to_string()));
        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), LineRead::TooLong);
        assert!(buf.capacity() <= MAX_LINE_LEN * 2);
        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), LineRead::Line("findGame".to_string()));
        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), LineRead::Line("tail".to_string()));
        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn test_read_line_exact_limit_and_invalid_utf8() {
        let exact = "y".repeat(MAX_LINE_LEN);
        let mut input = format!("{}\n", exact).into_bytes();
        input.extend_from_slice(&[0xff, 0xfe, b'\n']);
        let mut reader = input.as_slice();
        let mut buf = Vec::new();

        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), LineRead::Line(exact));
        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), LineRead::Invalid);
        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_oversized_line_dropped_connection_survives() {
        let harness = start().await;
        let mut client = Client::connect(harness.addr).await;

        let flood = "a".repeat(MAX_LINE_LEN * 8);
        client.writer.write_all(flood.as_bytes()).await.unwrap();
        client.send("").await;
        client.send("ping").await;
        assert_eq!(client.wait_for(|line| line == PONG).await, PONG);
        harness.shutdown.send(true).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_cancels_every_queued_name() {
        let harness = start().await;
        let mut client = Client::connect(harness.addr).await;

        client.send("addPlayer:ghost:100").await;
        client.send("findGame").await;
        client.send("ping").await;
        client.wait_for(|line| line == PONG).await;
        assert_eq!(harness.context.matchmaker.pending_count(), 2);
        assert_eq!(harness.context.notifier.waiting_count(), 2);

        drop(client);
        timeout(Duration::from_secs(5), async {
            while harness.context.matchmaker.pending_count() > 0
                || harness.context.notifier.waiting_count() > 0
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queued names still pending after disconnect");
        harness.shutdown.send(true).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ping_pong() {
        let harness = start().await;
        let mut client = Client::connect(harness.addr).await;

        client.send("ping").await;
        assert_eq!(client.wait_for(|line| line == PONG).await, PONG);
        harness.shutdown.send(true).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_input_reports_error() {
        let harness = start().await;
        let mut client = Client::connect(harness.addr).await;

        client.send("rotate:sideways").await;
        let line = client.wait_for(|line| line.contains("\"error\"")).await;
        assert!(line.contains("rotate"));

        client.send("joinGame:nowhere").await;
        let line = client.wait_for(|line| line.contains("\"error\"")).await;
        assert!(line.contains("nowhere"));
        harness.shutdown.send(true).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_game_rename_and_frames() {
        let harness = start().await;
        let mut client = Client::connect(harness.addr).await;

        client.send("setPlayerName:alice").await;
        let ack = client.wait_for(|line| line.contains("playerNameSet")).await;
        assert_eq!(ack, r#"{"command":"playerNameSet","name":"alice"}"#);

        client.send("startGame:solo").await;
        let frame = client.wait_for(|line| line.contains("\"solo\"")).await;
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["solo"]["Players"]["alice"]["Name"], "alice");

        client.send("rotate:1.5").await;
        client
            .wait_for(|line| line.contains("\"Rotation\":1.5"))
            .await;
        harness.shutdown.send(true).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_find_game_notifies_both_players() {
        let harness = start().await;
        let mut alice = Client::connect(harness.addr).await;
        let mut bob = Client::connect(harness.addr).await;

        alice.send("setPlayerName:alice").await;
        alice.wait_for(|line| line.contains("playerNameSet")).await;
        bob.send("setPlayerName:bob").await;
        bob.wait_for(|line| line.contains("playerNameSet")).await;

        alice.send("findGame").await;
        bob.send("findGame").await;

        // Wait for both to be queued, then run one match-building round
        timeout(Duration::from_secs(5), async {
            while harness.context.matchmaker.pending_count() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let builder = MatchBuilder::new(
            harness.context.matchmaker.clone(),
            harness.context.notifier.clone(),
            harness.context.commands.clone(),
            harness.metrics.clone(),
        );
        let formed = builder.build_matches().await;
        assert_eq!(formed.len(), 1);

        let key = formed[0].game_key.clone();
        let alice_line = alice.wait_for(|line| line.contains("matchFound")).await;
        let bob_line = bob.wait_for(|line| line.contains("matchFound")).await;
        assert!(alice_line.contains(&key));
        assert!(bob_line.contains(&key));

        alice.send(&format!("joinGame:{}", key)).await;
        bob.send(&format!("joinGame:{}", key)).await;
        bob.wait_for(|line| line.contains("\"alice\"") && line.contains("\"bob\"")).await;
        harness.shutdown.send(true).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_removes_player() {
        let harness = start().await;
        let mut alice = Client::connect(harness.addr).await;
        let mut watcher = Client::connect(harness.addr).await;

        alice.send("setPlayerName:alice").await;
        alice.wait_for(|line| line.contains("playerNameSet")).await;
        watcher.send("setPlayerName:watcher").await;
        watcher.wait_for(|line| line.contains("playerNameSet")).await;

        alice.send("startGame:room").await;
        watcher.send("startGame:room").await;
        watcher.wait_for(|line| line.contains("\"alice\"")).await;

        drop(alice);
        watcher
            .wait_for(|line| line.contains("\"room\"") && !line.contains("\"alice\""))
            .await;
        harness.shutdown.send(true).unwrap();
    }
}
