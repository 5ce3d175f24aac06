//! Lock-free world command queue
//!
//! Connection handlers and the match builder submit structural changes
//! (join, leave, rename, rotate...) through a crossbeam channel. The scheduler
//! drains it at the start of each tick, so the world only changes between
//! ticks and never while a session is being simulated.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tokio::sync::oneshot;

use crate::game::state::{ConnectionId, SessionKey};
use crate::game::world::WorldError;

/// A structural change to the world
#[derive(Debug, Clone, PartialEq)]
pub enum WorldCommand {
    /// Register a connection and spawn its player in the lobby
    Connect { connection: ConnectionId, name: String },
    /// Drop a connection and its player
    Disconnect { connection: ConnectionId },
    /// Create an empty session
    CreateSession { key: SessionKey, state: String },
    /// Create a session if needed and join it
    StartSession { connection: ConnectionId, key: SessionKey },
    Join { connection: ConnectionId, key: SessionKey },
    Leave { connection: ConnectionId, key: SessionKey },
    Rename { connection: ConnectionId, name: String },
    Rotate { connection: ConnectionId, angle: f64 },
}

impl WorldCommand {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            WorldCommand::Connect { .. } => "connect",
            WorldCommand::Disconnect { .. } => "disconnect",
            WorldCommand::CreateSession { .. } => "create_session",
            WorldCommand::StartSession { .. } => "start_session",
            WorldCommand::Join { .. } => "join",
            WorldCommand::Leave { .. } => "leave",
            WorldCommand::Rename { .. } => "rename",
            WorldCommand::Rotate { .. } => "rotate",
        }
    }
}

/// Successful result of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    Renamed { name: String },
}

pub type CommandResult = Result<CommandOutcome, WorldError>;

/// A queued command with an optional reply channel
#[derive(Debug)]
pub struct CommandMessage {
    pub command: WorldCommand,
    pub reply: Option<oneshot::Sender<CommandResult>>,
}

/// Bounded MPSC queue of world commands
///
/// Senders never block; a full queue is reported as backpressure.
pub struct CommandBuffer {
    sender: Sender<CommandMessage>,
    receiver: Receiver<CommandMessage>,
}

impl CommandBuffer {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Create a sender handle. Each producer holds its own clone.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Take every command queued so far
    pub fn drain(&self) -> Vec<CommandMessage> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Clonable producer handle
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<CommandMessage>,
}

impl CommandSender {
    /// Queue a command without waiting for its outcome
    #[inline]
    pub fn try_send(&self, command: WorldCommand) -> Result<(), CommandQueueError> {
        self.push(CommandMessage {
            command,
            reply: None,
        })
    }

    /// Queue a command and wait until the scheduler has applied it
    pub async fn request(&self, command: WorldCommand) -> Result<CommandResult, CommandQueueError> {
        let (tx, rx) = oneshot::channel();
        self.push(CommandMessage {
            command,
            reply: Some(tx),
        })?;
        rx.await.map_err(|_| CommandQueueError::Disconnected)
    }

    fn push(&self, message: CommandMessage) -> Result<(), CommandQueueError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => CommandQueueError::Full,
            TrySendError::Disconnected(_) => CommandQueueError::Disconnected,
        })
    }
}

/// Command queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandQueueError {
    /// Queue is full (backpressure)
    #[error("command queue is full")]
    Full,
    /// Scheduler stopped
    #[error("command queue disconnected")]
    Disconnected,
}
