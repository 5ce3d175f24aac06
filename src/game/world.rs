//! World: every session plus the connection roster
//!
//! Owned by the scheduler. Connection tasks never touch it directly; they
//! submit [`WorldCommand`]s which are applied here at tick boundaries.

use hashbrown::HashMap;
use rand::Rng;
use tracing::{debug, info};

use crate::game::commands::{CommandOutcome, WorldCommand};
use crate::game::constants::matchmaking::NEW_SESSION_STATE;
use crate::game::state::{ConnectionId, Player, Session, SessionKey};

/// Structural operation failures. Reported to the caller, never fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    #[error("Session '{0}' not found")]
    SessionNotFound(SessionKey),
    #[error("Session '{0}' already exists")]
    SessionExists(SessionKey),
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("Connection {0} already registered")]
    AlreadyConnected(ConnectionId),
    #[error("Player is not in session '{0}'")]
    NotInSession(SessionKey),
    #[error("Player is not in any session")]
    NotPlaying,
    #[error("Name '{0}' is already taken")]
    NameTaken(String),
    #[error("Invalid rotation {0}")]
    InvalidRotation(f64),
}

/// Where a connection's player currently lives
#[derive(Debug)]
struct RosterEntry {
    /// Player name, mirrored here so lookups work in both places
    name: String,
    /// Session holding the player, if any
    session: Option<SessionKey>,
    /// The player while it sits in the lobby (no session)
    parked: Option<Player>,
}

/// All sessions and connected players
#[derive(Debug, Default)]
pub struct World {
    sessions: HashMap<SessionKey, Session>,
    roster: HashMap<ConnectionId, RosterEntry>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one queued command
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        command: WorldCommand,
        rng: &mut R,
    ) -> Result<CommandOutcome, WorldError> {
        match command {
            WorldCommand::Connect { connection, name } => {
                self.connect(connection, name, rng)?;
                Ok(CommandOutcome::Applied)
            }
            WorldCommand::Disconnect { connection } => {
                self.disconnect(connection)?;
                Ok(CommandOutcome::Applied)
            }
            WorldCommand::CreateSession { key, state } => {
                self.create_session(key, state)?;
                Ok(CommandOutcome::Applied)
            }
            WorldCommand::StartSession { connection, key } => {
                self.start_session(connection, key)?;
                Ok(CommandOutcome::Applied)
            }
            WorldCommand::Join { connection, key } => {
                self.join(connection, &key)?;
                Ok(CommandOutcome::Applied)
            }
            WorldCommand::Leave { connection, key } => {
                self.leave(connection, &key)?;
                Ok(CommandOutcome::Applied)
            }
            WorldCommand::Rename { connection, name } => {
                let name = self.rename(connection, name)?;
                Ok(CommandOutcome::Renamed { name })
            }
            WorldCommand::Rotate { connection, angle } => {
                self.rotate(connection, angle)?;
                Ok(CommandOutcome::Applied)
            }
        }
    }

    /// Register a connection with a freshly spawned player in the lobby
    pub fn connect<R: Rng + ?Sized>(
        &mut self,
        connection: ConnectionId,
        name: String,
        rng: &mut R,
    ) -> Result<(), WorldError> {
        if self.roster.contains_key(&connection) {
            return Err(WorldError::AlreadyConnected(connection));
        }

        let player = Player::spawn(name.clone(), rng);
        debug!("Connection {} spawned as {} at ({}, {})", connection, name, player.x, player.z);
        self.roster.insert(
            connection,
            RosterEntry {
                name,
                session: None,
                parked: Some(player),
            },
        );
        Ok(())
    }

    /// Forget a connection, removing its player from any session.
    ///
    /// Returns the session it was removed from.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Result<Option<SessionKey>, WorldError> {
        let entry = self
            .roster
            .remove(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;

        if let Some(key) = &entry.session {
            self.remove_from_session(key, &entry.name);
        }
        info!("{} disconnected", entry.name);
        Ok(entry.session)
    }

    /// Create an empty session
    pub fn create_session(&mut self, key: SessionKey, state: String) -> Result<(), WorldError> {
        if self.sessions.contains_key(&key) {
            return Err(WorldError::SessionExists(key));
        }
        info!("Session {} created ({})", key, state);
        self.sessions.insert(key.clone(), Session::new(key, state));
        Ok(())
    }

    /// Create a session (or reuse an existing one with that key) and join it
    pub fn start_session(&mut self, connection: ConnectionId, key: SessionKey) -> Result<(), WorldError> {
        if !self.roster.contains_key(&connection) {
            return Err(WorldError::UnknownConnection(connection));
        }
        if !self.sessions.contains_key(&key) {
            self.create_session(key.clone(), NEW_SESSION_STATE.to_string())?;
        }
        self.join(connection, &key)
    }

    /// Move a connection's player into a session, leaving its current one
    pub fn join(&mut self, connection: ConnectionId, key: &str) -> Result<(), WorldError> {
        let entry = self
            .roster
            .get(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;

        if entry.session.as_deref() == Some(key) {
            return Ok(());
        }

        let target = self
            .sessions
            .get(key)
            .ok_or_else(|| WorldError::SessionNotFound(key.to_string()))?;
        if target.players.contains_key(&entry.name) {
            return Err(WorldError::NameTaken(entry.name.clone()));
        }

        let player = self.take_player(connection)?;
        let name = player.name.clone();
        if let Some(session) = self.sessions.get_mut(key) {
            session.players.insert(name.clone(), player);
        }
        if let Some(entry) = self.roster.get_mut(&connection) {
            entry.session = Some(key.to_string());
        }

        info!("{} joined session {}", name, key);
        Ok(())
    }

    /// Move a connection's player out of `key` back into the lobby.
    /// The session is deleted once its last player leaves.
    pub fn leave(&mut self, connection: ConnectionId, key: &str) -> Result<(), WorldError> {
        let entry = self
            .roster
            .get(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;

        if entry.session.as_deref() != Some(key) {
            if !self.sessions.contains_key(key) {
                return Err(WorldError::SessionNotFound(key.to_string()));
            }
            return Err(WorldError::NotInSession(key.to_string()));
        }

        let player = self.take_player(connection)?;
        if let Some(entry) = self.roster.get_mut(&connection) {
            info!("{} left session {}", entry.name, key);
            entry.parked = Some(player);
        }
        Ok(())
    }

    /// Rename a connection's player, re-keying it inside its session.
    ///
    /// Returns the new name.
    pub fn rename(&mut self, connection: ConnectionId, name: String) -> Result<String, WorldError> {
        let entry = self
            .roster
            .get_mut(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;

        if entry.name == name {
            return Ok(name);
        }

        match &entry.session {
            Some(key) => {
                let session = self
                    .sessions
                    .get_mut(key)
                    .ok_or_else(|| WorldError::SessionNotFound(key.clone()))?;
                if session.players.contains_key(&name) {
                    return Err(WorldError::NameTaken(name));
                }
                if let Some(mut player) = session.players.remove(&entry.name) {
                    player.name = name.clone();
                    session.players.insert(name.clone(), player);
                }
            }
            None => {
                if let Some(player) = entry.parked.as_mut() {
                    player.name = name.clone();
                }
            }
        }

        debug!("{} renamed to {}", entry.name, name);
        entry.name = name.clone();
        Ok(name)
    }

    /// Set the heading of a connection's player. Only players in a session
    /// can steer.
    pub fn rotate(&mut self, connection: ConnectionId, angle: f64) -> Result<(), WorldError> {
        if !angle.is_finite() {
            return Err(WorldError::InvalidRotation(angle));
        }

        let entry = self
            .roster
            .get(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;
        let key = entry.session.as_ref().ok_or(WorldError::NotPlaying)?;

        let player = self
            .sessions
            .get_mut(key)
            .and_then(|session| session.get_player_mut(&entry.name))
            .ok_or_else(|| WorldError::NotInSession(key.clone()))?;
        player.rotation = angle;
        Ok(())
    }

    /// Serialize every session as the per-tick world frame
    pub fn frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.sessions)
    }

    pub fn sessions(&self) -> &HashMap<SessionKey, Session> {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut HashMap<SessionKey, Session> {
        &mut self.sessions
    }

    pub fn session(&self, key: &str) -> Option<&Session> {
        self.sessions.get(key)
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Players currently inside a session
    pub fn active_player_count(&self) -> usize {
        self.sessions.values().map(Session::player_count).sum()
    }

    #[inline]
    pub fn connection_count(&self) -> usize {
        self.roster.len()
    }

    /// Current name of a connection's player
    pub fn player_name(&self, connection: ConnectionId) -> Option<&str> {
        self.roster.get(&connection).map(|entry| entry.name.as_str())
    }

    /// Session holding a connection's player
    pub fn session_of(&self, connection: ConnectionId) -> Option<&str> {
        self.roster
            .get(&connection)
            .and_then(|entry| entry.session.as_deref())
    }

    /// Look up a connection's player wherever it lives
    pub fn player(&self, connection: ConnectionId) -> Option<&Player> {
        let entry = self.roster.get(&connection)?;
        match &entry.session {
            Some(key) => self.sessions.get(key)?.get_player(&entry.name),
            None => entry.parked.as_ref(),
        }
    }

    /// Detach a connection's player from wherever it lives
    fn take_player(&mut self, connection: ConnectionId) -> Result<Player, WorldError> {
        let entry = self
            .roster
            .get_mut(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;

        if let Some(player) = entry.parked.take() {
            return Ok(player);
        }

        let key = entry.session.take().ok_or(WorldError::NotPlaying)?;
        let name = entry.name.clone();
        let player = self
            .sessions
            .get_mut(&key)
            .and_then(|session| session.players.remove(&name))
            .ok_or_else(|| WorldError::NotInSession(key.clone()))?;

        if self.sessions.get(&key).is_some_and(Session::is_empty) {
            self.sessions.remove(&key);
            info!("Session {} removed (empty)", key);
        }
        Ok(player)
    }

    fn remove_from_session(&mut self, key: &str, name: &str) {
        if let Some(session) = self.sessions.get_mut(key) {
            session.players.remove(name);
            if session.is_empty() {
                self.sessions.remove(key);
                info!("Session {} removed (empty)", key);
            }
        }
    }
}
