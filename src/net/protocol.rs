//! Wire protocol
//!
//! Clients send colon-delimited text commands (`rotate:1.5707`). The server
//! answers with JSON objects tagged by a `command` field, plus the untagged
//! world frame broadcast every tick.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::game::systems::collision::CollisionEvent;

/// Separator between a command and its arguments
pub const DELIMITER: char = ':';

/// Longest accepted player name, in characters
pub const MAX_NAME_LEN: usize = 16;

/// A parsed inbound command
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Register a named matchmaking candidate with an explicit Elo
    AddPlayer { name: String, elo: f64 },
    JoinGame { key: String },
    LeaveGame { key: String },
    SetPlayerName { name: String },
    /// New heading in radians
    Rotate { angle: f64 },
    /// Queue the caller for matchmaking at the default Elo
    FindGame,
    /// Create a session and join it
    StartGame { key: String },
    Ping,
}

/// Rejected inbound text
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Empty message")]
    Empty,
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
    #[error("Missing argument '{argument}' for {command}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("Invalid number '{value}' for {command}")]
    InvalidNumber { command: &'static str, value: String },
    #[error("Invalid player name")]
    InvalidName,
}

impl FromStr for ClientCommand {
    type Err = ProtocolError;

    fn from_str(message: &str) -> Result<Self, Self::Err> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let mut parts = message.split(DELIMITER);
        let command = parts.next().unwrap_or_default();

        match command {
            "addPlayer" => {
                let name = player_name(required(parts.next(), "addPlayer", "name")?)?;
                let elo = number(required(parts.next(), "addPlayer", "elo")?, "addPlayer")?;
                Ok(ClientCommand::AddPlayer { name, elo })
            }
            "joinGame" => Ok(ClientCommand::JoinGame {
                key: required(parts.next(), "joinGame", "sessionKey")?,
            }),
            "leaveGame" => Ok(ClientCommand::LeaveGame {
                key: required(parts.next(), "leaveGame", "sessionKey")?,
            }),
            "setPlayerName" => Ok(ClientCommand::SetPlayerName {
                name: player_name(required(parts.next(), "setPlayerName", "name")?)?,
            }),
            "rotate" => {
                let raw = required(parts.next(), "rotate", "angle")?;
                Ok(ClientCommand::Rotate {
                    angle: number(raw, "rotate")?,
                })
            }
            "findGame" => Ok(ClientCommand::FindGame),
            "startGame" => Ok(ClientCommand::StartGame {
                key: required(parts.next(), "startGame", "sessionKey")?,
            }),
            "ping" => Ok(ClientCommand::Ping),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

fn required(
    part: Option<&str>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, ProtocolError> {
    match part.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ProtocolError::MissingArgument { command, argument }),
    }
}

/// Strip control and markup characters, collapse whitespace, cap the length
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| *c != '<' && *c != '>' && *c != '&')
        .take(MAX_NAME_LEN)
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn player_name(raw: String) -> Result<String, ProtocolError> {
    let name = sanitize_name(&raw);
    if name.is_empty() {
        return Err(ProtocolError::InvalidName);
    }
    Ok(name)
}

/// Parse a finite float
fn number(raw: String, command: &'static str) -> Result<f64, ProtocolError> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ProtocolError::InvalidNumber { command, value: raw }),
    }
}

/// Outbound JSON payloads other than the world frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ServerMessage {
    /// `name`'s newest segment crossed the trail of `with`
    PlayerCollision { name: String, with: String, time: u64 },
    #[serde(rename_all = "camelCase")]
    MatchFound { match_list: [String; 2], game_key: String },
    PlayerNameSet { name: String },
    Error { message: String },
}

impl From<&CollisionEvent> for ServerMessage {
    fn from(event: &CollisionEvent) -> Self {
        ServerMessage::PlayerCollision {
            name: event.collider.clone(),
            with: event.crossed.clone(),
            time: event.time,
        }
    }
}

/// Literal reply to `ping`
pub const PONG: &str = "pong";

/// Serialize an outbound payload
pub fn encode<T: Serialize>(message: &T) -> Result<String, EncodeError> {
    serde_json::to_string(message).map_err(|e| EncodeError(e.to_string()))
}

/// Deserialize an outbound payload (clients and tests)
pub fn decode<T: for<'de> Deserialize<'de>>(data: &str) -> Result<T, DecodeError> {
    serde_json::from_str(data).map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "addPlayer:alice: 1200".parse::<ClientCommand>(),
            Ok(ClientCommand::AddPlayer { name: "alice".to_string(), elo: 1200.0 })
        );
        assert_eq!(
            "joinGame:alice_bob".parse::<ClientCommand>(),
            Ok(ClientCommand::JoinGame { key: "alice_bob".to_string() })
        );
        assert_eq!(
            "leaveGame:alice_bob".parse::<ClientCommand>(),
            Ok(ClientCommand::LeaveGame { key: "alice_bob".to_string() })
        );
        assert_eq!(
            "setPlayerName:carol".parse::<ClientCommand>(),
            Ok(ClientCommand::SetPlayerName { name: "carol".to_string() })
        );
        assert_eq!("rotate:-1.5".parse::<ClientCommand>(), Ok(ClientCommand::Rotate { angle: -1.5 }));
        assert_eq!("findGame".parse::<ClientCommand>(), Ok(ClientCommand::FindGame));
        assert_eq!(
            "startGame:solo\n".parse::<ClientCommand>(),
            Ok(ClientCommand::StartGame { key: "solo".to_string() })
        );
        assert_eq!("ping".parse::<ClientCommand>(), Ok(ClientCommand::Ping));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<ClientCommand>(), Err(ProtocolError::Empty));
        assert_eq!("  ".parse::<ClientCommand>(), Err(ProtocolError::Empty));
        assert_eq!(
            "fly:1".parse::<ClientCommand>(),
            Err(ProtocolError::UnknownCommand("fly".to_string()))
        );
        assert_eq!(
            "joinGame".parse::<ClientCommand>(),
            Err(ProtocolError::MissingArgument { command: "joinGame", argument: "sessionKey" })
        );
        assert_eq!(
            "startGame:".parse::<ClientCommand>(),
            Err(ProtocolError::MissingArgument { command: "startGame", argument: "sessionKey" })
        );
        assert_eq!(
            "addPlayer:alice".parse::<ClientCommand>(),
            Err(ProtocolError::MissingArgument { command: "addPlayer", argument: "elo" })
        );
    }

    #[test]
    fn test_names_sanitized() {
        assert_eq!(sanitize_name("  al  <b>ice  "), "al bice");
        assert_eq!(sanitize_name("abcdefghijklmnopqrstuvwxyz").chars().count(), MAX_NAME_LEN);
        assert_eq!(
            "setPlayerName:<>&".parse::<ClientCommand>(),
            Err(ProtocolError::InvalidName)
        );
        assert_eq!(
            "setPlayerName: Dr  Who ".parse::<ClientCommand>(),
            Ok(ClientCommand::SetPlayerName { name: "Dr Who".to_string() })
        );
    }

    #[test]
    fn test_rotation_must_be_finite() {
        assert!(matches!(
            "rotate:left".parse::<ClientCommand>(),
            Err(ProtocolError::InvalidNumber { command: "rotate", .. })
        ));
        assert!("rotate:NaN".parse::<ClientCommand>().is_err());
        assert!("rotate:inf".parse::<ClientCommand>().is_err());
    }

    #[test]
    fn test_collision_payload_shape() {
        let event = CollisionEvent {
            collider: "bob".to_string(),
            crossed: "alice".to_string(),
            time: 1_700_000_000_000,
        };
        let json = encode(&ServerMessage::from(&event)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["command"], "playerCollision");
        assert_eq!(value["name"], "bob");
        assert_eq!(value["with"], "alice");
        assert_eq!(value["time"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_match_found_payload_shape() {
        let message = ServerMessage::MatchFound {
            match_list: ["alice".to_string(), "bob".to_string()],
            game_key: "alice_bob".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&encode(&message).unwrap()).unwrap();

        assert_eq!(value["command"], "matchFound");
        assert_eq!(value["matchList"][1], "bob");
        assert_eq!(value["gameKey"], "alice_bob");
    }

    #[test]
    fn test_name_set_and_error_payloads() {
        let json = encode(&ServerMessage::PlayerNameSet { name: "carol".to_string() }).unwrap();
        assert_eq!(json, r#"{"command":"playerNameSet","name":"carol"}"#);

        let decoded: ServerMessage = decode(r#"{"command":"error","message":"nope"}"#).unwrap();
        assert_eq!(decoded, ServerMessage::Error { message: "nope".to_string() });
    }

    #[test]
    fn test_invalid_decode() {
        assert!(decode::<ServerMessage>("{\"command\":\"teleport\"}").is_err());
    }
}
