//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON object tagged by its `type` field.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::GameError;
use crate::game::contract::ConnectSnapshot;
use crate::store::{Game, GameStateRecord, Player, PlayerId};

// =============================================================================
// CLIENT -> SERVER FRAMES
// =============================================================================

/// A parsed but not yet interpreted client frame.
///
/// The connection manager only needs `type` to be present; each game
/// contract decodes the rest against its own vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFrame {
    /// Value of the `type` field.
    pub kind: String,
    /// The whole frame, `type` included.
    pub body: Value,
}

impl ClientFrame {
    /// Parse raw socket text.
    pub fn parse(text: &str) -> Result<Self, GameError> {
        let value: Value = serde_json::from_str(text).map_err(|_| invalid_message())?;
        Self::from_value(value)
    }

    /// Wrap an already-parsed JSON value.
    pub fn from_value(body: Value) -> Result<Self, GameError> {
        let kind = body
            .as_object()
            .and_then(|map| map.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(invalid_message)?
            .to_string();
        Ok(Self { kind, body })
    }

    /// Decode the frame into a typed command.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, GameError> {
        T::deserialize(&self.body).map_err(|_| invalid_message())
    }
}

fn invalid_message() -> GameError {
    GameError::InvalidMessage(errors::INVALID_MESSAGE.to_string())
}

// =============================================================================
// SERVER -> CLIENT FRAMES
// =============================================================================

/// The connecting player's own handle inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct You {
    pub player_id: PlayerId,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Full view sent once after a successful connect.
    #[serde(rename = "snapshot")]
    Snapshot {
        game: Game,
        players: Vec<Player>,
        state: GameStateRecord,
        phase: String,
        you: You,
    },

    /// Roster changed.
    #[serde(rename = "players:update")]
    PlayersUpdate { players: Vec<Player> },

    /// Phase advanced.
    #[serde(rename = "phase:update")]
    PhaseUpdate {
        phase: String,
        state: GameStateRecord,
        players: Vec<Player>,
    },

    /// Reply to `ping`.
    #[serde(rename = "pong")]
    Pong,

    /// Sent right before the room is closed.
    #[serde(rename = "game:ended")]
    GameEnded,

    /// A rejected command or handshake.
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    /// Error frame with the given text.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Wire type name.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Snapshot { .. } => "snapshot",
            ServerMessage::PlayersUpdate { .. } => "players:update",
            ServerMessage::PhaseUpdate { .. } => "phase:update",
            ServerMessage::Pong => "pong",
            ServerMessage::GameEnded => "game:ended",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl From<ConnectSnapshot> for ServerMessage {
    fn from(snapshot: ConnectSnapshot) -> Self {
        ServerMessage::Snapshot {
            you: You {
                player_id: snapshot.player.id,
            },
            game: snapshot.game,
            players: snapshot.players,
            state: snapshot.state,
            phase: snapshot.phase,
        }
    }
}

// =============================================================================
// OUTBOUND QUEUE
// =============================================================================

/// A close frame to send before dropping the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Item on a connection's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// JSON frame.
    Frame(ServerMessage),
    /// Close the socket; nothing after this is delivered.
    Close(CloseReason),
}

/// WebSocket close codes used by the server.
pub mod close_codes {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Server going away.
    pub const GOING_AWAY: u16 = 1001;
    /// Policy violation: bad handshake, unknown route.
    pub const POLICY: u16 = 1008;
}

/// Close reasons.
pub mod close_reasons {
    pub const INVALID_PARAMS: &str = "invalid params";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const UNKNOWN_ROUTE: &str = "unknown route";
    pub const CONNECT_FAILED: &str = "connect failed";
    pub const GAME_ENDED: &str = "game ended";
    pub const SHUTTING_DOWN: &str = "server shutting down";
}

/// Error frame texts.
pub mod errors {
    pub const MISSING_PARAMS: &str = "Missing gameId or credential";
    pub const BAD_CREDENTIAL: &str = "Invalid or expired credential";
    pub const UNKNOWN_ROUTE: &str = "Unknown game route";
    pub const NOT_INITIALIZED: &str = "Not initialized";
    pub const INVALID_MESSAGE: &str = "Invalid message";
}
