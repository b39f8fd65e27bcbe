//! Persisted Records
//!
//! Row types owned by the game store. Serialized camelCase because they are
//! shipped to clients verbatim inside snapshot and update frames.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::identity::{Identity, UserId};

// =============================================================================
// IDS
// =============================================================================

/// Unique game identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub Uuid);

impl GameId {
    /// Fresh random id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a UUID string.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique player (seat holder) identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Fresh random id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// GAME
// =============================================================================

/// Persisted game lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Accepting joins.
    Lobby,
    /// Match in progress.
    Running,
    /// Match completed normally.
    Finished,
    /// Match dropped before completion.
    Abandoned,
}

impl GameStatus {
    /// Whether no further status change is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Finished | GameStatus::Abandoned)
    }

    /// Forward-only lifecycle: lobby → running → {finished | abandoned}.
    ///
    /// Setting the current status again is accepted as a no-op for
    /// non-terminal states.
    pub fn can_transition_to(self, next: GameStatus) -> bool {
        use GameStatus::*;
        match (self, next) {
            (Lobby, Lobby) | (Running, Running) => true,
            (Lobby, Running) => true,
            (Lobby, Abandoned) => true,
            (Running, Finished) | (Running, Abandoned) => true,
            _ => false,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Lobby => "lobby",
            GameStatus::Running => "running",
            GameStatus::Finished => "finished",
            GameStatus::Abandoned => "abandoned",
        }
    }
}

/// A game (lobby or match).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub join_code: String,
    pub name: Option<String>,
    pub status: GameStatus,
    pub max_players: u32,
    pub created_by_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub seed: Option<i64>,
    pub config: Value,
}

/// Insert parameters for a new lobby.
#[derive(Clone, Debug)]
pub struct NewGame {
    pub join_code: String,
    pub name: Option<String>,
    pub max_players: u32,
    pub created_by_user_id: Option<UserId>,
    pub seed: Option<i64>,
    pub config: Value,
}

// =============================================================================
// PLAYER
// =============================================================================

/// Seat colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerColor {
    Red,
    Blue,
    White,
    Orange,
    Green,
    Brown,
}

/// A seat in a game, bound to one identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub game_id: GameId,
    pub identity: Identity,
    /// 1-based, dense and unique within the game.
    pub seat: u32,
    pub color: Option<PlayerColor>,
    pub display_name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub is_connected: bool,
    pub victory_points: u32,
    pub played_knights: u32,
    pub longest_road_length: u32,
    pub largest_army: bool,
    pub longest_road: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert parameters for a new seat.
#[derive(Clone, Debug)]
pub struct NewPlayer {
    pub game_id: GameId,
    pub identity: Identity,
    pub seat: u32,
    pub color: Option<PlayerColor>,
    pub display_name: String,
    pub is_host: bool,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Versioned, opaque game state payload (1:1 with a game).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateRecord {
    pub game_id: GameId,
    /// Starts at 0; bumped by exactly one on every upsert.
    pub version: u64,
    /// Structured payload; always carries `phase`.
    pub state: Value,
    pub updated_at: DateTime<Utc>,
}
