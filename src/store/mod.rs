//! Game State Store
//!
//! The narrow repository seam the session layer consumes. Every unit of work
//! (one join, one connect, one client message) opens a transaction with
//! [`GameStore::begin`], performs its reads and writes through [`StoreTx`],
//! and calls [`StoreTx::commit`]. Dropping a transaction without committing
//! rolls it back, so a failed handler never leaves partial state visible.

pub mod memory;
pub mod model;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::identity::Identity;

pub use memory::MemoryStore;
pub use model::{
    Game, GameId, GameStateRecord, GameStatus, NewGame, NewPlayer, Player, PlayerColor, PlayerId,
};

/// Repository errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Referenced row does not exist.
    #[error("{entity} not found")]
    NotFound {
        /// Kind of row.
        entity: &'static str,
    },

    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Constraint name.
        constraint: &'static str,
    },

    /// Conditional state write lost a race.
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// Version the caller read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Status change violates the forward-only lifecycle.
    #[error("illegal status transition {from} -> {to}")]
    IllegalStatusTransition {
        /// Current status.
        from: &'static str,
        /// Requested status.
        to: &'static str,
    },

    /// Underlying engine failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Constraint names reported in [`StoreError::UniqueViolation`].
pub mod constraints {
    /// `game.join_code` is unique.
    pub const GAME_JOIN_CODE: &str = "game_join_code_key";
    /// One player per `(game, identity)`.
    pub const PLAYER_IDENTITY: &str = "player_game_identity_key";
    /// One player per `(game, seat)`.
    pub const PLAYER_SEAT: &str = "player_game_seat_key";
}

/// Transaction factory.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Open a transaction. Dropping it without [`StoreTx::commit`] rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// Operations available inside one transaction.
#[async_trait]
pub trait StoreTx: Send {
    // === Games ===

    /// Look up a game by id.
    async fn get_game_by_id(&mut self, id: GameId) -> Result<Option<Game>, StoreError>;

    /// Look up a game by join code.
    async fn get_game_by_join_code(&mut self, join_code: &str) -> Result<Option<Game>, StoreError>;

    /// Insert a lobby. Fails with `UniqueViolation` on a join-code collision.
    async fn create_lobby(&mut self, new_game: NewGame) -> Result<Game, StoreError>;

    /// Games in `lobby` status, newest first.
    async fn list_lobbies(&mut self, limit: usize) -> Result<Vec<Game>, StoreError>;

    /// Move a game along its lifecycle, stamping start/finish times.
    async fn set_game_status(&mut self, id: GameId, status: GameStatus) -> Result<Game, StoreError>;

    // === Players ===

    /// All players of a game, ordered by seat.
    async fn list_players_by_game(&mut self, game_id: GameId) -> Result<Vec<Player>, StoreError>;

    /// The player bound to `identity` in `game_id`, if any.
    async fn get_player_by_identity(
        &mut self,
        game_id: GameId,
        identity: &Identity,
    ) -> Result<Option<Player>, StoreError>;

    /// Look up a player by id.
    async fn get_player(&mut self, id: PlayerId) -> Result<Option<Player>, StoreError>;

    /// Insert a seat. New players start not ready and disconnected.
    async fn add_player(&mut self, new_player: NewPlayer) -> Result<Player, StoreError>;

    /// Update a player's ready flag.
    async fn set_player_ready(&mut self, id: PlayerId, is_ready: bool) -> Result<Player, StoreError>;

    /// Update a player's connected flag.
    async fn set_player_connected(&mut self, id: PlayerId, is_connected: bool) -> Result<(), StoreError>;

    /// Update the connected flag of every player in a game.
    async fn set_players_connected_by_game(
        &mut self,
        game_id: GameId,
        is_connected: bool,
    ) -> Result<(), StoreError>;

    // === Game state ===

    /// Current state row of a game.
    async fn get_game_state(&mut self, game_id: GameId) -> Result<Option<GameStateRecord>, StoreError>;

    /// Insert (version 0) or replace (version + 1) the state payload.
    ///
    /// With `expected_version`, the write only applies when the stored
    /// version still matches, failing with `VersionConflict` otherwise.
    async fn upsert_game_state(
        &mut self,
        game_id: GameId,
        state: Value,
        expected_version: Option<u64>,
    ) -> Result<GameStateRecord, StoreError>;

    // === Lifecycle ===

    /// Make every write of this transaction visible.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
