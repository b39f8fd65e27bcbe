//! Lobby / Join Orchestration
//!
//! Creates lobbies with unique join codes, lists open lobbies, and seats
//! identities into games. Joining is idempotent per identity so a dropped
//! client can rejoin without taking a second seat.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::error::GameError;
use crate::core::identity::Identity;
use crate::core::join_code::{self, time_derived_code, JOIN_CODE_LENGTH};
use crate::game::catan::phase;
use crate::game::contract::GameKind;
use crate::store::{constraints, Game, GameId, GameStore, NewGame, NewPlayer, Player, StoreError, StoreTx};

/// Lobby tuning.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// `maxPlayers` when the creator does not pick one.
    pub default_max_players: u32,
    /// Join code length.
    pub join_code_length: usize,
    /// Join-code allocation attempts before giving up.
    pub allocation_attempts: u32,
    /// Upper bound on `list_lobbies`.
    pub max_list_limit: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            default_max_players: 4,
            join_code_length: JOIN_CODE_LENGTH,
            allocation_attempts: 5,
            max_list_limit: 50,
        }
    }
}

/// Smallest allowed `maxPlayers`.
pub const MIN_MAX_PLAYERS: u32 = 2;

/// Produces a join-code candidate for attempt `n`.
pub type CodeSource = Arc<dyn Fn(u32) -> String + Send + Sync>;

/// How a join request names its game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    GameId(GameId),
    JoinCode(String),
    /// Both supplied; the id wins when it resolves.
    Either { game_id: GameId, join_code: String },
}

/// A join request.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub target: JoinTarget,
    pub identity: Identity,
    pub display_name: Option<String>,
}

/// Where the client should open its live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    /// WebSocket path of the game's room server.
    pub path: String,
    /// Value for the `gameId` query parameter.
    pub game_id: GameId,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub game: Game,
    pub player: Player,
    pub connection: ConnectionParams,
    /// False when an existing seat was returned.
    pub created: bool,
}

/// Lobby orchestration over a [`GameStore`].
#[derive(Clone)]
pub struct LobbyService {
    store: Arc<dyn GameStore>,
    kind: GameKind,
    config: LobbyConfig,
    code_source: CodeSource,
}

impl fmt::Debug for LobbyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LobbyService")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LobbyService {
    /// Catan lobbies with default settings.
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self::with_config(store, GameKind::Catan, LobbyConfig::default())
    }

    /// Lobbies of `kind` with explicit settings.
    pub fn with_config(store: Arc<dyn GameStore>, kind: GameKind, config: LobbyConfig) -> Self {
        let length = config.join_code_length;
        Self {
            store,
            kind,
            config,
            code_source: Arc::new(move |attempt| time_derived_code(attempt, length)),
        }
    }

    /// Replace the join-code generator.
    pub fn with_code_source(mut self, code_source: CodeSource) -> Self {
        self.code_source = code_source;
        self
    }

    /// Open lobbies, newest first, at most `limit` (capped at `max_list_limit`).
    pub async fn list_lobbies(&self, limit: usize) -> Result<Vec<Game>, GameError> {
        let limit = limit.min(self.config.max_list_limit);
        let mut tx = self.store.begin().await?;
        let games = tx.list_lobbies(limit).await?;
        tx.commit().await?;
        Ok(games)
    }

    /// Create a lobby with a freshly allocated join code.
    pub async fn create_lobby(
        &self,
        name: Option<String>,
        max_players: Option<u32>,
        creator: Option<&Identity>,
    ) -> Result<Game, GameError> {
        let max_players = max_players.unwrap_or(self.config.default_max_players);
        if max_players < MIN_MAX_PLAYERS {
            return Err(GameError::InvalidMessage(format!(
                "maxPlayers must be at least {}",
                MIN_MAX_PLAYERS
            )));
        }
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let created_by_user_id = creator.and_then(Identity::user_id);

        for attempt in 0..self.config.allocation_attempts {
            let join_code = (self.code_source)(attempt);

            let mut tx = self.store.begin().await?;
            let result = tx
                .create_lobby(NewGame {
                    join_code: join_code.clone(),
                    name: name.clone(),
                    max_players,
                    created_by_user_id,
                    seed: None,
                    config: Value::Object(Default::default()),
                })
                .await;

            match result {
                Ok(game) => {
                    tx.commit().await?;
                    info!(
                        game_id = %game.id,
                        join_code = %game.join_code,
                        max_players,
                        "lobby created"
                    );
                    return Ok(game);
                }
                Err(StoreError::UniqueViolation { constraint })
                    if constraint == constraints::GAME_JOIN_CODE =>
                {
                    debug!(attempt, join_code = %join_code, "join code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts = self.config.allocation_attempts, "join code allocation exhausted");
        Err(GameError::AllocationExhausted {
            attempts: self.config.allocation_attempts,
        })
    }

    /// Seat `identity` in the target game, or return its existing seat.
    pub async fn join_lobby(&self, request: JoinRequest) -> Result<JoinOutcome, GameError> {
        let mut tx = self.store.begin().await?;

        let game = match &request.target {
            JoinTarget::GameId(id) => tx.get_game_by_id(*id).await?,
            JoinTarget::JoinCode(code) => self.find_by_code(tx.as_mut(), code).await?,
            JoinTarget::Either { game_id, join_code: code } => match tx.get_game_by_id(*game_id).await? {
                Some(game) => Some(game),
                None => self.find_by_code(tx.as_mut(), code).await?,
            },
        }
        .ok_or_else(|| GameError::NotFound("Game not found".to_string()))?;

        let connection = ConnectionParams {
            path: self.kind.route().to_string(),
            game_id: game.id,
        };

        if let Some(player) = tx.get_player_by_identity(game.id, &request.identity).await? {
            phase::ensure_state(tx.as_mut(), game.id).await?;
            tx.commit().await?;
            debug!(game_id = %game.id, player_id = %player.id, "rejoin returned existing seat");
            return Ok(JoinOutcome {
                game,
                player,
                connection,
                created: false,
            });
        }

        let players = tx.list_players_by_game(game.id).await?;
        if players.len() as u32 >= game.max_players {
            return Err(GameError::Conflict("Lobby is full".to_string()));
        }

        let seat = players.iter().map(|p| p.seat).max().unwrap_or(0) + 1;
        let display_name = request
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| request.identity.default_display_name());

        let player = tx
            .add_player(NewPlayer {
                game_id: game.id,
                identity: request.identity,
                seat,
                color: None,
                display_name,
                is_host: players.is_empty(),
            })
            .await?;

        phase::ensure_state(tx.as_mut(), game.id).await?;
        tx.commit().await?;

        info!(
            game_id = %game.id,
            player_id = %player.id,
            seat,
            is_host = player.is_host,
            "player joined"
        );

        Ok(JoinOutcome {
            game,
            player,
            connection,
            created: true,
        })
    }

    /// Resolve user-entered join code input. Input that cannot be a code
    /// never reaches the store.
    async fn find_by_code(&self, tx: &mut dyn StoreTx, input: &str) -> Result<Option<Game>, GameError> {
        let code = join_code::normalize(input);
        if !join_code::is_well_formed(&code, self.config.join_code_length) {
            debug!(input_len = input.len(), "malformed join code");
            return Ok(None);
        }
        Ok(tx.get_game_by_join_code(&code).await?)
    }
}
