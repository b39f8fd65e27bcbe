//! Game Contract
//!
//! The interface every game type implements so one connection manager can
//! host them all. A contract owns its command vocabulary and legality rules;
//! the manager owns sockets, rooms and fan-out.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::error::GameError;
use crate::core::identity::Identity;
use crate::game::catan::CatanGame;
use crate::network::protocol::{ClientFrame, ServerMessage};
use crate::store::{Game, GameId, GameStateRecord, Player, PlayerId, StoreTx};

/// Binding of a live connection to a seat, established by the connect hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionContext {
    /// Game the connection belongs to.
    pub game_id: GameId,
    /// Seat the connection speaks for.
    pub player_id: PlayerId,
}

/// Everything a freshly connected client needs to render the game.
#[derive(Clone, Debug)]
pub struct ConnectSnapshot {
    /// The game row.
    pub game: Game,
    /// Full roster, ordered by seat.
    pub players: Vec<Player>,
    /// Current state row.
    pub state: GameStateRecord,
    /// Current phase name.
    pub phase: String,
    /// The connecting player.
    pub player: Player,
}

impl ConnectSnapshot {
    /// Context to bind to the connection.
    pub fn context(&self) -> ConnectionContext {
        ConnectionContext {
            game_id: self.game.id,
            player_id: self.player.id,
        }
    }
}

/// Outcome of routing one client command.
#[derive(Clone, Debug, Default)]
pub struct RouteResult {
    /// Sent only to the originating connection.
    pub reply: Option<ServerMessage>,
    /// Sent to every connection in the room.
    pub broadcast: Option<ServerMessage>,
    /// End the room after delivery: `game:ended`, then close every socket.
    pub close_room: bool,
}

impl RouteResult {
    /// Direct reply only.
    pub fn reply(message: ServerMessage) -> Self {
        Self {
            reply: Some(message),
            ..Default::default()
        }
    }

    /// Room-wide broadcast only.
    pub fn broadcast(message: ServerMessage) -> Self {
        Self {
            broadcast: Some(message),
            ..Default::default()
        }
    }

    /// Mark the room for closure.
    pub fn closing_room(mut self, close: bool) -> Self {
        self.close_room = close;
        self
    }
}

/// Per-game-type session hooks.
///
/// Every hook runs inside the caller's transaction; the caller commits on
/// `Ok` and rolls back on `Err`.
#[async_trait]
pub trait GameContract: Send + Sync {
    /// Which game this contract implements.
    fn kind(&self) -> GameKind;

    /// Locate the identity's seat, mark it connected and build a snapshot.
    ///
    /// Fails `NotFound` for an unknown game and `Forbidden` when the identity
    /// never joined.
    async fn on_connect(
        &self,
        tx: &mut dyn StoreTx,
        identity: &Identity,
        game_id: GameId,
    ) -> Result<ConnectSnapshot, GameError>;

    /// Mark the seat disconnected. Never deletes the player or touches game
    /// status.
    async fn on_disconnect(&self, tx: &mut dyn StoreTx, ctx: &ConnectionContext) -> Result<(), GameError>;

    /// Validate and apply one client command.
    async fn route_message(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &ConnectionContext,
        frame: &ClientFrame,
    ) -> Result<RouteResult, GameError>;
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Closed set of hosted game types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GameKind {
    /// Settlers of Catan.
    Catan,
}

impl GameKind {
    /// Every hosted kind.
    pub const ALL: [GameKind; 1] = [GameKind::Catan];

    /// WebSocket path the kind is served on.
    pub fn route(self) -> &'static str {
        match self {
            GameKind::Catan => "/ws/catan",
        }
    }

    /// Construct the kind's contract.
    pub fn create(self) -> Arc<dyn GameContract> {
        match self {
            GameKind::Catan => Arc::new(CatanGame::new()),
        }
    }
}

/// Static path → contract table, built once at startup.
#[derive(Clone, Default)]
pub struct GameRegistry {
    routes: BTreeMap<String, Arc<dyn GameContract>>,
}

impl GameRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every [`GameKind`] on its default route.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for kind in GameKind::ALL {
            registry.register(kind.route(), kind.create());
        }
        registry
    }

    /// Serve `contract` on `path`, replacing any previous registration.
    pub fn register(&mut self, path: impl Into<String>, contract: Arc<dyn GameContract>) {
        self.routes.insert(path.into(), contract);
    }

    /// Contract for an upgrade path, ignoring a trailing slash.
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn GameContract>> {
        let trimmed = if path.len() > 1 { path.trim_end_matches('/') } else { path };
        self.routes.get(trimmed).cloned()
    }

    /// Registered paths.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}
