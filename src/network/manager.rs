//! Connection Manager
//!
//! Game-agnostic room bookkeeping. The socket server hands every accepted
//! connection to [`ConnectionManager::connect`] together with an outbound
//! queue, feeds it text frames through [`ConnectionManager::handle_text`]
//! one at a time, and calls [`ConnectionManager::disconnect`] when the
//! socket goes away. Everything persisted goes through the game contract
//! inside one store transaction; this type only owns the runtime
//! connection → context and room → members maps.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::core::error::{ErrorKind, GameError};
use crate::core::identity::Identity;
use crate::game::contract::{ConnectSnapshot, ConnectionContext, GameContract, GameRegistry, RouteResult};
use crate::network::auth::{token_fingerprint, CredentialVerifier};
use crate::network::protocol::{
    close_codes, close_reasons, errors, ClientFrame, CloseReason, Outbound, ServerMessage,
};
use crate::store::{GameId, GameStore, Player};

/// Process-unique connection handle.
pub type ConnectionId = u64;

/// How long a closing socket may take to make room for its final frames.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters of the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeParams {
    pub game_id: GameId,
    pub access_token: String,
}

impl HandshakeParams {
    /// Extract `gameId` and `accessToken` from a percent-encoded query.
    /// Missing, blank or malformed values yield `None`.
    pub fn from_query(query: Option<&str>) -> Option<Self> {
        let mut game_id = None;
        let mut access_token = None;

        for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "gameId" => game_id = Some(value.to_string()),
                "accessToken" => access_token = Some(value.to_string()),
                _ => {}
            }
        }

        Some(Self {
            game_id: GameId::parse(&game_id?)?,
            access_token: access_token?,
        })
    }
}

/// A handshake refusal: one error frame, then a policy close.
struct Rejection {
    message: String,
    close: CloseReason,
}

impl Rejection {
    fn new(message: impl Into<String>, reason: &str) -> Self {
        Self {
            message: message.into(),
            close: CloseReason::new(close_codes::POLICY, reason),
        }
    }
}

/// Contract and context of a connection that passed the handshake.
#[derive(Clone)]
struct Binding {
    contract: Arc<dyn GameContract>,
    context: ConnectionContext,
}

struct ConnectionEntry {
    outbox: mpsc::Sender<Outbound>,
    binding: Option<Binding>,
}

/// Live connections and rooms.
pub struct ConnectionManager {
    store: Arc<dyn GameStore>,
    verifier: Arc<dyn CredentialVerifier>,
    registry: GameRegistry,
    connections: RwLock<BTreeMap<ConnectionId, ConnectionEntry>>,
    rooms: RwLock<BTreeMap<GameId, BTreeSet<ConnectionId>>>,
    next_id: AtomicU64,
    close_timeout: Duration,
}

impl ConnectionManager {
    /// Create a manager over the given collaborators.
    pub fn new(
        store: Arc<dyn GameStore>,
        verifier: Arc<dyn CredentialVerifier>,
        registry: GameRegistry,
    ) -> Self {
        Self {
            store,
            verifier,
            registry,
            connections: RwLock::new(BTreeMap::new()),
            rooms: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Override how long closing sockets may block on a full queue.
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Route table this manager serves.
    pub fn registry(&self) -> &GameRegistry {
        &self.registry
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Register a new socket and run the handshake.
    ///
    /// The connection is always registered. On refusal an error frame and a
    /// close are queued on `outbox` and the connection stays unbound until
    /// [`disconnect`](Self::disconnect).
    pub async fn connect(
        &self,
        path: &str,
        query: Option<&str>,
        outbox: mpsc::Sender<Outbound>,
    ) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(
            id,
            ConnectionEntry {
                outbox: outbox.clone(),
                binding: None,
            },
        );

        if let Err(rejection) = self.handshake(id, path, query, &outbox).await {
            let _ = outbox.send(Outbound::Frame(ServerMessage::error(rejection.message))).await;
            let _ = outbox.send(Outbound::Close(rejection.close)).await;
        }

        id
    }

    async fn handshake(
        &self,
        id: ConnectionId,
        path: &str,
        query: Option<&str>,
        outbox: &mpsc::Sender<Outbound>,
    ) -> Result<(), Rejection> {
        let contract = self.registry.resolve(path).ok_or_else(|| {
            debug!(connection = id, path, "upgrade on unknown route");
            Rejection::new(errors::UNKNOWN_ROUTE, close_reasons::UNKNOWN_ROUTE)
        })?;

        let params = HandshakeParams::from_query(query).ok_or_else(|| {
            debug!(connection = id, "handshake missing gameId or credential");
            Rejection::new(errors::MISSING_PARAMS, close_reasons::INVALID_PARAMS)
        })?;

        let principal = self.verifier.verify(&params.access_token).map_err(|e| {
            warn!(
                connection = id,
                token = %token_fingerprint(&params.access_token),
                error = %e,
                "credential rejected"
            );
            Rejection::new(errors::BAD_CREDENTIAL, close_reasons::UNAUTHORIZED)
        })?;

        let snapshot = self
            .bind(id, &contract, &principal.identity, params.game_id)
            .await
            .map_err(|e| {
                warn!(
                    connection = id,
                    game_id = %params.game_id,
                    identity = %principal.identity,
                    error = %e,
                    "connect refused"
                );
                Rejection::new(e.client_message(), close_reasons::CONNECT_FAILED)
            })?;

        let ctx = snapshot.context();
        let players = snapshot.players.clone();
        info!(
            connection = id,
            game_id = %ctx.game_id,
            player_id = %ctx.player_id,
            identity = %principal.identity,
            role = %principal.role,
            "connection bound"
        );

        let _ = outbox.send(Outbound::Frame(snapshot.into())).await;
        self.broadcast(ctx.game_id, ServerMessage::PlayersUpdate { players }).await;
        Ok(())
    }

    /// Run the connect hook and attach the connection to its room.
    ///
    /// The room entry is added before the transaction commits so a racing
    /// disconnect of the same player, which waits on the game lock held
    /// here, sees the new socket.
    async fn bind(
        &self,
        id: ConnectionId,
        contract: &Arc<dyn GameContract>,
        identity: &Identity,
        game_id: GameId,
    ) -> Result<ConnectSnapshot, GameError> {
        let mut tx = self.store.begin().await?;
        let snapshot = contract.on_connect(tx.as_mut(), identity, game_id).await?;

        self.attach(
            id,
            Binding {
                contract: contract.clone(),
                context: snapshot.context(),
            },
        )
        .await;

        if let Err(e) = tx.commit().await {
            self.detach(id).await;
            return Err(e.into());
        }
        Ok(snapshot)
    }

    async fn attach(&self, id: ConnectionId, binding: Binding) {
        let game_id = binding.context.game_id;
        {
            let mut connections = self.connections.write().await;
            match connections.get_mut(&id) {
                Some(entry) => entry.binding = Some(binding),
                None => return,
            }
        }
        self.rooms.write().await.entry(game_id).or_default().insert(id);
    }

    async fn detach(&self, id: ConnectionId) {
        let binding = {
            let mut connections = self.connections.write().await;
            connections.get_mut(&id).and_then(|entry| entry.binding.take())
        };
        if let Some(binding) = binding {
            self.leave_room(id, binding.context.game_id).await;
        }
    }

    async fn leave_room(&self, id: ConnectionId, game_id: GameId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&game_id) {
            members.remove(&id);
            if members.is_empty() {
                rooms.remove(&game_id);
                debug!(game_id = %game_id, "room emptied");
            }
        }
    }

    /// Forget a socket. When it was the player's last socket in the room the
    /// player is marked disconnected; the remaining members get the roster.
    /// Storage failures here are logged and dropped.
    pub async fn disconnect(&self, id: ConnectionId) {
        let entry = self.connections.write().await.remove(&id);
        let binding = match entry.and_then(|e| e.binding) {
            Some(binding) => binding,
            None => {
                debug!(connection = id, "unbound connection closed");
                return;
            }
        };
        let ctx = binding.context;
        self.leave_room(id, ctx.game_id).await;

        match self.release(&binding).await {
            Ok(players) => {
                info!(connection = id, game_id = %ctx.game_id, player_id = %ctx.player_id, "connection closed");
                self.broadcast(ctx.game_id, ServerMessage::PlayersUpdate { players }).await;
            }
            Err(e) => {
                warn!(connection = id, game_id = %ctx.game_id, error = %e, "disconnect cleanup failed");
            }
        }
    }

    async fn release(&self, binding: &Binding) -> Result<Vec<Player>, GameError> {
        let ctx = binding.context;
        let mut tx = self.store.begin().await?;
        // Take the game's lock before looking for sibling sockets
        tx.get_game_by_id(ctx.game_id).await?;

        if self.player_has_socket(&ctx).await {
            debug!(player_id = %ctx.player_id, "player still has a live socket");
        } else {
            binding.contract.on_disconnect(tx.as_mut(), &ctx).await?;
        }

        let players = tx.list_players_by_game(ctx.game_id).await?;
        tx.commit().await?;
        Ok(players)
    }

    async fn player_has_socket(&self, ctx: &ConnectionContext) -> bool {
        self.connections
            .read()
            .await
            .values()
            .filter_map(|entry| entry.binding.as_ref())
            .any(|b| b.context == *ctx)
    }

    // =========================================================================
    // MESSAGES
    // =========================================================================

    /// Handle one text frame. Callers must not overlap calls for the same
    /// connection.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        let (outbox, binding) = {
            let connections = self.connections.read().await;
            match connections.get(&id) {
                Some(entry) => (entry.outbox.clone(), entry.binding.clone()),
                None => {
                    debug!(connection = id, "frame for unknown connection");
                    return;
                }
            }
        };

        let binding = match binding {
            Some(binding) => binding,
            None => {
                let _ = outbox
                    .send(Outbound::Frame(ServerMessage::error(errors::NOT_INITIALIZED)))
                    .await;
                return;
            }
        };

        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection = id, "malformed frame");
                let _ = outbox.send(Outbound::Frame(ServerMessage::error(e.client_message()))).await;
                return;
            }
        };

        match self.route(&binding, &frame).await {
            Ok(result) => self.apply(&outbox, binding.context.game_id, result).await,
            Err(e) => {
                match e.kind() {
                    ErrorKind::Internal => {
                        warn!(connection = id, kind = %frame.kind, error = %e, "command failed")
                    }
                    _ => debug!(connection = id, kind = %frame.kind, error = %e, "command rejected"),
                }
                let _ = outbox.send(Outbound::Frame(ServerMessage::error(e.client_message()))).await;
            }
        }
    }

    async fn route(&self, binding: &Binding, frame: &ClientFrame) -> Result<RouteResult, GameError> {
        let mut tx = self.store.begin().await?;
        let result = binding
            .contract
            .route_message(tx.as_mut(), &binding.context, frame)
            .await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn apply(&self, outbox: &mpsc::Sender<Outbound>, game_id: GameId, result: RouteResult) {
        if let Some(reply) = result.reply {
            let _ = outbox.send(Outbound::Frame(reply)).await;
        }
        if let Some(message) = result.broadcast {
            self.broadcast(game_id, message).await;
        }
        if result.close_room {
            self.close_room(game_id).await;
        }
    }

    // =========================================================================
    // FAN-OUT
    // =========================================================================

    /// Queue `message` on every connection in the room. A full or closed
    /// queue only loses that member's copy.
    pub async fn broadcast(&self, game_id: GameId, message: ServerMessage) {
        let members = self.room_members(game_id).await;
        if members.is_empty() {
            return;
        }

        let connections = self.connections.read().await;
        for id in members {
            if let Some(entry) = connections.get(&id) {
                if entry.outbox.try_send(Outbound::Frame(message.clone())).is_err() {
                    debug!(connection = id, kind = message.kind(), "broadcast dropped");
                }
            }
        }
    }

    /// Send `game:ended` to every member, close their sockets and drop the
    /// room. Members become unbound, so their later disconnect is a no-op.
    pub async fn close_room(&self, game_id: GameId) {
        let members = match self.rooms.write().await.remove(&game_id) {
            Some(members) => members,
            None => return,
        };

        let targets: Vec<_> = {
            let mut connections = self.connections.write().await;
            members
                .iter()
                .filter_map(|id| {
                    let entry = connections.get_mut(id)?;
                    entry.binding = None;
                    Some((*id, entry.outbox.clone()))
                })
                .collect()
        };

        let last = [
            Outbound::Frame(ServerMessage::GameEnded),
            Outbound::Close(CloseReason::new(close_codes::NORMAL, close_reasons::GAME_ENDED)),
        ];
        self.deliver_last(targets, &last).await;

        info!(game_id = %game_id, members = members.len(), "room closed");
    }

    /// Ask every socket to close with "going away". Returns how many were
    /// asked.
    pub async fn shutdown_all(&self) -> usize {
        let targets: Vec<_> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.outbox.clone()))
            .collect();
        let count = targets.len();

        let last = [Outbound::Close(CloseReason::new(
            close_codes::GOING_AWAY,
            close_reasons::SHUTTING_DOWN,
        ))];
        self.deliver_last(targets, &last).await;
        count
    }

    /// Queue the final items for each target, waiting for queue space up to
    /// the close timeout. A socket that cannot take them is forgotten, which
    /// drops its last sender and ends its writer.
    async fn deliver_last(&self, targets: Vec<(ConnectionId, mpsc::Sender<Outbound>)>, last: &[Outbound]) {
        let timeout = self.close_timeout;
        let outcomes = join_all(targets.into_iter().map(|(id, outbox)| async move {
            for item in last {
                if outbox.send_timeout(item.clone(), timeout).await.is_err() {
                    return Some(id);
                }
            }
            None
        }))
        .await;

        for id in outcomes.into_iter().flatten() {
            warn!(connection = id, "outbound queue stuck, dropping connection");
            self.disconnect(id).await;
        }
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// Registered connections, bound or not.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Members of a room.
    pub async fn room_members(&self, game_id: GameId) -> Vec<ConnectionId> {
        self.rooms
            .read()
            .await
            .get(&game_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Context bound to a connection, if the handshake succeeded.
    pub async fn context(&self, id: ConnectionId) -> Option<ConnectionContext> {
        self.connections
            .read()
            .await
            .get(&id)
            .and_then(|entry| entry.binding.as_ref().map(|b| b.context))
    }
}
