//! Catan Session Contract
//!
//! Command vocabulary and connect/disconnect hooks for Catan rooms. The
//! phase rules themselves live in [`phase`].

pub mod phase;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::core::error::GameError;
use crate::core::identity::Identity;
use crate::game::contract::{ConnectSnapshot, ConnectionContext, GameContract, GameKind, RouteResult};
use crate::network::protocol::{ClientFrame, ServerMessage};
use crate::store::{GameId, StoreTx};

pub use phase::{Advance, Phase};

/// Commands a Catan client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum CatanCommand {
    /// Liveness check.
    #[serde(rename = "ping")]
    Ping,

    /// Toggle the sender's ready flag.
    #[serde(rename = "player:setReady")]
    SetReady {
        /// New flag value.
        #[serde(rename = "isReady", default)]
        is_ready: bool,
    },

    /// Host asks for the next phase.
    #[serde(rename = "game:advancePhase")]
    AdvancePhase,
}

impl CatanCommand {
    /// Frame types this vocabulary understands.
    pub const TYPES: [&'static str; 3] = ["ping", "player:setReady", "game:advancePhase"];

    /// Decode a frame. `Ok(None)` means the type is not part of the
    /// vocabulary; a known type with bad fields is `InvalidMessage`.
    pub fn decode(frame: &ClientFrame) -> Result<Option<CatanCommand>, GameError> {
        if !Self::TYPES.contains(&frame.kind.as_str()) {
            return Ok(None);
        }
        frame.decode().map(Some)
    }
}

/// Catan implementation of [`GameContract`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CatanGame;

impl CatanGame {
    /// Create the contract.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GameContract for CatanGame {
    fn kind(&self) -> GameKind {
        GameKind::Catan
    }

    async fn on_connect(
        &self,
        tx: &mut dyn StoreTx,
        identity: &Identity,
        game_id: GameId,
    ) -> Result<ConnectSnapshot, GameError> {
        let game = tx
            .get_game_by_id(game_id)
            .await?
            .ok_or_else(|| GameError::NotFound("Game not found".to_string()))?;

        let player = tx
            .get_player_by_identity(game.id, identity)
            .await?
            .ok_or_else(|| {
                GameError::Forbidden("Player not found in game (join first)".to_string())
            })?;

        tx.set_player_connected(player.id, true).await?;
        let state = phase::ensure_state(tx, game.id).await?;
        let players = tx.list_players_by_game(game.id).await?;

        // Re-read our own row so the snapshot reflects is_connected
        let player = players
            .iter()
            .find(|p| p.id == player.id)
            .cloned()
            .unwrap_or(player);

        debug!(game_id = %game.id, player_id = %player.id, seat = player.seat, "player connected");

        Ok(ConnectSnapshot {
            phase: Phase::from_state(&state.state).as_str().to_string(),
            game,
            players,
            state,
            player,
        })
    }

    async fn on_disconnect(&self, tx: &mut dyn StoreTx, ctx: &ConnectionContext) -> Result<(), GameError> {
        tx.set_player_connected(ctx.player_id, false).await?;
        debug!(game_id = %ctx.game_id, player_id = %ctx.player_id, "player disconnected");
        Ok(())
    }

    async fn route_message(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &ConnectionContext,
        frame: &ClientFrame,
    ) -> Result<RouteResult, GameError> {
        let command = match CatanCommand::decode(frame)? {
            Some(command) => command,
            None => {
                return Ok(RouteResult::reply(ServerMessage::error("Unknown message")));
            }
        };

        match command {
            CatanCommand::Ping => Ok(RouteResult::reply(ServerMessage::Pong)),

            CatanCommand::SetReady { is_ready } => {
                let players = phase::set_ready(tx, ctx, is_ready).await?;
                Ok(RouteResult::broadcast(ServerMessage::PlayersUpdate { players }))
            }

            CatanCommand::AdvancePhase => {
                let Advance {
                    phase,
                    state,
                    players,
                    close_room,
                } = phase::advance(tx, ctx).await?;

                Ok(RouteResult::broadcast(ServerMessage::PhaseUpdate {
                    phase: phase.as_str().to_string(),
                    state,
                    players,
                })
                .closing_room(close_room))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::identity::{SessionId, UserId};
    use crate::game::lobby::{JoinRequest, JoinTarget, LobbyService};
    use crate::store::{GameStatus, GameStore, MemoryStore, Player};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Table {
        store: Arc<MemoryStore>,
        lobby: LobbyService,
        game_id: GameId,
    }

    impl Table {
        async fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let lobby = LobbyService::new(store.clone());
            let game = lobby.create_lobby(Some("Test".into()), Some(4), None).await.unwrap();
            Self { store, lobby, game_id: game.id }
        }

        async fn seat(&self, identity: Identity) -> ConnectionContext {
            let joined = self
                .lobby
                .join_lobby(JoinRequest {
                    target: JoinTarget::GameId(self.game_id),
                    identity,
                    display_name: None,
                })
                .await
                .unwrap();
            ConnectionContext { game_id: self.game_id, player_id: joined.player.id }
        }

        async fn route(&self, ctx: &ConnectionContext, frame: serde_json::Value) -> Result<RouteResult, GameError> {
            let frame = ClientFrame::from_value(frame).unwrap();
            let mut tx = self.store.begin().await.unwrap();
            let result = CatanGame::new().route_message(tx.as_mut(), ctx, &frame).await;
            if result.is_ok() {
                tx.commit().await.unwrap();
            }
            result
        }

        async fn version(&self) -> u64 {
            let mut tx = self.store.begin().await.unwrap();
            tx.get_game_state(self.game_id).await.unwrap().unwrap().version
        }

        async fn status(&self) -> GameStatus {
            let mut tx = self.store.begin().await.unwrap();
            tx.get_game_by_id(self.game_id).await.unwrap().unwrap().status
        }

        async fn players(&self) -> Vec<Player> {
            let mut tx = self.store.begin().await.unwrap();
            tx.list_players_by_game(self.game_id).await.unwrap()
        }
    }

    fn guest() -> Identity {
        Identity::Session(SessionId(Uuid::new_v4()))
    }

    fn user() -> Identity {
        Identity::User(UserId(Uuid::new_v4()))
    }

    fn phase_of(result: &RouteResult) -> String {
        match &result.broadcast {
            Some(ServerMessage::PhaseUpdate { phase, .. }) => phase.clone(),
            other => panic!("expected phase update, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_vocabulary() {
        let ready = ClientFrame::from_value(json!({"type": "player:setReady", "isReady": true})).unwrap();
        assert_eq!(
            CatanCommand::decode(&ready).unwrap(),
            Some(CatanCommand::SetReady { is_ready: true })
        );

        let bogus = ClientFrame::from_value(json!({"type": "bogus"})).unwrap();
        assert_eq!(CatanCommand::decode(&bogus).unwrap(), None);

        let bad = ClientFrame::from_value(json!({"type": "player:setReady", "isReady": "yes"})).unwrap();
        assert_eq!(CatanCommand::decode(&bad).unwrap_err().kind(), ErrorKind::InvalidMessage);
    }

    #[tokio::test]
    async fn test_connect_requires_join() {
        let table = Table::new().await;
        let mut tx = table.store.begin().await.unwrap();

        let err = CatanGame::new()
            .on_connect(tx.as_mut(), &guest(), table.game_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = CatanGame::new()
            .on_connect(tx.as_mut(), &guest(), GameId::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_connect_marks_connected_and_snapshots() {
        let table = Table::new().await;
        let who = guest();
        let ctx = table.seat(who).await;

        let mut tx = table.store.begin().await.unwrap();
        let snapshot = CatanGame::new()
            .on_connect(tx.as_mut(), &who, table.game_id)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(snapshot.context(), ctx);
        assert_eq!(snapshot.phase, "lobby");
        assert!(snapshot.player.is_connected);
        assert_eq!(snapshot.players.len(), 1);

        let mut tx = table.store.begin().await.unwrap();
        CatanGame::new().on_disconnect(tx.as_mut(), &ctx).await.unwrap();
        tx.commit().await.unwrap();

        let players = table.players().await;
        assert!(!players[0].is_connected);
        assert_eq!(table.status().await, GameStatus::Lobby);
    }

    #[tokio::test]
    async fn test_ping_has_no_side_effects() {
        let table = Table::new().await;
        let ctx = table.seat(guest()).await;
        let before = table.version().await;

        let result = table.route(&ctx, json!({"type": "ping"})).await.unwrap();
        assert!(matches!(result.reply, Some(ServerMessage::Pong)));
        assert!(result.broadcast.is_none());
        assert_eq!(table.version().await, before);
    }

    #[tokio::test]
    async fn test_unknown_message_replies_error() {
        let table = Table::new().await;
        let ctx = table.seat(guest()).await;

        let result = table.route(&ctx, json!({"type": "bogus"})).await.unwrap();
        match result.reply {
            Some(ServerMessage::Error { message }) => assert_eq!(message, "Unknown message"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_ready_broadcasts_and_bumps_version() {
        let table = Table::new().await;
        let ctx = table.seat(guest()).await;
        let before = table.version().await;

        let result = table
            .route(&ctx, json!({"type": "player:setReady", "isReady": true}))
            .await
            .unwrap();

        match result.broadcast {
            Some(ServerMessage::PlayersUpdate { players }) => assert!(players[0].is_ready),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(table.version().await, before + 1);
    }

    #[tokio::test]
    async fn test_advance_needs_two_ready_players() {
        let table = Table::new().await;
        let host = table.seat(guest()).await;

        table.route(&host, json!({"type": "player:setReady", "isReady": true})).await.unwrap();
        let before = table.version().await;

        let err = table.route(&host, json!({"type": "game:advancePhase"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert_eq!(err.client_message(), "All players must be ready");

        let other = table.seat(user()).await;
        let err = table.route(&host, json!({"type": "game:advancePhase"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        assert_eq!(table.status().await, GameStatus::Lobby);
        assert_eq!(table.version().await, before);

        table.route(&other, json!({"type": "player:setReady", "isReady": true})).await.unwrap();
        let result = table.route(&host, json!({"type": "game:advancePhase"})).await.unwrap();
        assert_eq!(phase_of(&result), "starting");
        assert_eq!(table.status().await, GameStatus::Running);
    }

    #[tokio::test]
    async fn test_non_host_cannot_advance() {
        let table = Table::new().await;
        let host = table.seat(guest()).await;
        let other = table.seat(user()).await;
        for ctx in [&host, &other] {
            table.route(ctx, json!({"type": "player:setReady", "isReady": true})).await.unwrap();
        }
        let before = table.version().await;

        let err = table.route(&other, json!({"type": "game:advancePhase"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(table.version().await, before);
        assert_eq!(table.status().await, GameStatus::Lobby);
    }

    #[tokio::test]
    async fn test_full_run_to_end_is_monotonic() {
        let table = Table::new().await;
        let host = table.seat(guest()).await;
        let other = table.seat(user()).await;
        for ctx in [&host, &other] {
            table.route(ctx, json!({"type": "player:setReady", "isReady": true})).await.unwrap();
        }

        let mut last_version = table.version().await;
        let mut seen = Vec::new();
        for _ in 0..3 {
            let result = table.route(&host, json!({"type": "game:advancePhase"})).await.unwrap();
            seen.push(phase_of(&result));
            let version = table.version().await;
            assert!(version > last_version);
            last_version = version;
        }
        assert_eq!(seen, vec!["starting", "play", "end"]);
        assert_eq!(table.status().await, GameStatus::Finished);
        assert!(table.players().await.iter().all(|p| !p.is_connected));

        // Absorbing: no error, no write, no second closure
        let result = table.route(&host, json!({"type": "game:advancePhase"})).await.unwrap();
        assert_eq!(phase_of(&result), "end");
        assert!(!result.close_room);
        assert_eq!(table.version().await, last_version);
    }

    #[tokio::test]
    async fn test_end_closes_room() {
        let table = Table::new().await;
        let host = table.seat(guest()).await;
        let other = table.seat(guest()).await;
        for ctx in [&host, &other] {
            table.route(ctx, json!({"type": "player:setReady", "isReady": true})).await.unwrap();
        }

        let first = table.route(&host, json!({"type": "game:advancePhase"})).await.unwrap();
        let second = table.route(&host, json!({"type": "game:advancePhase"})).await.unwrap();
        let third = table.route(&host, json!({"type": "game:advancePhase"})).await.unwrap();
        assert!(!first.close_room);
        assert!(!second.close_room);
        assert!(third.close_room);
    }

    #[tokio::test]
    async fn test_advance_preserves_unrelated_state_keys() {
        let table = Table::new().await;
        let host = table.seat(guest()).await;
        let other = table.seat(guest()).await;
        for ctx in [&host, &other] {
            table.route(ctx, json!({"type": "player:setReady", "isReady": true})).await.unwrap();
        }

        {
            let mut tx = table.store.begin().await.unwrap();
            let row = tx.get_game_state(table.game_id).await.unwrap().unwrap();
            tx.upsert_game_state(
                table.game_id,
                json!({"phase": "lobby", "board": {"robber": 7}}),
                Some(row.version),
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let result = table.route(&host, json!({"type": "game:advancePhase"})).await.unwrap();
        match result.broadcast {
            Some(ServerMessage::PhaseUpdate { state, .. }) => {
                assert_eq!(state.state["phase"], "starting");
                assert_eq!(state.state["board"], json!({"robber": 7}));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
