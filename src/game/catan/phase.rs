//! Catan Phase State Machine
//!
//! Strictly linear: `lobby → starting → play → end`, with `end` absorbing.
//! Board sub-phases live inside the opaque state payload and are not
//! modelled here.
//!
//! Every accepted mutation reads the state row, merges the new phase into
//! the payload (unrelated keys survive) and writes it back conditioned on
//! the version it read. A racing writer therefore fails with `Conflict`
//! instead of double-advancing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::error::GameError;
use crate::game::contract::ConnectionContext;
use crate::store::{GameId, GameStateRecord, GameStatus, Player, StoreTx};

/// Minimum seated players before the host may start.
pub const MIN_PLAYERS_TO_START: usize = 2;

/// Catan session phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting room; players toggle ready.
    Lobby,
    /// Match committed; board setup would happen here.
    Starting,
    /// Main play.
    Play,
    /// Terminal.
    End,
}

impl Phase {
    /// Successor phase. `End` maps to itself.
    pub fn next(self) -> Phase {
        match self {
            Phase::Lobby => Phase::Starting,
            Phase::Starting => Phase::Play,
            Phase::Play => Phase::End,
            Phase::End => Phase::End,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Lobby => "lobby",
            Phase::Starting => "starting",
            Phase::Play => "play",
            Phase::End => "end",
        }
    }

    /// Parse a wire name.
    pub fn parse(value: &str) -> Option<Phase> {
        match value {
            "lobby" => Some(Phase::Lobby),
            "starting" => Some(Phase::Starting),
            "play" => Some(Phase::Play),
            "end" => Some(Phase::End),
            _ => None,
        }
    }

    /// Phase stored in a state payload. Missing or unknown reads as `Lobby`.
    pub fn from_state(state: &Value) -> Phase {
        state
            .get("phase")
            .and_then(Value::as_str)
            .and_then(Phase::parse)
            .unwrap_or(Phase::Lobby)
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        self == Phase::End
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a brand-new game.
pub fn initial_state() -> Value {
    let mut map = Map::new();
    map.insert("phase".to_string(), Value::from(Phase::Lobby.as_str()));
    Value::Object(map)
}

/// Overwrite `phase` in `state`, keeping every other key.
///
/// A non-object payload is replaced by `{ phase }`.
pub fn merge_phase(state: &Value, phase: Phase) -> Value {
    let mut map = match state {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    map.insert("phase".to_string(), Value::from(phase.as_str()));
    Value::Object(map)
}

/// Fetch the state row, creating it in `lobby` when absent.
pub async fn ensure_state(tx: &mut dyn StoreTx, game_id: GameId) -> Result<GameStateRecord, GameError> {
    if let Some(existing) = tx.get_game_state(game_id).await? {
        return Ok(existing);
    }
    debug!(game_id = %game_id, "initializing game state");
    Ok(tx.upsert_game_state(game_id, initial_state(), None).await?)
}

/// Result of an accepted phase request.
#[derive(Clone, Debug)]
pub struct Advance {
    /// Phase after the request.
    pub phase: Phase,
    /// State row after the request.
    pub state: GameStateRecord,
    /// Roster after the request.
    pub players: Vec<Player>,
    /// Whether the room must be closed.
    pub close_room: bool,
}

/// Whether the lobby may start with this roster.
pub fn ready_to_start(players: &[Player]) -> bool {
    players.len() >= MIN_PLAYERS_TO_START && players.iter().all(|p| p.is_ready)
}

/// Host-only request to move to the next phase.
pub async fn advance(tx: &mut dyn StoreTx, ctx: &ConnectionContext) -> Result<Advance, GameError> {
    let players = tx.list_players_by_game(ctx.game_id).await?;
    let me = players
        .iter()
        .find(|p| p.id == ctx.player_id)
        .ok_or_else(|| GameError::NotFound("Player not found".to_string()))?;

    if !me.is_host {
        return Err(GameError::Forbidden("Host only".to_string()));
    }

    let current_row = ensure_state(tx, ctx.game_id).await?;
    let current = Phase::from_state(&current_row.state);

    if current.is_terminal() {
        debug!(game_id = %ctx.game_id, "advance requested after end; ignoring");
        return Ok(Advance {
            phase: current,
            state: current_row,
            players,
            close_room: false,
        });
    }

    let next = current.next();

    if current == Phase::Lobby {
        if !ready_to_start(&players) {
            return Err(GameError::PreconditionFailed(
                "All players must be ready".to_string(),
            ));
        }
        tx.set_game_status(ctx.game_id, GameStatus::Running).await?;
    }

    let close_room = next == Phase::End;
    if close_room {
        tx.set_game_status(ctx.game_id, GameStatus::Finished).await?;
        tx.set_players_connected_by_game(ctx.game_id, false).await?;
    }

    let merged = merge_phase(&current_row.state, next);
    let state = tx
        .upsert_game_state(ctx.game_id, merged, Some(current_row.version))
        .await?;
    let players = tx.list_players_by_game(ctx.game_id).await?;

    info!(
        game_id = %ctx.game_id,
        from = %current,
        to = %next,
        version = state.version,
        "phase advanced"
    );

    Ok(Advance {
        phase: next,
        state,
        players,
        close_room,
    })
}

/// Update the caller's ready flag and bump the state version.
pub async fn set_ready(
    tx: &mut dyn StoreTx,
    ctx: &ConnectionContext,
    is_ready: bool,
) -> Result<Vec<Player>, GameError> {
    let player = tx.set_player_ready(ctx.player_id, is_ready).await?;

    let row = ensure_state(tx, player.game_id).await?;
    tx.upsert_game_state(player.game_id, row.state, Some(row.version))
        .await?;

    debug!(game_id = %player.game_id, player_id = %player.id, is_ready, "ready flag updated");
    Ok(tx.list_players_by_game(player.game_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_linear_order() {
        assert_eq!(Phase::Lobby.next(), Phase::Starting);
        assert_eq!(Phase::Starting.next(), Phase::Play);
        assert_eq!(Phase::Play.next(), Phase::End);
        assert_eq!(Phase::End.next(), Phase::End);
        assert!(Phase::Lobby < Phase::Starting && Phase::Play < Phase::End);
    }

    #[test]
    fn test_from_state_defaults_to_lobby() {
        assert_eq!(Phase::from_state(&json!({"phase": "play"})), Phase::Play);
        assert_eq!(Phase::from_state(&json!({"phase": "bogus"})), Phase::Lobby);
        assert_eq!(Phase::from_state(&json!({})), Phase::Lobby);
        assert_eq!(Phase::from_state(&Value::Null), Phase::Lobby);
    }

    #[test]
    fn test_merge_keeps_unrelated_keys() {
        let before = json!({"phase": "lobby", "board": {"tiles": [1, 2, 3]}});
        let after = merge_phase(&before, Phase::Starting);
        assert_eq!(after["phase"], "starting");
        assert_eq!(after["board"], before["board"]);
    }

    #[test]
    fn test_merge_replaces_non_object() {
        assert_eq!(merge_phase(&json!([1, 2]), Phase::Play), json!({"phase": "play"}));
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(initial_state(), json!({"phase": "lobby"}));
    }
}
