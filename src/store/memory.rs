//! In-Memory Game Store
//!
//! Process-local implementation of [`GameStore`]. Every game owns its rows
//! behind its own lock. A transaction takes a game's lock the first time it
//! touches that game, works on a private copy of those rows, and writes them
//! back on `commit`. Work on one game is therefore serializable while other
//! games proceed untouched, and a dropped transaction leaves no trace.
//!
//! A small catalog (join codes, creation order, last committed game rows)
//! sits behind a synchronous mutex that is never held across an await.
//! Transactions touch at most one existing game; locking several in
//! different orders from concurrent transactions can deadlock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::identity::Identity;
use crate::store::model::{
    Game, GameId, GameStateRecord, GameStatus, NewGame, NewPlayer, Player, PlayerId,
};
use crate::store::{constraints, GameStore, StoreError, StoreTx};

/// Everything stored for one game.
#[derive(Clone, Debug)]
struct Rows {
    game: Game,
    players: BTreeMap<PlayerId, Player>,
    state: Option<GameStateRecord>,
}

impl Rows {
    fn players_by_seat(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.players.values().cloned().collect();
        players.sort_by_key(|p| p.seat);
        players
    }
}

type Cell = Arc<Mutex<Rows>>;

#[derive(Default)]
struct Catalog {
    cells: BTreeMap<GameId, Cell>,
    /// Last committed game rows, for listings.
    games: BTreeMap<GameId, Game>,
    /// Creation order, oldest first.
    order: Vec<GameId>,
    codes: BTreeMap<String, GameId>,
    /// Join codes claimed by open transactions.
    reserved: BTreeSet<String>,
    player_games: BTreeMap<PlayerId, GameId>,
}

fn lock(catalog: &StdMutex<Catalog>) -> MutexGuard<'_, Catalog> {
    catalog.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    catalog: Arc<StdMutex<Catalog>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            catalog: self.catalog.clone(),
            held: BTreeMap::new(),
            created: Vec::new(),
            reserved: Vec::new(),
        }))
    }
}

/// A locked game and the transaction's working copy of it.
struct Held {
    guard: OwnedMutexGuard<Rows>,
    work: Rows,
}

/// An open transaction over [`MemoryStore`].
struct MemoryTx {
    catalog: Arc<StdMutex<Catalog>>,
    held: BTreeMap<GameId, Held>,
    /// Games inserted by this transaction, in creation order.
    created: Vec<(GameId, Cell)>,
    reserved: Vec<String>,
}

impl MemoryTx {
    fn committed_cell(&self, id: GameId) -> Option<Cell> {
        lock(&self.catalog).cells.get(&id).cloned()
    }

    fn committed_code(&self, join_code: &str) -> Option<GameId> {
        lock(&self.catalog).codes.get(join_code).copied()
    }

    /// Claim a join code until commit or drop.
    fn reserve_code(&mut self, join_code: &str) -> Result<(), StoreError> {
        let mut catalog = lock(&self.catalog);
        if catalog.codes.contains_key(join_code) || !catalog.reserved.insert(join_code.to_string()) {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::GAME_JOIN_CODE,
            });
        }
        drop(catalog);
        self.reserved.push(join_code.to_string());
        Ok(())
    }

    /// Working rows of `id`, locking the game on first touch.
    async fn rows(&mut self, id: GameId) -> Option<&mut Rows> {
        if !self.held.contains_key(&id) {
            let cell = self.committed_cell(id)?;
            let guard = cell.lock_owned().await;
            let work = (*guard).clone();
            self.held.insert(id, Held { guard, work });
        }
        self.held.get_mut(&id).map(|held| &mut held.work)
    }

    async fn rows_or_missing(&mut self, id: GameId) -> Result<&mut Rows, StoreError> {
        self.rows(id).await.ok_or(StoreError::NotFound { entity: "game" })
    }

    fn game_of_player(&self, id: PlayerId) -> Option<GameId> {
        self.held
            .iter()
            .find(|(_, held)| held.work.players.contains_key(&id))
            .map(|(game_id, _)| *game_id)
            .or_else(|| lock(&self.catalog).player_games.get(&id).copied())
    }

    async fn player_mut(&mut self, id: PlayerId) -> Result<&mut Player, StoreError> {
        let missing = StoreError::NotFound { entity: "player" };
        let game_id = self.game_of_player(id).ok_or_else(|| missing.clone())?;
        self.rows(game_id)
            .await
            .and_then(|rows| rows.players.get_mut(&id))
            .ok_or(missing)
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.reserved.is_empty() {
            let mut catalog = lock(&self.catalog);
            for code in self.reserved.drain(..) {
                catalog.reserved.remove(&code);
            }
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_game_by_id(&mut self, id: GameId) -> Result<Option<Game>, StoreError> {
        Ok(self.rows(id).await.map(|rows| rows.game.clone()))
    }

    async fn get_game_by_join_code(&mut self, join_code: &str) -> Result<Option<Game>, StoreError> {
        let own = self
            .held
            .values()
            .find(|held| held.work.game.join_code == join_code)
            .map(|held| held.work.game.clone());
        if own.is_some() {
            return Ok(own);
        }

        match self.committed_code(join_code) {
            Some(id) => self.get_game_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn create_lobby(&mut self, new_game: NewGame) -> Result<Game, StoreError> {
        self.reserve_code(&new_game.join_code)?;

        let game = Game {
            id: GameId::new_v4(),
            join_code: new_game.join_code,
            name: new_game.name,
            status: GameStatus::Lobby,
            max_players: new_game.max_players,
            created_by_user_id: new_game.created_by_user_id,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            seed: new_game.seed,
            config: new_game.config,
        };

        let rows = Rows {
            game: game.clone(),
            players: BTreeMap::new(),
            state: None,
        };
        let cell: Cell = Arc::new(Mutex::new(rows.clone()));
        let guard = cell.clone().lock_owned().await;
        self.held.insert(game.id, Held { guard, work: rows });
        self.created.push((game.id, cell));
        Ok(game)
    }

    async fn list_lobbies(&mut self, limit: usize) -> Result<Vec<Game>, StoreError> {
        let catalog = lock(&self.catalog);
        Ok(catalog
            .order
            .iter()
            .chain(self.created.iter().map(|(id, _)| id))
            .rev()
            .filter_map(|id| {
                self.held
                    .get(id)
                    .map(|held| &held.work.game)
                    .or_else(|| catalog.games.get(id))
            })
            .filter(|g| g.status == GameStatus::Lobby)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_game_status(&mut self, id: GameId, status: GameStatus) -> Result<Game, StoreError> {
        let game = &mut self.rows_or_missing(id).await?.game;

        if !game.status.can_transition_to(status) {
            return Err(StoreError::IllegalStatusTransition {
                from: game.status.as_str(),
                to: status.as_str(),
            });
        }

        let now = Utc::now();
        game.status = status;
        if status == GameStatus::Running && game.started_at.is_none() {
            game.started_at = Some(now);
        }
        if status.is_terminal() && game.finished_at.is_none() {
            game.finished_at = Some(now);
        }

        Ok(game.clone())
    }

    async fn list_players_by_game(&mut self, game_id: GameId) -> Result<Vec<Player>, StoreError> {
        Ok(self
            .rows(game_id)
            .await
            .map(|rows| rows.players_by_seat())
            .unwrap_or_default())
    }

    async fn get_player_by_identity(
        &mut self,
        game_id: GameId,
        identity: &Identity,
    ) -> Result<Option<Player>, StoreError> {
        Ok(self.rows(game_id).await.and_then(|rows| {
            rows.players
                .values()
                .find(|p| p.identity.owns(identity))
                .cloned()
        }))
    }

    async fn get_player(&mut self, id: PlayerId) -> Result<Option<Player>, StoreError> {
        match self.player_mut(id).await {
            Ok(player) => Ok(Some(player.clone())),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn add_player(&mut self, new_player: NewPlayer) -> Result<Player, StoreError> {
        let rows = self.rows_or_missing(new_player.game_id).await?;

        for existing in rows.players.values() {
            if existing.identity == new_player.identity {
                return Err(StoreError::UniqueViolation {
                    constraint: constraints::PLAYER_IDENTITY,
                });
            }
            if existing.seat == new_player.seat {
                return Err(StoreError::UniqueViolation {
                    constraint: constraints::PLAYER_SEAT,
                });
            }
        }

        let player = Player {
            id: PlayerId::new_v4(),
            game_id: new_player.game_id,
            identity: new_player.identity,
            seat: new_player.seat,
            color: new_player.color,
            display_name: new_player.display_name,
            is_host: new_player.is_host,
            is_ready: false,
            is_connected: false,
            victory_points: 0,
            played_knights: 0,
            longest_road_length: 0,
            largest_army: false,
            longest_road: false,
            created_at: Utc::now(),
        };

        rows.players.insert(player.id, player.clone());
        Ok(player)
    }

    async fn set_player_ready(&mut self, id: PlayerId, is_ready: bool) -> Result<Player, StoreError> {
        let player = self.player_mut(id).await?;
        player.is_ready = is_ready;
        Ok(player.clone())
    }

    async fn set_player_connected(&mut self, id: PlayerId, is_connected: bool) -> Result<(), StoreError> {
        self.player_mut(id).await?.is_connected = is_connected;
        Ok(())
    }

    async fn set_players_connected_by_game(
        &mut self,
        game_id: GameId,
        is_connected: bool,
    ) -> Result<(), StoreError> {
        if let Some(rows) = self.rows(game_id).await {
            for player in rows.players.values_mut() {
                player.is_connected = is_connected;
            }
        }
        Ok(())
    }

    async fn get_game_state(&mut self, game_id: GameId) -> Result<Option<GameStateRecord>, StoreError> {
        Ok(self.rows(game_id).await.and_then(|rows| rows.state.clone()))
    }

    async fn upsert_game_state(
        &mut self,
        game_id: GameId,
        state: Value,
        expected_version: Option<u64>,
    ) -> Result<GameStateRecord, StoreError> {
        let rows = self.rows_or_missing(game_id).await?;
        let now = Utc::now();

        match rows.state.as_mut() {
            Some(record) => {
                if let Some(expected) = expected_version {
                    if record.version != expected {
                        return Err(StoreError::VersionConflict {
                            expected,
                            actual: record.version,
                        });
                    }
                }
                record.version += 1;
                record.state = state;
                record.updated_at = now;
                Ok(record.clone())
            }
            None => {
                if expected_version.is_some() {
                    return Err(StoreError::NotFound { entity: "game state" });
                }
                let record = GameStateRecord {
                    game_id,
                    version: 0,
                    state,
                    updated_at: now,
                };
                rows.state = Some(record.clone());
                Ok(record)
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        let held = std::mem::take(&mut tx.held);
        let created = std::mem::take(&mut tx.created);
        let reserved = std::mem::take(&mut tx.reserved);

        let mut catalog = lock(&tx.catalog);
        for code in &reserved {
            catalog.reserved.remove(code);
        }
        for (id, cell) in created {
            if let Some(held) = held.get(&id) {
                catalog.codes.insert(held.work.game.join_code.clone(), id);
            }
            catalog.order.push(id);
            catalog.cells.insert(id, cell);
        }
        for (id, Held { mut guard, work }) in held {
            for player_id in work.players.keys() {
                catalog.player_games.insert(*player_id, id);
            }
            catalog.games.insert(id, work.game.clone());
            *guard = work;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::SessionId;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn new_game(code: &str) -> NewGame {
        NewGame {
            join_code: code.to_string(),
            name: None,
            max_players: 4,
            created_by_user_id: None,
            seed: None,
            config: json!({}),
        }
    }

    fn guest() -> Identity {
        Identity::Session(SessionId(Uuid::new_v4()))
    }

    fn new_player(game_id: GameId, identity: Identity, seat: u32) -> NewPlayer {
        NewPlayer {
            game_id,
            identity,
            seat,
            color: None,
            display_name: identity.default_display_name(),
            is_host: seat == 1,
        }
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        let game = tx.create_lobby(new_game("AAAAAA")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_game_by_id(game.id).await.unwrap(), Some(game));
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let store = MemoryStore::new();

        {
            let mut tx = store.begin().await.unwrap();
            tx.create_lobby(new_game("AAAAAA")).await.unwrap();
            // dropped without commit
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_game_by_join_code("AAAAAA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_join_code_unique() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_lobby(new_game("AAAAAA")).await.unwrap();

        let err = tx.create_lobby(new_game("AAAAAA")).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::UniqueViolation { constraint: constraints::GAME_JOIN_CODE }
        );
    }

    #[tokio::test]
    async fn test_list_lobbies_newest_first() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = tx.create_lobby(new_game("AAAAA1")).await.unwrap();
        let second = tx.create_lobby(new_game("AAAAA2")).await.unwrap();
        let third = tx.create_lobby(new_game("AAAAA3")).await.unwrap();
        tx.set_game_status(second.id, GameStatus::Running).await.unwrap();

        let lobbies = tx.list_lobbies(10).await.unwrap();
        let ids: Vec<_> = lobbies.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![third.id, first.id]);

        assert_eq!(tx.list_lobbies(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_timestamps_and_forward_only() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let game = tx.create_lobby(new_game("AAAAAA")).await.unwrap();

        let running = tx.set_game_status(game.id, GameStatus::Running).await.unwrap();
        assert!(running.started_at.is_some());
        assert!(running.finished_at.is_none());

        let finished = tx.set_game_status(game.id, GameStatus::Finished).await.unwrap();
        assert!(finished.finished_at.is_some());

        let err = tx.set_game_status(game.id, GameStatus::Running).await.unwrap_err();
        assert!(matches!(err, StoreError::IllegalStatusTransition { .. }));
    }

    #[tokio::test]
    async fn test_player_uniqueness() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let game = tx.create_lobby(new_game("AAAAAA")).await.unwrap();
        let who = guest();

        let player = tx.add_player(new_player(game.id, who, 1)).await.unwrap();
        assert!(!player.is_ready);
        assert!(!player.is_connected);

        let dup_identity = tx.add_player(new_player(game.id, who, 2)).await.unwrap_err();
        assert_eq!(
            dup_identity,
            StoreError::UniqueViolation { constraint: constraints::PLAYER_IDENTITY }
        );

        let dup_seat = tx.add_player(new_player(game.id, guest(), 1)).await.unwrap_err();
        assert_eq!(
            dup_seat,
            StoreError::UniqueViolation { constraint: constraints::PLAYER_SEAT }
        );

        let found = tx.get_player_by_identity(game.id, &who).await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(player.id));
    }

    #[tokio::test]
    async fn test_players_listed_by_seat() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let game = tx.create_lobby(new_game("AAAAAA")).await.unwrap();

        for seat in [3, 1, 2] {
            tx.add_player(new_player(game.id, guest(), seat)).await.unwrap();
        }

        let seats: Vec<u32> = tx
            .list_players_by_game(game.id)
            .await
            .unwrap()
            .iter()
            .map(|p| p.seat)
            .collect();
        assert_eq!(seats, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_upsert_versions() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let game = tx.create_lobby(new_game("AAAAAA")).await.unwrap();

        let v0 = tx.upsert_game_state(game.id, json!({"phase": "lobby"}), None).await.unwrap();
        assert_eq!(v0.version, 0);

        let v1 = tx
            .upsert_game_state(game.id, json!({"phase": "starting"}), Some(0))
            .await
            .unwrap();
        assert_eq!(v1.version, 1);

        let stale = tx
            .upsert_game_state(game.id, json!({"phase": "play"}), Some(0))
            .await
            .unwrap_err();
        assert_eq!(stale, StoreError::VersionConflict { expected: 0, actual: 1 });

        let current = tx.get_game_state(game.id).await.unwrap().unwrap();
        assert_eq!(current.state["phase"], "starting");
    }

    #[tokio::test]
    async fn test_connected_by_game() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let game = tx.create_lobby(new_game("AAAAAA")).await.unwrap();
        let a = tx.add_player(new_player(game.id, guest(), 1)).await.unwrap();
        let b = tx.add_player(new_player(game.id, guest(), 2)).await.unwrap();

        tx.set_player_connected(a.id, true).await.unwrap();
        tx.set_player_connected(b.id, true).await.unwrap();
        tx.set_players_connected_by_game(game.id, false).await.unwrap();

        let players = tx.list_players_by_game(game.id).await.unwrap();
        assert!(players.iter().all(|p| !p.is_connected));
    }

    #[tokio::test]
    async fn test_games_lock_independently() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = tx.create_lobby(new_game("AAAAA1")).await.unwrap();
        let b = tx.create_lobby(new_game("AAAAA2")).await.unwrap();
        tx.commit().await.unwrap();

        let mut holding_a = store.begin().await.unwrap();
        holding_a.get_game_by_id(a.id).await.unwrap();

        let mut other = store.begin().await.unwrap();
        let found = tokio::time::timeout(Duration::from_secs(1), other.get_game_by_id(b.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.map(|g| g.id), Some(b.id));
        let listed = tokio::time::timeout(Duration::from_secs(1), other.list_lobbies(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(listed.len(), 2);
        drop(other);

        let mut same = store.begin().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), same.get_game_by_id(a.id)).await;
        assert!(blocked.is_err());

        drop(holding_a);
        assert!(same.get_game_by_id(a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_player_writes_roll_back_across_transactions() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let game = tx.create_lobby(new_game("AAAAAA")).await.unwrap();
        let player = tx.add_player(new_player(game.id, guest(), 1)).await.unwrap();
        tx.commit().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            let ready = tx.set_player_ready(player.id, true).await.unwrap();
            assert!(ready.is_ready);
        }

        let mut tx = store.begin().await.unwrap();
        let stored = tx.get_player(player.id).await.unwrap().unwrap();
        assert!(!stored.is_ready);
        assert!(tx.get_player(PlayerId::new_v4()).await.unwrap().is_none());
        assert_eq!(
            tx.get_game_by_join_code("AAAAAA").await.unwrap().map(|g| g.id),
            Some(game.id)
        );
    }
}
