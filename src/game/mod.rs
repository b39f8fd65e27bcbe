//! Game Session Module
//!
//! Lobby orchestration and the per-game contracts the connection manager
//! dispatches to.
//!
//! ## Module Structure
//!
//! - `contract`: `GameContract` trait and the path → contract registry
//! - `lobby`: lobby creation, listing and idempotent joins
//! - `catan`: Catan command vocabulary and phase state machine

pub mod catan;
pub mod contract;
pub mod lobby;

// Re-export key types
pub use catan::{CatanCommand, CatanGame, Phase};
pub use contract::{ConnectSnapshot, ConnectionContext, GameContract, GameKind, GameRegistry, RouteResult};
pub use lobby::{ConnectionParams, JoinOutcome, JoinRequest, JoinTarget, LobbyConfig, LobbyService};
