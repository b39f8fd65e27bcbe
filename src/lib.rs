//! # Catan Session Server
//!
//! Real-time session coordinator for multiplayer Catan lobbies and matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CATAN SESSION SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── identity.rs - User / guest-session identity, roles      │
//! │  ├── error.rs    - Closed error taxonomy                     │
//! │  └── join_code.rs- Time-derived base-36 join codes           │
//! │                                                              │
//! │  store/          - Persistence seam                          │
//! │  ├── model.rs    - Game, Player, GameStateRecord rows        │
//! │  └── memory.rs   - Serializable in-memory store              │
//! │                                                              │
//! │  game/           - Session rules                             │
//! │  ├── contract.rs - GameContract trait + route registry       │
//! │  ├── lobby.rs    - Create / list / join lobbies              │
//! │  └── catan/      - Catan commands and phase machine          │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── auth.rs     - JWT credential verification               │
//! │  ├── protocol.rs - Wire frames                               │
//! │  ├── manager.rs  - Rooms, contexts, fan-out                  │
//! │  └── server.rs   - WebSocket server                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Every client command runs inside one store transaction and every state
//! write is conditioned on the version it read, so two racing commands for
//! the same game can never both apply against the same snapshot.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use crate::core::{ErrorKind, GameError, Identity, Role};
pub use game::{CatanGame, GameContract, GameRegistry, LobbyService, Phase};
pub use network::{ConnectionManager, GameServer, ServerConfig};
pub use store::{GameStore, MemoryStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
