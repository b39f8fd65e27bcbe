//! Core primitives shared by every layer.
//!
//! Identity, the error taxonomy and join-code generation. Nothing here
//! touches storage or sockets.

pub mod error;
pub mod identity;
pub mod join_code;

// Re-export core types
pub use error::{ErrorKind, GameError};
pub use identity::{Identity, Principal, Role, SessionId, UserId};
pub use join_code::{time_derived_code, JOIN_CODE_LENGTH};
