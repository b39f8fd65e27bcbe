//! Network Layer
//!
//! WebSocket transport for live game rooms. Credentials are verified here,
//! errors are mapped to wire text and close codes here, and nothing in this
//! layer writes persisted state except through a game contract.

pub mod auth;
pub mod manager;
pub mod protocol;
pub mod server;

pub use auth::{
    resolve_principal, token_fingerprint, validate_token, AuthConfig, AuthError, CredentialVerifier,
    JwtVerifier, TokenClaims,
};
pub use manager::{ConnectionId, ConnectionManager, HandshakeParams};
pub use protocol::{ClientFrame, CloseReason, Outbound, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
