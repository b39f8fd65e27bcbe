//! Error Taxonomy
//!
//! One closed error enum shared by the lobby, the game contracts and the
//! connection manager. Transport-level mapping (close codes, wire text)
//! happens once, in `network::manager`.

use thiserror::Error;

use crate::store::StoreError;

/// Coarse classification of a [`GameError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No or invalid credential.
    Unauthenticated,
    /// Authenticated but not entitled.
    Forbidden,
    /// Unknown game, join code or player.
    NotFound,
    /// Capacity exceeded or version mismatch.
    Conflict,
    /// Readiness / player-count guard not met.
    PreconditionFailed,
    /// Join-code collision retries exhausted.
    AllocationExhausted,
    /// Malformed client frame.
    InvalidMessage,
    /// Repository failure.
    Internal,
}

/// Session coordination errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// No or invalid credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated but not entitled.
    #[error("{0}")]
    Forbidden(String),

    /// Unknown game, join code or player.
    #[error("{0}")]
    NotFound(String),

    /// Capacity exceeded or concurrent modification.
    #[error("{0}")]
    Conflict(String),

    /// A guard on the requested transition was not met.
    #[error("{0}")]
    PreconditionFailed(String),

    /// Could not allocate a unique join code.
    #[error("Failed to allocate join code after {attempts} attempts")]
    AllocationExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Malformed client frame.
    #[error("{0}")]
    InvalidMessage(String),

    /// Repository failure.
    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl GameError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            GameError::Forbidden(_) => ErrorKind::Forbidden,
            GameError::NotFound(_) => ErrorKind::NotFound,
            GameError::Conflict(_) => ErrorKind::Conflict,
            GameError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            GameError::AllocationExhausted { .. } => ErrorKind::AllocationExhausted,
            GameError::InvalidMessage(_) => ErrorKind::InvalidMessage,
            GameError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Text safe to show a client. Storage details stay server-side.
    pub fn client_message(&self) -> String {
        match self {
            GameError::Storage(_) => "Server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => {
                GameError::Conflict("Game state changed concurrently, retry".to_string())
            }
            other => GameError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(GameError::Forbidden("Host only".into()).kind(), ErrorKind::Forbidden);
        assert_eq!(
            GameError::AllocationExhausted { attempts: 5 }.kind(),
            ErrorKind::AllocationExhausted
        );
    }

    #[test]
    fn test_version_conflict_maps_to_conflict() {
        let err: GameError = StoreError::VersionConflict { expected: 3, actual: 4 }.into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_storage_details_hidden_from_client() {
        let err: GameError = StoreError::Backend("connection reset".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.client_message(), "Server error");
    }

    #[test]
    fn test_client_message_passes_through() {
        let err = GameError::PreconditionFailed("All players must be ready".into());
        assert_eq!(err.client_message(), "All players must be ready");
    }
}
