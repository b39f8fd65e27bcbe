//! Connection Identity
//!
//! The resolved principal behind a connection: either an authenticated user
//! or a durable guest session, never both.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated user identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

/// Guest session identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who is behind a connection.
///
/// Player lookup and creation consume this uniformly; call sites never
/// branch on guest vs. user themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Identity {
    /// Registered, authenticated user.
    User(UserId),
    /// Anonymous guest holding a durable session.
    Session(SessionId),
}

impl Identity {
    /// Build an identity from the optional claims of a verified credential.
    ///
    /// Returns `None` unless exactly one of the two ids is present.
    pub fn from_claims(user_id: Option<Uuid>, session_id: Option<Uuid>) -> Option<Self> {
        match (user_id, session_id) {
            (Some(user), None) => Some(Identity::User(UserId(user))),
            (None, Some(session)) => Some(Identity::Session(SessionId(session))),
            _ => None,
        }
    }

    /// The raw id regardless of kind.
    pub fn raw_id(&self) -> Uuid {
        match self {
            Identity::User(id) => id.0,
            Identity::Session(id) => id.0,
        }
    }

    /// The user id, if this is a user identity.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Identity::User(id) => Some(*id),
            Identity::Session(_) => None,
        }
    }

    /// Whether this identity owns a record carrying `other`.
    pub fn owns(&self, other: &Identity) -> bool {
        self == other
    }

    /// Display name handed out when a joiner does not pick one.
    pub fn default_display_name(&self) -> String {
        let short: String = self.raw_id().simple().to_string().chars().take(6).collect();
        match self {
            Identity::User(_) => format!("Player-{}", short),
            Identity::Session(_) => format!("Guest-{}", short),
        }
    }

    /// Role implied by the identity kind when the credential carries none.
    pub fn default_role(&self) -> Role {
        match self {
            Identity::User(_) => Role::User,
            Identity::Session(_) => Role::Guest,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::User(id) => write!(f, "user:{}", id),
            Identity::Session(id) => write!(f, "session:{}", id),
        }
    }
}

/// Access role carried by a credential.
///
/// Ordered so that `Admin > User > Guest`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Anonymous guest.
    Guest,
    /// Registered user.
    User,
    /// Administrator.
    Admin,
}

impl Role {
    /// Parse a role claim. Unknown strings yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            "guest" => Some(Role::Guest),
            _ => None,
        }
    }

    /// Claim spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified credential: identity plus role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Who the credential belongs to.
    pub identity: Identity,
    /// What the credential may do.
    pub role: Role,
}
