//! Client-side session state: who is signed in and with which credential.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identity record returned by the backend auth API.
///
/// Only `id` and `role` are named; everything else the backend sends is kept
/// verbatim in `profile` and never interpreted here.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    /// Backend identifier of the account.
    pub id: String,

    /// Account role (e.g. "buyer", "dealer", "admin").
    #[serde(default)]
    pub role: Option<String>,

    /// Remaining profile fields (name, company, avatar, ...).
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
            profile: Map::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Opaque bearer credential. `Debug` never prints the secret.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl From<&str> for AccessToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Macro-state of a session, derived from its flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Start-up: nobody knows yet whether the user is signed in.
    /// Protected views must not redirect to login in this phase.
    Resolving,
    /// Known to be signed out.
    Unauthenticated,
    /// Signed in with a user and a token.
    Authenticated,
}

/// Observable snapshot of the session.
///
/// Values are only produced by [`crate::services::session_manager::SessionManager`],
/// which keeps `is_authenticated` consistent with `user` and `access_token`.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub user: Option<User>,
    pub access_token: Option<AccessToken>,
    pub is_authenticated: bool,
    pub is_loading: bool,
}

impl Session {
    /// State at process start: unknown, still loading.
    pub fn initial() -> Self {
        Self {
            user: None,
            access_token: None,
            is_authenticated: false,
            is_loading: true,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_authenticated {
            SessionPhase::Authenticated
        } else if self.is_loading {
            SessionPhase::Resolving
        } else {
            SessionPhase::Unauthenticated
        }
    }

    /// True when the session holds nothing and is no longer loading.
    pub fn is_cleared(&self) -> bool {
        self.user.is_none()
            && self.access_token.is_none()
            && !self.is_authenticated
            && !self.is_loading
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::initial()
    }
}
