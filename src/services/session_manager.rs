//! src/services/session_manager.rs
//!
//! SessionManager: single source of truth for the signed-in user and their
//! access token. It is an explicitly owned handle: construct one per session,
//! clone it into every consumer (views, the backend client), and drop it when
//! the session ends. It never performs I/O and none of its operations fail.

use crate::models::session::{AccessToken, Session, SessionPhase, User};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone, Debug)]
struct Tracked {
    session: Session,
    /// Bumped on every `set_auth` and every effective `logout`.
    generation: u64,
}

/// Proof that a token refresh was started against a specific login.
///
/// A refresh that completes after a logout (or after a different login)
/// carries a stale generation and is discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshTicket {
    generation: u64,
}

/// Shared, observable session state.
///
/// Each mutation is applied in one step under the channel's lock and
/// subscribers are notified after it, so no reader ever sees a user without
/// its token or the authenticated flag without both.
#[derive(Clone)]
pub struct SessionManager {
    state: Arc<watch::Sender<Tracked>>,
}

impl SessionManager {
    /// Start a new session in the `Resolving` phase.
    pub fn new() -> Self {
        let (state, _) = watch::channel(Tracked {
            session: Session::initial(),
            generation: 0,
        });
        Self {
            state: Arc::new(state),
        }
    }

    /// Establish an authenticated session from a successful auth exchange.
    pub fn set_auth(&self, user: User, access_token: AccessToken) {
        debug!("session authenticated for user {}", user.id);
        self.state.send_modify(|tracked| {
            tracked.session = Session {
                user: Some(user),
                access_token: Some(access_token),
                is_authenticated: true,
                is_loading: false,
            };
            tracked.generation += 1;
        });
    }

    /// Replace the identity record only. Does not establish authentication.
    pub fn set_user(&self, user: User) {
        self.state.send_modify(|tracked| {
            tracked.session.user = Some(user);
        });
    }

    /// Replace the access token only, e.g. after a silent refresh.
    pub fn set_access_token(&self, access_token: AccessToken) {
        self.state.send_modify(|tracked| {
            tracked.session.access_token = Some(access_token);
        });
    }

    /// Clear the session. Calling it on an already cleared session changes
    /// nothing and notifies nobody.
    pub fn logout(&self) {
        let changed = self.state.send_if_modified(|tracked| {
            if tracked.session.is_cleared() {
                return false;
            }
            tracked.session = Session {
                user: None,
                access_token: None,
                is_authenticated: false,
                is_loading: false,
            };
            tracked.generation += 1;
            true
        });
        if changed {
            debug!("session cleared");
        }
    }

    /// Set the bootstrap loading flag.
    ///
    /// Once loading has ended it stays ended for the life of this manager;
    /// a request to turn it back on is ignored.
    pub fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|tracked| {
            if tracked.session.is_loading == loading {
                return false;
            }
            if loading {
                debug!("ignoring set_loading(true) after session was resolved");
                return false;
            }
            tracked.session.is_loading = false;
            true
        });
    }

    /// Start a token refresh for the current login.
    ///
    /// Returns `None` when nobody is signed in.
    pub fn begin_refresh(&self) -> Option<RefreshTicket> {
        let tracked = self.state.borrow();
        tracked.session.is_authenticated.then_some(RefreshTicket {
            generation: tracked.generation,
        })
    }

    /// Apply a refreshed token if the login it was started for is still
    /// current. Returns `false` (and changes nothing) for a stale ticket.
    pub fn complete_refresh(&self, ticket: RefreshTicket, access_token: AccessToken) -> bool {
        let applied = self.state.send_if_modified(|tracked| {
            if tracked.generation != ticket.generation || !tracked.session.is_authenticated {
                return false;
            }
            tracked.session.access_token = Some(access_token);
            true
        });
        if !applied {
            debug!(
                "discarding stale token refresh (generation {})",
                ticket.generation
            );
        }
        applied
    }

    /// Clear the session only if it is still the login `ticket` was issued
    /// for. Returns `false` (and changes nothing) for a stale ticket.
    pub fn logout_if_current(&self, ticket: RefreshTicket) -> bool {
        let cleared = self.state.send_if_modified(|tracked| {
            if tracked.generation != ticket.generation || tracked.session.is_cleared() {
                return false;
            }
            tracked.session = Session {
                user: None,
                access_token: None,
                is_authenticated: false,
                is_loading: false,
            };
            tracked.generation += 1;
            true
        });
        if !cleared {
            debug!(
                "ignoring sign-out for stale login (generation {})",
                ticket.generation
            );
        }
        cleared
    }

    /// Current state, cloned out of the store.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().session.clone()
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.state.borrow().session.access_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().session.is_authenticated
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().session.phase()
    }

    /// Observe future transitions.
    pub fn subscribe(&self) -> SessionReceiver {
        SessionReceiver {
            inner: self.state.subscribe(),
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of a [`SessionManager`].
pub struct SessionReceiver {
    inner: watch::Receiver<Tracked>,
}

impl SessionReceiver {
    /// Wait for the next transition. Errors once every manager handle is gone.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.inner.changed().await
    }

    /// Latest state, marking it as seen.
    pub fn current(&mut self) -> Session {
        self.inner.borrow_and_update().session.clone()
    }

    /// Whether a transition happened since the last `current()`.
    pub fn has_changed(&self) -> bool {
        self.inner.has_changed().unwrap_or(false)
    }
}
