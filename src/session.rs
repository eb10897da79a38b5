use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::error::{Error, Result};
use crate::models::{AuthPayload, Registration, User};
use crate::token_store::TokenStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Checking,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(s) => Some(s),
            _ => None,
        }
    }
}

/// Owns the one session of a running client.
///
/// Construct it once at startup, call [`SessionManager::bootstrap`], and hand the `Arc` to
/// every component that needs to know who is signed in. Only this type mutates the session;
/// everyone else reads it through [`SessionManager::require_auth`] or a subscription.
pub struct SessionManager {
    api: Arc<dyn RemoteApi>,
    tokens: Arc<dyn TokenStore>,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn RemoteApi>, tokens: Arc<dyn TokenStore>) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self { api, tokens, state }
    }

    /// Restores the session from the persisted token, if any.
    pub async fn bootstrap(&self) -> SessionState {
        let token = match self.tokens.load().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!("No persisted session token");
                return self.settle(SessionState::Unauthenticated);
            }
            Err(e) => {
                warn!("Failed to read persisted session token: {:#}", e);
                return self.settle(SessionState::Unauthenticated);
            }
        };

        self.state.send_replace(SessionState::Checking);
        info!("Revalidating persisted session");

        match self.api.me(&token).await {
            Ok(user) => {
                info!("Session restored for {}", user.username);
                self.settle(SessionState::Authenticated(Session { token, user }))
            }
            Err(Error::Transient(msg)) => {
                // the token may still be good; try again on the next start
                warn!("Could not revalidate session: {}", msg);
                self.settle(SessionState::Unauthenticated)
            }
            Err(e) => {
                info!("Session expired: {}", e);
                let settled = self.settle(SessionState::Unauthenticated);
                if !settled.is_authenticated() {
                    self.purge_token().await;
                }
                settled
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let payload = self.api.login(email, password).await?;
        Ok(self.establish(payload).await)
    }

    pub async fn register(&self, registration: &Registration) -> Result<User> {
        let payload = self.api.register(registration).await?;
        Ok(self.establish(payload).await)
    }

    /// Local teardown always happens; the remote invalidation runs in the background and
    /// its failure is only logged.
    pub async fn logout(&self) {
        let previous = self.state.send_replace(SessionState::Unauthenticated);
        self.purge_token().await;
        info!("Signed out");

        if let SessionState::Authenticated(session) = previous {
            let api = self.api.clone();
            tokio::spawn(async move {
                if let Err(e) = api.logout(&session.token).await {
                    warn!("Remote logout failed: {}", e);
                }
            });
        }
    }

    /// Tears the session down after the remote rejected `token`. A token that is no longer
    /// the current one (the user signed in again meanwhile) is ignored.
    pub async fn expire(&self, token: &str) {
        let expired = self.state.send_if_modified(|state| match state {
            SessionState::Authenticated(s) if s.token == token => {
                *state = SessionState::Unauthenticated;
                true
            }
            _ => false,
        });
        if expired {
            warn!("Session token rejected by remote, signing out");
            self.purge_token().await;
        }
    }

    pub(crate) async fn observe_failure(&self, token: &str, err: &Error) {
        if matches!(err, Error::SessionExpired) {
            self.expire(token).await;
        }
    }

    /// The current session, or `Unauthorized` while signed out or still checking.
    pub fn require_auth(&self) -> Result<Session> {
        match &*self.state.borrow() {
            SessionState::Authenticated(s) => Ok(s.clone()),
            _ => Err(Error::Unauthorized),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().session().map(|s| s.user.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Resolves once the startup check has settled.
    pub async fn wait_ready(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let ready = rx
            .wait_for(|s| !matches!(s, SessionState::Checking))
            .await
            .map(|s| (*s).clone());
        ready.unwrap_or_default()
    }

    async fn establish(&self, payload: AuthPayload) -> User {
        if let Err(e) = self.tokens.save(&payload.token).await {
            warn!("Failed to persist session token: {:#}", e);
        }
        info!("Signed in as {}", payload.user.username);
        let user = payload.user.clone();
        self.state.send_replace(SessionState::Authenticated(Session {
            token: payload.token,
            user: payload.user,
        }));
        user
    }

    /// Leaves `Checking` for `next`, unless a sign-in or sign-out already moved the state on.
    fn settle(&self, next: SessionState) -> SessionState {
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Checking) {
                *state = next;
                true
            } else {
                false
            }
        });
        let settled = self.state();
        debug!(authenticated = settled.is_authenticated(), "Session settled");
        settled
    }

    async fn purge_token(&self) {
        if let Err(e) = self.tokens.clear().await {
            warn!("Failed to clear persisted session token: {:#}", e);
        }
    }
}
