//! Session ownership and identity-event handling.
//!
//! The manager is the only writer of session state. Login stores the
//! identity and a snapshot of its access token; every identity event
//! re-reads both and reacts. Teardown after logout or removal happens
//! here and nowhere else, so there is a single authoritative place that
//! clears state.

use crate::error::{SessionError, SessionResult};
use parking_lot::Mutex;
use std::sync::Arc;
use storesync_backend::{
    AccessToken, Credentials, Identity, IdentityListener, IdentityState, SyncBackend,
};
use tracing::{debug, info, warn};

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session, or the previous one ended.
    LoggedOut,
    /// A session holds a valid identity.
    LoggedIn,
    /// The identity was removed from the backend application. Terminal;
    /// the session clears itself as soon as this is observed.
    Removed,
}

/// What an identity event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// The identity still holds a valid session.
    Active,
    /// The session ended (logout or removal) and was cleared.
    Ended,
    /// The backend reported a state this client does not recognize; logged
    /// and deliberately left alone.
    Unrecognized,
}

/// Typed result of handling one identity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityUpdate {
    /// Whether this event revealed a rotated access token.
    pub token_refreshed: bool,
    /// What happened to the session.
    pub outcome: IdentityOutcome,
}

struct ActiveSession {
    identity: Identity,
    token_snapshot: AccessToken,
    state: SessionState,
    listener: Option<IdentityListener>,
}

/// Owns the authenticated identity.
pub struct SessionManager<B: SyncBackend> {
    backend: Arc<B>,
    inner: Mutex<Option<ActiveSession>>,
}

impl<B: SyncBackend> SessionManager<B> {
    /// Creates a manager with no session.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            inner: Mutex::new(None),
        }
    }

    /// Logs in with the given access token.
    ///
    /// Idempotent: if a logged-in session already exists it is returned
    /// unchanged and no second listener is attached. Failures carry the
    /// backend-reported message and are never retried here.
    pub async fn login(&self, token: AccessToken) -> SessionResult<Identity> {
        if let Some(active) = self.inner.lock().as_ref() {
            if active.state == SessionState::LoggedIn {
                debug!("login requested with an active session; reusing it");
                return Ok(active.identity.clone());
            }
        }

        info!("logging in");
        let identity = self
            .backend
            .log_in(Credentials::jwt(token))
            .await
            .map_err(|e| SessionError::Auth {
                message: e.to_string(),
            })?;
        let token_snapshot =
            self.backend
                .access_token(&identity)
                .ok_or_else(|| SessionError::Auth {
                    message: "backend issued no access token".into(),
                })?;
        let listener = self.backend.watch_identity(&identity);

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.as_ref() {
            if existing.state == SessionState::LoggedIn {
                // A concurrent login won the race; keep the existing
                // session and let this listener detach on drop.
                return Ok(existing.identity.clone());
            }
        }
        *inner = Some(ActiveSession {
            identity: identity.clone(),
            token_snapshot,
            state: SessionState::LoggedIn,
            listener: Some(listener),
        });
        info!(identity = %identity.id(), "logged in");
        Ok(identity)
    }

    /// Requests logout from the backend.
    ///
    /// Local fields are not cleared here: the identity listener reports the
    /// LoggedOut transition and teardown happens in
    /// [`handle_identity_event`](Self::handle_identity_event).
    pub async fn logout(&self) -> SessionResult<()> {
        let identity = {
            match self.inner.lock().as_ref() {
                Some(active) if active.state == SessionState::LoggedIn => {
                    active.identity.clone()
                }
                _ => {
                    debug!("logout requested without an active session");
                    return Ok(());
                }
            }
        };
        info!("logging out");
        self.backend.log_out(&identity).await?;
        Ok(())
    }

    /// Handles one identity event.
    ///
    /// Returns `None` when no session exists. Otherwise detects token
    /// rotation by comparing the stored snapshot against the identity's
    /// current token (the event itself carries no payload), then branches
    /// on the identity's lifecycle state with exactly one arm executing.
    pub fn handle_identity_event(&self) -> Option<IdentityUpdate> {
        let mut inner = self.inner.lock();
        let active = inner.as_mut()?;
        let identity = active.identity.clone();

        let mut token_refreshed = false;
        if let Some(current) = self.backend.access_token(&identity) {
            if current != active.token_snapshot {
                info!("access token refreshed");
                active.token_snapshot = current;
                token_refreshed = true;
            }
        }

        let outcome = match self.backend.identity_state(&identity) {
            Some(IdentityState::LoggedIn) => {
                debug!(identity = %identity.id(), "identity authenticated");
                IdentityOutcome::Active
            }
            Some(IdentityState::LoggedOut) => {
                info!(identity = %identity.id(), "identity logged out; clearing session");
                *inner = None;
                IdentityOutcome::Ended
            }
            Some(IdentityState::Removed) => {
                info!(
                    identity = %identity.id(),
                    "identity removed from the backend application; clearing session"
                );
                *inner = None;
                IdentityOutcome::Ended
            }
            Some(state) => {
                warn!(?state, "unrecognized identity state; taking no action");
                IdentityOutcome::Unrecognized
            }
            None => {
                warn!(
                    identity = %identity.id(),
                    "identity unknown to the backend; taking no action"
                );
                IdentityOutcome::Unrecognized
            }
        };

        Some(IdentityUpdate {
            token_refreshed,
            outcome,
        })
    }

    /// Clears the session synchronously. Used only by the re-open protocol,
    /// where the backend-driven teardown path is not available because the
    /// session is already invalid.
    pub fn force_clear(&self) {
        if self.inner.lock().take().is_some() {
            info!("session cleared for re-authentication");
        }
    }

    /// The current identity, if logged in.
    pub fn identity(&self) -> Option<Identity> {
        self.inner
            .lock()
            .as_ref()
            .map(|active| active.identity.clone())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner
            .lock()
            .as_ref()
            .map(|active| active.state)
            .unwrap_or(SessionState::LoggedOut)
    }

    /// True while a logged-in session exists.
    pub fn is_logged_in(&self) -> bool {
        self.state() == SessionState::LoggedIn
    }

    /// Takes the identity listener for the event loop to drive. The
    /// listener is attached once per login.
    pub fn take_identity_listener(&self) -> Option<IdentityListener> {
        self.inner
            .lock()
            .as_mut()
            .and_then(|active| active.listener.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storesync_backend::LoopbackBackend;

    fn manager() -> (Arc<LoopbackBackend>, SessionManager<LoopbackBackend>) {
        let backend = Arc::new(LoopbackBackend::new());
        let manager = SessionManager::new(Arc::clone(&backend));
        (backend, manager)
    }

    #[tokio::test]
    async fn login_stores_identity_and_attaches_listener() {
        let (backend, manager) = manager();
        let identity = manager.login(AccessToken::new("jwt")).await.unwrap();
        assert!(manager.is_logged_in());
        assert_eq!(backend.identity_listener_count(&identity), 1);
        assert!(manager.take_identity_listener().is_some());
    }

    #[tokio::test]
    async fn second_login_is_a_no_op() {
        let (backend, manager) = manager();
        let first = manager.login(AccessToken::new("jwt")).await.unwrap();
        let second = manager.login(AccessToken::new("other-jwt")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.login_count(), 1);
        assert_eq!(backend.identity_listener_count(&first), 1);
    }

    #[tokio::test]
    async fn login_failure_surfaces_the_backend_message() {
        let (backend, manager) = manager();
        backend.set_next_login_error("invalid jwt signature");
        let err = manager.login(AccessToken::new("jwt")).await.unwrap_err();
        match err {
            SessionError::Auth { message } => assert!(message.contains("invalid jwt signature")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!manager.is_logged_in());
    }

    #[tokio::test]
    async fn identical_tokens_emit_no_refresh() {
        let (backend, manager) = manager();
        let identity = manager.login(AccessToken::new("jwt")).await.unwrap();

        backend.notify_identity(&identity);
        let update = manager.handle_identity_event().unwrap();
        assert!(!update.token_refreshed);
        assert_eq!(update.outcome, IdentityOutcome::Active);

        let update = manager.handle_identity_event().unwrap();
        assert!(!update.token_refreshed);
    }

    #[tokio::test]
    async fn rotated_token_emits_exactly_one_refresh() {
        let (backend, manager) = manager();
        let identity = manager.login(AccessToken::new("jwt")).await.unwrap();

        backend.rotate_token(&identity, AccessToken::new("fresh"));
        let update = manager.handle_identity_event().unwrap();
        assert!(update.token_refreshed);

        // Same token on the next event: no second observation.
        let update = manager.handle_identity_event().unwrap();
        assert!(!update.token_refreshed);
    }

    #[tokio::test]
    async fn logout_tears_down_via_the_identity_event() {
        let (backend, manager) = manager();
        manager.login(AccessToken::new("jwt")).await.unwrap();

        manager.logout().await.unwrap();
        // Not cleared yet: teardown is event-driven.
        assert!(manager.is_logged_in());

        let update = manager.handle_identity_event().unwrap();
        assert_eq!(update.outcome, IdentityOutcome::Ended);
        assert!(!manager.is_logged_in());
        assert!(manager.identity().is_none());
        drop(backend);
    }

    #[tokio::test]
    async fn removal_clears_the_session() {
        let (backend, manager) = manager();
        let identity = manager.login(AccessToken::new("jwt")).await.unwrap();

        backend.mark_removed(&identity);
        let update = manager.handle_identity_event().unwrap();
        assert_eq!(update.outcome, IdentityOutcome::Ended);
        assert!(!manager.is_logged_in());
    }

    #[tokio::test]
    async fn unknown_identity_state_is_an_anomaly_not_a_teardown() {
        let (backend, manager) = manager();
        let identity = manager.login(AccessToken::new("jwt")).await.unwrap();

        backend.forget_identity(&identity);
        let update = manager.handle_identity_event().unwrap();
        assert_eq!(update.outcome, IdentityOutcome::Unrecognized);
        // Deliberately untouched: never silently succeed on an
        // unrecognized state.
        assert!(manager.is_logged_in());
    }

    #[tokio::test]
    async fn event_without_a_session_is_ignored() {
        let (_backend, manager) = manager();
        assert!(manager.handle_identity_event().is_none());
    }

    #[tokio::test]
    async fn force_clear_drops_everything() {
        let (_backend, manager) = manager();
        manager.login(AccessToken::new("jwt")).await.unwrap();
        manager.force_clear();
        assert!(!manager.is_logged_in());
        assert!(manager.take_identity_listener().is_none());
    }
}
