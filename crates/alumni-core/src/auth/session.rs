use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::AuthMode;

use super::credentials::CredentialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Authenticating,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub user_id: Option<i64>,
}

impl SessionSnapshot {
    pub fn anonymous() -> Self {
        Self {
            phase: SessionPhase::Anonymous,
            user_id: None,
        }
    }

    pub fn authenticated(user_id: Option<i64>) -> Self {
        Self {
            phase: SessionPhase::Authenticated,
            user_id,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated
    }

    pub fn in_progress(&self) -> bool {
        self.phase == SessionPhase::Authenticating
    }
}

/// Process-wide observable session state.
///
/// Clones share the same state. Only the auth service drives transitions;
/// everything else reads snapshots or subscribes to changes.
#[derive(Clone)]
pub struct SessionState {
    tx: Arc<watch::Sender<SessionSnapshot>>,
}

impl SessionState {
    pub fn new(initial: SessionSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Initial state from whatever credential survived the last run. This
    /// is optimistic: the server has not confirmed the credential yet.
    pub fn restore(store: &dyn CredentialStore, mode: AuthMode) -> Self {
        let snapshot = match store.get() {
            Ok(Some(credential)) if credential.is_usable(mode) => {
                SessionSnapshot::authenticated(credential.user_id)
            }
            Ok(_) => SessionSnapshot::anonymous(),
            Err(e) => {
                warn!(error = %e, "Failed to read stored credential, starting anonymous");
                SessionSnapshot::anonymous()
            }
        };
        info!(phase = ?snapshot.phase, user_id = ?snapshot.user_id, "Session restored");
        Self::new(snapshot)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    /// Wait until no authentication is in progress and return that state.
    pub async fn settled(&self) -> SessionSnapshot {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(|s| !s.in_progress()).await.map(|s| *s);
        // The sender lives in self, so the channel cannot close here
        settled.unwrap_or_else(|_| self.snapshot())
    }

    pub(crate) fn begin(&self) {
        self.tx.send_modify(|s| s.phase = SessionPhase::Authenticating);
    }

    pub(crate) fn succeed(&self, user_id: Option<i64>) {
        self.tx.send_replace(SessionSnapshot::authenticated(user_id));
        info!(?user_id, "Session authenticated");
    }

    pub(crate) fn fail(&self) {
        self.tx.send_replace(SessionSnapshot::anonymous());
        info!("Authentication failed, session is anonymous");
    }

    pub(crate) fn end(&self) {
        self.tx.send_replace(SessionSnapshot::anonymous());
        info!("Session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::{Credential, MemoryStore};

    #[test]
    fn test_restore_from_store() {
        let store = MemoryStore::with(Credential::bearer("T1", None).with_user_id(Some(9)));
        let session = SessionState::restore(&store, AuthMode::Bearer);
        assert_eq!(session.snapshot(), SessionSnapshot::authenticated(Some(9)));

        // A bearer record is not a cookie session
        let session = SessionState::restore(&store, AuthMode::Cookie);
        assert_eq!(session.snapshot(), SessionSnapshot::anonymous());

        let session = SessionState::restore(&MemoryStore::default(), AuthMode::Bearer);
        assert_eq!(session.snapshot(), SessionSnapshot::anonymous());
    }

    #[test]
    fn test_login_transitions() {
        let session = SessionState::new(SessionSnapshot::anonymous());
        session.begin();
        assert!(session.snapshot().in_progress());
        session.succeed(Some(1));
        assert_eq!(session.snapshot(), SessionSnapshot::authenticated(Some(1)));
    }

    #[test]
    fn test_failure_clears_user() {
        let session = SessionState::new(SessionSnapshot::authenticated(Some(1)));
        session.begin();
        assert_eq!(session.snapshot().user_id, Some(1));
        session.fail();
        assert_eq!(session.snapshot(), SessionSnapshot::anonymous());
    }

    #[test]
    fn test_end_from_any_phase() {
        let session = SessionState::new(SessionSnapshot::authenticated(Some(1)));
        session.end();
        assert_eq!(session.snapshot(), SessionSnapshot::anonymous());

        session.begin();
        session.end();
        assert_eq!(session.snapshot(), SessionSnapshot::anonymous());
    }

    #[test]
    fn test_clones_share_state() {
        let session = SessionState::new(SessionSnapshot::anonymous());
        let other = session.clone();
        session.succeed(Some(2));
        assert!(other.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_settled_waits_for_outcome() {
        let session = SessionState::new(SessionSnapshot::anonymous());
        session.begin();

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.settled().await })
        };

        tokio::task::yield_now().await;
        session.succeed(Some(5));
        let settled = waiter.await.unwrap();
        assert_eq!(settled, SessionSnapshot::authenticated(Some(5)));
    }
}
