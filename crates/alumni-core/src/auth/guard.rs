use super::session::{SessionPhase, SessionSnapshot, SessionState};

/// Where unauthenticated users are sent.
pub const LOGIN_ROUTE: &str = "/login";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Authentication is in progress; show a waiting indicator.
    Wait,
    Redirect(String),
}

/// Gate for protected views, driven by the session state.
#[derive(Clone)]
pub struct RouteGuard {
    session: SessionState,
    login_route: String,
}

impl RouteGuard {
    pub fn new(session: SessionState) -> Self {
        Self {
            session,
            login_route: LOGIN_ROUTE.to_string(),
        }
    }

    pub fn with_login_route(mut self, route: impl Into<String>) -> Self {
        self.login_route = route.into();
        self
    }

    pub fn decide(&self, snapshot: &SessionSnapshot) -> GuardDecision {
        match snapshot.phase {
            SessionPhase::Authenticated => GuardDecision::Allow,
            SessionPhase::Authenticating => GuardDecision::Wait,
            SessionPhase::Anonymous => GuardDecision::Redirect(self.login_route.clone()),
        }
    }

    /// Decision for the current state; may be [`GuardDecision::Wait`].
    pub fn check(&self) -> GuardDecision {
        self.decide(&self.session.snapshot())
    }

    /// Decision once any in-progress authentication has finished. Never
    /// returns [`GuardDecision::Wait`].
    pub async fn resolve(&self) -> GuardDecision {
        let snapshot = self.session.settled().await;
        self.decide(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_follows_phase() {
        let session = SessionState::new(SessionSnapshot::anonymous());
        let guard = RouteGuard::new(session.clone());
        assert_eq!(guard.check(), GuardDecision::Redirect("/login".to_string()));

        session.begin();
        assert_eq!(guard.check(), GuardDecision::Wait);

        session.succeed(Some(1));
        assert_eq!(guard.check(), GuardDecision::Allow);

        session.end();
        assert_eq!(guard.check(), GuardDecision::Redirect("/login".to_string()));
    }

    #[test]
    fn test_custom_login_route() {
        let guard = RouteGuard::new(SessionState::new(SessionSnapshot::anonymous()))
            .with_login_route("alumni login");
        assert_eq!(
            guard.check(),
            GuardDecision::Redirect("alumni login".to_string())
        );
    }

    #[tokio::test]
    async fn test_resolve_waits_out_authentication() {
        let session = SessionState::new(SessionSnapshot::anonymous());
        let guard = RouteGuard::new(session.clone());
        session.begin();

        let pending = tokio::spawn({
            let guard = guard.clone();
            async move { guard.resolve().await }
        });
        tokio::task::yield_now().await;
        session.fail();

        assert_eq!(
            pending.await.unwrap(),
            GuardDecision::Redirect("/login".to_string())
        );
    }

    #[tokio::test]
    async fn test_resolve_is_immediate_when_settled() {
        let session = SessionState::new(SessionSnapshot::authenticated(Some(3)));
        assert_eq!(RouteGuard::new(session).resolve().await, GuardDecision::Allow);
    }
}
