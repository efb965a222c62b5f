use serde::Serialize;

use super::manager::{SessionSnapshot, SignOutReason};

/// What a consuming surface should render for a given snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccessDecision {
    /// Storage not read yet; show a neutral loading state
    Loading,
    /// Hydrated with no token; send the user to sign in
    SignIn { reason: Option<SignOutReason> },
    Authenticated { warning: bool },
}

impl AccessDecision {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        if snapshot.is_loading() {
            return AccessDecision::Loading;
        }
        if snapshot.session.is_signed_in() {
            AccessDecision::Authenticated {
                warning: snapshot.session_warning,
            }
        } else {
            AccessDecision::SignIn {
                reason: snapshot.sign_out_reason,
            }
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AccessDecision::Loading => "Loading...",
            AccessDecision::SignIn {
                reason: Some(SignOutReason::Inactivity),
            } => "You were signed out due to inactivity. Please sign in again.",
            AccessDecision::SignIn { .. } => "Please sign in.",
            AccessDecision::Authenticated { warning: true } => {
                "Your session is about to expire. Interact with the page to stay signed in."
            }
            AccessDecision::Authenticated { warning: false } => "Signed in.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::session::SessionTimeouts;
    use crate::auth::storage::MemoryStorage;
    use crate::auth::SessionManager;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_decision_follows_lifecycle() {
        let clock = ManualClock::new(Utc::now());
        let manager = SessionManager::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(clock.clone()),
            SessionTimeouts::default(),
        );

        // Never SignIn while hydration is pending
        assert_eq!(AccessDecision::from_snapshot(&manager.snapshot()), AccessDecision::Loading);

        manager.hydrate().await;
        assert_eq!(
            AccessDecision::from_snapshot(&manager.snapshot()),
            AccessDecision::SignIn { reason: None }
        );

        manager.set_token(Some("abc".to_string()));
        assert_eq!(
            AccessDecision::from_snapshot(&manager.snapshot()),
            AccessDecision::Authenticated { warning: false }
        );

        clock.advance(Duration::minutes(14));
        manager.check_timeout();
        assert_eq!(
            AccessDecision::from_snapshot(&manager.snapshot()),
            AccessDecision::Authenticated { warning: true }
        );

        clock.advance(Duration::minutes(1));
        manager.check_timeout();
        let decision = AccessDecision::from_snapshot(&manager.snapshot());
        assert_eq!(
            decision,
            AccessDecision::SignIn {
                reason: Some(SignOutReason::Inactivity)
            }
        );
        assert!(decision.message().contains("inactivity"));
    }
}
