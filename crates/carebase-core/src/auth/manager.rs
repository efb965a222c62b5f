//! The session manager: single source of truth for authentication state.
//!
//! Every mutation is one synchronous commit. The commit updates the
//! in-memory state, writes durable storage and publishes the new snapshot to
//! subscribers while holding the same lock, so storage never lags the state
//! it represents and no subscriber sees a half-applied change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::activity::{ActivityEvent, ActivityThrottle};
use super::clock::{Clock, SystemClock};
use super::session::{SessionData, SessionStatus, SessionTimeouts};
use super::storage::{load_session, save_session, SessionStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationState {
    Pending,
    Ready,
}

/// Why the most recent sign-out happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    UserRequested,
    Inactivity,
}

/// What consumers see of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session: SessionData,
    pub hydration: HydrationState,
    pub ever_authenticated: bool,
    pub session_warning: bool,
    pub sign_out_reason: Option<SignOutReason>,
}

impl SessionSnapshot {
    fn pending() -> Self {
        Self {
            session: SessionData::default(),
            hydration: HydrationState::Pending,
            ever_authenticated: false,
            session_warning: false,
            sign_out_reason: None,
        }
    }

    /// True until storage has been read; the session is unknown, not signed out
    pub fn is_loading(&self) -> bool {
        self.hydration == HydrationState::Pending
    }

    pub fn token(&self) -> Option<&str> {
        self.session.token.as_deref()
    }

    pub fn user(&self) -> Option<&serde_json::Value> {
        self.session.user.as_ref()
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.session.last_activity
    }

    pub fn is_authenticated(&self) -> bool {
        !self.is_loading() && self.session.is_signed_in()
    }
}

struct State {
    snapshot: SessionSnapshot,
    throttle: ActivityThrottle,
    /// Set when the token changed before hydration finished
    changed_while_pending: bool,
    /// Profile installed before hydration finished, applied onto the stored session
    pending_user: Option<Option<serde_json::Value>>,
}

impl State {
    fn stamp(&mut self, now: DateTime<Utc>) {
        self.snapshot.session.last_activity = Some(now);
        self.snapshot.session_warning = false;
    }

    /// Clear token, user and activity together
    fn clear(&mut self, reason: SignOutReason) {
        if !self.snapshot.session.is_empty() {
            self.snapshot.sign_out_reason = Some(reason);
        }
        self.snapshot.session = SessionData::default();
        self.snapshot.session_warning = false;
        self.throttle.reset();
    }
}

/// Outcome of a commit
enum Commit {
    Unchanged,
    /// Only manager-level flags changed
    Publish,
    /// Session data changed and must be written to storage
    Persist,
}

struct Inner {
    state: Mutex<State>,
    tx: watch::Sender<SessionSnapshot>,
    storage: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
    timeouts: SessionTimeouts,
}

/// Handle to a session. Clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        clock: Arc<dyn Clock>,
        timeouts: SessionTimeouts,
    ) -> Self {
        let snapshot = SessionSnapshot::pending();
        let (tx, _) = watch::channel(snapshot.clone());
        let state = State {
            snapshot,
            throttle: ActivityThrottle::new(timeouts.activity_throttle),
            changed_while_pending: false,
            pending_user: None,
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                tx,
                storage,
                clock,
                timeouts,
            }),
        }
    }

    /// Manager on the system clock with default timeouts
    pub fn with_storage(storage: Arc<dyn SessionStorage>) -> Self {
        Self::new(storage, Arc::new(SystemClock), SessionTimeouts::default())
    }

    pub fn timeouts(&self) -> &SessionTimeouts {
        &self.inner.timeouts
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.tx.borrow().clone()
    }

    /// Receive every committed snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.tx.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.tx.borrow().is_loading()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.tx.borrow().session.token.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let now = self.now();
        self.inner
            .tx
            .borrow()
            .session
            .status_at(now, &self.inner.timeouts)
    }

    // ===== Mutations =====

    /// Install a bearer token, or sign out when `None`.
    pub fn set_token(&self, token: Option<String>) {
        let Some(token) = token else {
            self.sign_out(SignOutReason::UserRequested);
            return;
        };

        self.commit(|state, now| {
            state.snapshot.session.token = Some(token);
            state.stamp(now);
            state.snapshot.ever_authenticated = true;
            state.snapshot.sign_out_reason = None;
            info!("Session token installed");
            (Commit::Persist, ())
        });
    }

    /// Install or clear the profile record, independent of token state.
    ///
    /// Before hydration the profile is held back and merged onto the stored
    /// session once it is read, so it never overwrites a stored token.
    pub fn set_user(&self, user: Option<serde_json::Value>) {
        self.commit(|state, _| {
            if state.snapshot.session.user == user {
                return (Commit::Unchanged, ());
            }
            state.snapshot.session.user = user.clone();
            debug!("Session user updated");
            if state.snapshot.is_loading() && !state.changed_while_pending {
                state.pending_user = Some(user);
                return (Commit::Publish, ());
            }
            (Commit::Persist, ())
        });
    }

    /// Stamp `last_activity`. Does nothing while signed out.
    pub fn update_last_activity(&self) {
        self.commit(|state, now| {
            if !state.snapshot.session.is_signed_in() {
                debug!("Ignoring activity update without a session");
                return (Commit::Unchanged, ());
            }
            state.stamp(now);
            (Commit::Persist, ())
        });
    }

    /// Clear token, user and activity together. Safe to call repeatedly.
    pub fn logout(&self) {
        self.sign_out(SignOutReason::UserRequested);
    }

    /// Feed one raw UI event through the activity filter and throttle.
    /// Returns true when it reset the inactivity clock.
    pub fn record_activity(&self, event: ActivityEvent) -> bool {
        if !event.is_qualifying() {
            return false;
        }

        self.commit(|state, now| {
            if !state.snapshot.session.is_signed_in() {
                return (Commit::Unchanged, false);
            }
            if !state.throttle.try_accept(now) {
                return (Commit::Unchanged, false);
            }
            state.stamp(now);
            debug!(?event, "Activity recorded");
            (Commit::Persist, true)
        })
    }

    /// Evaluate the inactivity timeout, raising the warning or signing out.
    pub fn check_timeout(&self) -> SessionStatus {
        let timeouts = self.inner.timeouts;
        self.commit(|state, now| {
            let status = state.snapshot.session.status_at(now, &timeouts);
            let commit = match status {
                SessionStatus::SignedOut => Commit::Unchanged,
                SessionStatus::Active if state.snapshot.session_warning => {
                    state.snapshot.session_warning = false;
                    Commit::Publish
                }
                SessionStatus::Active => Commit::Unchanged,
                SessionStatus::Warning if !state.snapshot.session_warning => {
                    state.snapshot.session_warning = true;
                    info!(
                        minutes_left = state.snapshot.session.minutes_until_expiry(now, &timeouts),
                        "Session about to expire"
                    );
                    Commit::Publish
                }
                SessionStatus::Warning => Commit::Unchanged,
                SessionStatus::Expired => {
                    state.clear(SignOutReason::Inactivity);
                    info!("Session expired after inactivity");
                    Commit::Persist
                }
            };
            (commit, status)
        })
    }

    // ===== Hydration =====

    /// Load the persisted session once.
    ///
    /// Never fails: an unreadable record starts the session signed out, and
    /// a stored session that went stale while the app was closed is cleared
    /// before `Ready` is published.
    pub async fn hydrate(&self) {
        if !self.is_loading() {
            return;
        }

        let storage = Arc::clone(&self.inner.storage);
        let loaded = match tokio::task::spawn_blocking(move || load_session(storage.as_ref())).await {
            Ok(Ok(data)) => Hydrated::Loaded(data),
            Ok(Err(e)) => {
                warn!(error = %e, "Stored session unreadable, starting signed out");
                Hydrated::Corrupt
            }
            Err(e) => {
                warn!(error = %e, "Session hydration task failed, starting signed out");
                Hydrated::Loaded(None)
            }
        };

        self.apply_hydrated(loaded);
    }

    /// Wait for hydration and return the first ready snapshot
    pub async fn wait_until_ready(&self) -> SessionSnapshot {
        let mut rx = self.subscribe();
        let snapshot = match rx.wait_for(|s| !s.is_loading()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        snapshot
    }

    fn apply_hydrated(&self, loaded: Hydrated) {
        let timeouts = self.inner.timeouts;
        self.commit(|state, now| {
            if !state.snapshot.is_loading() {
                return (Commit::Unchanged, ());
            }
            state.snapshot.hydration = HydrationState::Ready;
            let pending_user = state.pending_user.take();

            if state.changed_while_pending {
                debug!("Session changed during hydration, keeping in-memory state");
                return (Commit::Publish, ());
            }

            let mut commit = match loaded {
                Hydrated::Corrupt => Commit::Persist,
                Hydrated::Loaded(None) => {
                    debug!("No stored session");
                    Commit::Publish
                }
                Hydrated::Loaded(Some(data)) if data.is_signed_in() => {
                    state.snapshot.session = data;
                    if state.snapshot.session.is_expired(now, &timeouts) {
                        state.clear(SignOutReason::Inactivity);
                        info!("Stored session expired while away");
                        Commit::Persist
                    } else {
                        state.snapshot.ever_authenticated = true;
                        info!("Session restored");
                        Commit::Publish
                    }
                }
                Hydrated::Loaded(Some(data)) => {
                    state.snapshot.session = data;
                    Commit::Publish
                }
            };

            if let Some(user) = pending_user {
                state.snapshot.session.user = user;
                commit = Commit::Persist;
            }
            (commit, ())
        });
    }

    fn sign_out(&self, reason: SignOutReason) {
        self.commit(|state, _| {
            if state.snapshot.session.is_signed_in() {
                info!(?reason, "Signing out");
            }
            state.clear(reason);
            // Always rewrite storage so a stale record cannot outlive a logout
            (Commit::Persist, ())
        });
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit<R>(&self, mutate: impl FnOnce(&mut State, DateTime<Utc>) -> (Commit, R)) -> R {
        let mut state = self.lock();
        let now = self.inner.clock.now();
        let (commit, result) = mutate(&mut state, now);

        match commit {
            Commit::Unchanged => return result,
            Commit::Publish => {}
            Commit::Persist => {
                if state.snapshot.is_loading() {
                    state.changed_while_pending = true;
                }
                if let Err(e) = save_session(self.inner.storage.as_ref(), &state.snapshot.session) {
                    warn!(error = %e, "Failed to persist session");
                }
            }
        }

        let snapshot = state.snapshot.clone();
        self.inner.tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }
}

enum Hydrated {
    Loaded(Option<SessionData>),
    Corrupt,
}
