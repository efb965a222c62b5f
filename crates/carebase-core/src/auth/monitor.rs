//! Background enforcement of the inactivity timeout.
//!
//! The monitor is owned by whatever surface mounts it. While the session is
//! signed in it runs the periodic timeout check and forwards activity events
//! to the manager; while signed out it keeps no timer and drops activity.
//! Dropping the handle tears everything down.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::activity::ActivityEvent;
use super::manager::{SessionManager, SessionSnapshot};

/// Queue depth for raw activity events.
/// Anything beyond this would be throttled away anyway.
const ACTIVITY_BUFFER: usize = 64;

/// Fallback when the configured interval cannot be represented
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct InactivityMonitor {
    task: JoinHandle<()>,
    activity_tx: mpsc::Sender<ActivityEvent>,
}

impl InactivityMonitor {
    /// Start monitoring `manager`. Must be called inside a tokio runtime.
    pub fn spawn(manager: SessionManager) -> Self {
        let (activity_tx, activity_rx) = mpsc::channel(ACTIVITY_BUFFER);
        let task = tokio::spawn(run(manager, activity_rx));
        Self { task, activity_tx }
    }

    /// Where the UI layer reports raw interaction events
    pub fn activity(&self) -> ActivitySink {
        ActivitySink {
            tx: self.activity_tx.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Cloneable sender for activity events.
#[derive(Clone)]
pub struct ActivitySink {
    tx: mpsc::Sender<ActivityEvent>,
}

impl ActivitySink {
    /// Report an event without blocking.
    /// Returns false if the monitor is gone or its queue is full.
    pub fn notify(&self, event: ActivityEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

fn signed_in(session: &mut watch::Receiver<SessionSnapshot>) -> bool {
    session.borrow_and_update().session.is_signed_in()
}

async fn run(manager: SessionManager, mut activity: mpsc::Receiver<ActivityEvent>) {
    let mut session = manager.subscribe();
    let period = manager
        .timeouts()
        .check_interval
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_CHECK_INTERVAL);

    loop {
        // Dormant until a token shows up
        while !signed_in(&mut session) {
            tokio::select! {
                changed = session.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                event = activity.recv() => match event {
                    Some(event) => trace!(?event, "Dropping activity while signed out"),
                    None => return,
                },
            }
        }

        debug!(interval_secs = period.as_secs(), "Starting inactivity checks");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    manager.check_timeout();
                }
                changed = session.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                event = activity.recv() => match event {
                    Some(event) => {
                        manager.record_activity(event);
                    }
                    None => return,
                },
            }

            if !signed_in(&mut session) {
                debug!("Session ended, stopping inactivity checks");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::{Clock, ManualClock};
    use crate::auth::session::SessionTimeouts;
    use crate::auth::storage::MemoryStorage;
    use chrono::Utc;
    use std::sync::Arc;

    async fn signed_in_manager() -> (SessionManager, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let manager = SessionManager::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(clock.clone()),
            SessionTimeouts::default(),
        );
        manager.hydrate().await;
        manager.set_token(Some("abc".to_string()));
        (manager, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check_expires_session() {
        let (manager, clock) = signed_in_manager().await;
        let monitor = InactivityMonitor::spawn(manager.clone());
        tokio::task::yield_now().await;

        clock.advance(chrono::Duration::minutes(15) + chrono::Duration::seconds(1));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(manager.token(), None);
        assert!(monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check_raises_warning() {
        let (manager, clock) = signed_in_manager().await;
        let _monitor = InactivityMonitor::spawn(manager.clone());
        tokio::task::yield_now().await;

        clock.advance(chrono::Duration::seconds(13 * 60 + 30));
        tokio::time::sleep(Duration::from_secs(61)).await;

        let snap = manager.snapshot();
        assert!(snap.session_warning);
        assert_eq!(snap.token(), Some("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_is_forwarded() {
        let (manager, clock) = signed_in_manager().await;
        let monitor = InactivityMonitor::spawn(manager.clone());
        tokio::task::yield_now().await;

        clock.advance(chrono::Duration::minutes(5));
        assert!(monitor.activity().notify(ActivityEvent::KeyDown));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.snapshot().last_activity(), Some(clock.now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dormant_until_signed_in() {
        let clock = ManualClock::new(Utc::now());
        let manager = SessionManager::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(clock.clone()),
            SessionTimeouts::default(),
        );
        manager.hydrate().await;
        let monitor = InactivityMonitor::spawn(manager.clone());
        tokio::task::yield_now().await;

        // Activity while signed out creates nothing
        monitor.activity().notify(ActivityEvent::PointerDown);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.snapshot().session.is_empty());

        manager.set_token(Some("abc".to_string()));
        tokio::task::yield_now().await;
        clock.advance(chrono::Duration::minutes(16));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(manager.token(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_checks() {
        let (manager, clock) = signed_in_manager().await;
        let monitor = InactivityMonitor::spawn(manager.clone());
        let sink = monitor.activity();
        tokio::task::yield_now().await;

        monitor.shutdown();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!sink.notify(ActivityEvent::KeyDown));

        clock.advance(chrono::Duration::minutes(20));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.token(), Some("abc".to_string()));

        // Remounting re-establishes enforcement
        let _monitor = InactivityMonitor::spawn(manager.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.token(), None);
    }
}
