use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Inactivity timeout in minutes.
/// Sessions are signed out after 15 minutes without a qualifying interaction.
pub const INACTIVITY_TIMEOUT_MINUTES: i64 = 15;

/// Minutes before expiry during which the UI is told to warn the user
pub const WARNING_WINDOW_MINUTES: i64 = 2;

/// How often the inactivity check runs
pub const CHECK_INTERVAL_SECS: i64 = 60;

/// Minimum spacing between two accepted activity updates
pub const ACTIVITY_THROTTLE_SECS: i64 = 30;

/// Timing parameters for the inactivity state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub inactivity: Duration,
    pub warning_window: Duration,
    pub check_interval: Duration,
    pub activity_throttle: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            inactivity: Duration::minutes(INACTIVITY_TIMEOUT_MINUTES),
            warning_window: Duration::minutes(WARNING_WINDOW_MINUTES),
            check_interval: Duration::seconds(CHECK_INTERVAL_SECS),
            activity_throttle: Duration::seconds(ACTIVITY_THROTTLE_SECS),
        }
    }
}

impl SessionTimeouts {
    /// Idle time after which the warning is raised
    pub fn warn_after(&self) -> Duration {
        self.inactivity - self.warning_window
    }
}

/// Where a signed-in session stands relative to its inactivity timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    SignedOut,
    Active,
    Warning,
    Expired,
}

/// The persisted session record.
///
/// Serialized as `{"token": .., "user": .., "lastActivity": ..}`. The user
/// record is whatever the identity backend returned and is never inspected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionData {
    pub fn is_signed_in(&self) -> bool {
        self.token.is_some()
    }

    /// True when nothing at all is held
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.user.is_none() && self.last_activity.is_none()
    }

    /// Time since the last accepted activity.
    /// A timestamp in the future (clock skew) counts as zero idle time.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_activity
            .map(|at| (now - at).max(Duration::zero()))
    }

    pub fn status_at(&self, now: DateTime<Utc>, timeouts: &SessionTimeouts) -> SessionStatus {
        if self.token.is_none() {
            return SessionStatus::SignedOut;
        }
        // A token without an activity stamp cannot be aged, so it is stale
        let Some(idle) = self.idle_for(now) else {
            return SessionStatus::Expired;
        };

        if idle >= timeouts.inactivity {
            SessionStatus::Expired
        } else if idle >= timeouts.warn_after() {
            SessionStatus::Warning
        } else {
            SessionStatus::Active
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeouts: &SessionTimeouts) -> bool {
        self.status_at(now, timeouts) == SessionStatus::Expired
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>, timeouts: &SessionTimeouts) -> Option<Duration> {
        self.token.as_ref()?;
        let idle = self.idle_for(now)?;
        Some((timeouts.inactivity - idle).max(Duration::zero()))
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>, timeouts: &SessionTimeouts) -> i64 {
        self.time_until_expiry(now, timeouts)
            .map(|d| d.num_minutes())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in(idle: Duration, now: DateTime<Utc>) -> SessionData {
        SessionData {
            token: Some("abc".to_string()),
            user: None,
            last_activity: Some(now - idle),
        }
    }

    #[test]
    fn test_status_signed_out_without_token() {
        let now = Utc::now();
        let data = SessionData {
            token: None,
            user: Some(serde_json::json!({"name": "Ada"})),
            last_activity: Some(now),
        };
        assert_eq!(data.status_at(now, &SessionTimeouts::default()), SessionStatus::SignedOut);
    }

    #[test]
    fn test_status_boundaries() {
        let now = Utc::now();
        let t = SessionTimeouts::default();

        assert_eq!(signed_in(Duration::minutes(5), now).status_at(now, &t), SessionStatus::Active);
        assert_eq!(
            signed_in(Duration::minutes(13) - Duration::seconds(1), now).status_at(now, &t),
            SessionStatus::Active
        );
        assert_eq!(signed_in(Duration::minutes(13), now).status_at(now, &t), SessionStatus::Warning);
        assert_eq!(
            signed_in(Duration::seconds(13 * 60 + 30), now).status_at(now, &t),
            SessionStatus::Warning
        );
        assert_eq!(signed_in(Duration::minutes(15), now).status_at(now, &t), SessionStatus::Expired);
        assert_eq!(
            signed_in(Duration::minutes(15) + Duration::seconds(1), now).status_at(now, &t),
            SessionStatus::Expired
        );
    }

    #[test]
    fn test_future_activity_counts_as_active() {
        let now = Utc::now();
        let data = signed_in(Duration::minutes(-10), now);
        assert_eq!(data.idle_for(now), Some(Duration::zero()));
        assert_eq!(data.status_at(now, &SessionTimeouts::default()), SessionStatus::Active);
    }

    #[test]
    fn test_token_without_activity_is_expired() {
        let now = Utc::now();
        let data = SessionData {
            token: Some("abc".to_string()),
            ..Default::default()
        };
        assert!(data.is_expired(now, &SessionTimeouts::default()));
    }

    #[test]
    fn test_minutes_until_expiry() {
        let now = Utc::now();
        let t = SessionTimeouts::default();
        assert_eq!(signed_in(Duration::minutes(5), now).minutes_until_expiry(now, &t), 10);
        assert_eq!(signed_in(Duration::minutes(20), now).minutes_until_expiry(now, &t), 0);
        assert_eq!(SessionData::default().minutes_until_expiry(now, &t), 0);
    }

    #[test]
    fn test_serialized_field_names() {
        let now = Utc::now();
        let json = serde_json::to_value(signed_in(Duration::zero(), now)).unwrap();
        assert!(json.get("lastActivity").is_some());
        assert_eq!(json["token"], "abc");

        // Missing fields fall back to signed out
        let parsed: SessionData = serde_json::from_str("{}").unwrap();
        assert!(parsed.is_empty());
    }
}
