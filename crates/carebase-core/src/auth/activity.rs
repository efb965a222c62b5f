//! User-activity observation.
//!
//! Only discrete interactions reset the inactivity clock. Continuous signals
//! (pointer moves, scrolling) fire far too often and are ignored outright.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw interaction event reported by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEvent {
    PointerDown,
    KeyDown,
    TouchStart,
    PointerMove,
    Scroll,
    Wheel,
    Resize,
    Focus,
}

impl ActivityEvent {
    /// Whether this event counts as user activity
    pub fn is_qualifying(&self) -> bool {
        matches!(
            self,
            ActivityEvent::PointerDown | ActivityEvent::KeyDown | ActivityEvent::TouchStart
        )
    }
}

#[derive(Debug, Error)]
#[error("Unknown activity event: {0}")]
pub struct UnknownActivityEvent(pub String);

impl FromStr for ActivityEvent {
    type Err = UnknownActivityEvent;

    /// Accepts DOM event names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pointerdown" | "mousedown" | "click" => Ok(ActivityEvent::PointerDown),
            "keydown" => Ok(ActivityEvent::KeyDown),
            "touchstart" => Ok(ActivityEvent::TouchStart),
            "pointermove" | "mousemove" => Ok(ActivityEvent::PointerMove),
            "scroll" => Ok(ActivityEvent::Scroll),
            "wheel" => Ok(ActivityEvent::Wheel),
            "resize" => Ok(ActivityEvent::Resize),
            "focus" => Ok(ActivityEvent::Focus),
            _ => Err(UnknownActivityEvent(s.to_string())),
        }
    }
}

/// Rate limit for activity updates.
///
/// Accepts an event only if nothing has been accepted yet, or at least
/// `interval` has passed since the last accepted one.
#[derive(Debug, Clone)]
pub struct ActivityThrottle {
    interval: Duration,
    last_accepted: Option<DateTime<Utc>>,
}

impl ActivityThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Try to pass the gate at `now`; records the time when accepted
    pub fn try_accept(&mut self, now: DateTime<Utc>) -> bool {
        let open = match self.last_accepted {
            None => true,
            // A clock that went backwards reopens the gate
            Some(last) => now < last || now - last >= self.interval,
        };
        if open {
            self.last_accepted = Some(now);
        }
        open
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }

    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualifying_events() {
        assert!(ActivityEvent::PointerDown.is_qualifying());
        assert!(ActivityEvent::KeyDown.is_qualifying());
        assert!(ActivityEvent::TouchStart.is_qualifying());

        assert!(!ActivityEvent::PointerMove.is_qualifying());
        assert!(!ActivityEvent::Scroll.is_qualifying());
        assert!(!ActivityEvent::Wheel.is_qualifying());
    }

    #[test]
    fn test_from_str() {
        assert_eq!("keydown".parse::<ActivityEvent>().unwrap(), ActivityEvent::KeyDown);
        assert_eq!(" Click ".parse::<ActivityEvent>().unwrap(), ActivityEvent::PointerDown);
        assert_eq!("mousemove".parse::<ActivityEvent>().unwrap(), ActivityEvent::PointerMove);

        let err = "blink".parse::<ActivityEvent>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown activity event: blink");
    }

    #[test]
    fn test_throttle_burst_accepts_once() {
        let mut throttle = ActivityThrottle::new(Duration::seconds(30));
        let start = Utc::now();

        let accepted = (0..100)
            .filter(|i| throttle.try_accept(start + Duration::milliseconds(i * 10)))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(throttle.last_accepted(), Some(start));
    }

    #[test]
    fn test_throttle_reopens_after_interval() {
        let mut throttle = ActivityThrottle::new(Duration::seconds(30));
        let start = Utc::now();

        assert!(throttle.try_accept(start));
        assert!(!throttle.try_accept(start + Duration::seconds(29)));
        assert!(throttle.try_accept(start + Duration::seconds(31)));
    }

    #[test]
    fn test_throttle_reset() {
        let mut throttle = ActivityThrottle::new(Duration::seconds(30));
        let start = Utc::now();

        assert!(throttle.try_accept(start));
        throttle.reset();
        assert!(throttle.try_accept(start + Duration::seconds(1)));
    }
}
