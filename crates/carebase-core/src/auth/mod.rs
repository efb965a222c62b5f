//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: token, user and last-activity state with hydration
//! - `InactivityMonitor`: periodic timeout checks and activity forwarding
//! - `SessionStorage`: durable backends (JSON file, OS keychain, memory)
//! - `AccessDecision`: what a consuming surface should render
//!
//! Sessions are signed out after 15 minutes without user interaction, with a
//! warning raised during the last 2 minutes.

pub mod activity;
pub mod clock;
pub mod credentials;
pub mod gate;
pub mod manager;
pub mod monitor;
pub mod session;
pub mod storage;

pub use activity::{ActivityEvent, ActivityThrottle, UnknownActivityEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::KeyringStorage;
pub use gate::AccessDecision;
pub use manager::{HydrationState, SessionManager, SessionSnapshot, SignOutReason};
pub use monitor::{ActivitySink, InactivityMonitor};
pub use session::{SessionData, SessionStatus, SessionTimeouts};
pub use storage::{get_stored_token, FileStorage, MemoryStorage, SessionStorage};
