//! Session and authentication core for the carebase home-care platform.
//!
//! Keeps the bearer token, user profile and last-activity timestamp in sync
//! with durable storage, and signs the user out after a period of
//! inactivity.

pub mod api;
pub mod auth;
pub mod config;

pub use auth::{
    get_stored_token, AccessDecision, ActivityEvent, InactivityMonitor, SessionManager,
    SessionSnapshot, SessionStatus, SessionStorage,
};
pub use config::Config;
