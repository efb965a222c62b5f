//! REST client module for the identity backend.
//!
//! The session core never talks to the network itself; this module obtains
//! the bearer token and user profile that the `SessionManager` stores.

pub mod client;
pub mod error;

pub use client::{AuthClient, DEFAULT_BASE_URL};
pub use error::ApiError;
