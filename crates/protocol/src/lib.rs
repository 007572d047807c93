//! Portal Protocol
//!
//! Shared types for the portal realtime core: identities and sessions,
//! inbound notification events, conversation records and feed messages.
//! These types mirror the backend's JSON rows and are serde-serializable.

use uuid::Uuid;

pub mod conversation;
pub mod feed;
pub mod types;

pub use conversation::*;
pub use feed::*;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
