//! Portal realtime core
//!
//! Identity resolution, the per-identity notification feed and its fan-out
//! to alert channels, and sidebar classification of conversation records.
//! Everything external (session store, directory, feed transport, alert
//! surfaces) is reached through the traits in `portal_connectors`.

pub mod classifier;
pub mod consumer;
pub mod fan_out;
pub mod identity;
mod identity_command;
pub mod logging;
pub mod paths;
pub mod subscription;

pub use classifier::{classify, ConversationBuckets, SidebarEntry};
pub use consumer::NotificationConsumer;
pub use fan_out::{FanOutConfig, NotificationFanOut};
pub use identity::{IdentityEvent, IdentityHandle, IdentityState, ResolverConfig};
pub use subscription::{EventChannel, InboundHandler};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
