//! Portal Connectors
//!
//! Boundary traits for everything the realtime core consumes from the
//! outside world: the session store, the role/profile directory, the live
//! feed transport, the cache layer and the platform alert channels.
//! Every trait is object-safe so callers inject `Arc<dyn Trait>`.

pub mod local;
pub mod rest;

use std::time::Duration;

use futures::future::BoxFuture;
use portal_protocol::{FeedFilter, FeedMessage, ProfileRow, RoleRow, Session, SessionChange};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

pub use local::{
    ConsoleSound, ConsoleToasts, LocalDirectory, LocalFeed, LocalNotifier, LocalSessionStore,
    RecordingCache,
};
pub use rest::RestDirectory;

/// Errors that can occur in connectors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

/// Authentication session source.
pub trait SessionStore: Send + Sync {
    /// One-shot lookup of whatever session is active right now.
    fn current_session(&self) -> BoxFuture<'_, ConnectorResult<Option<Session>>>;

    /// Push stream of session changes. Dropping the receiver unsubscribes.
    fn subscribe_changes(&self) -> broadcast::Receiver<SessionChange>;

    /// Remote sign-out.
    fn sign_out(&self) -> BoxFuture<'_, ConnectorResult<()>>;
}

// ---------------------------------------------------------------------------
// Role / profile directory
// ---------------------------------------------------------------------------

/// Role and profile lookup for a user id.
pub trait Directory: Send + Sync {
    /// Zero or more role rows, in backend order.
    fn roles<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, ConnectorResult<Vec<RoleRow>>>;

    /// Zero or one profile row.
    fn profile<'a>(&'a self, user_id: &'a str)
        -> BoxFuture<'a, ConnectorResult<Option<ProfileRow>>>;
}

// ---------------------------------------------------------------------------
// Live feed transport
// ---------------------------------------------------------------------------

/// Opaque handle identifying one open feed subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedHandle {
    pub id: String,
    pub topic: String,
}

/// An open feed subscription and its delivery queue
#[derive(Debug)]
pub struct FeedSubscription {
    pub handle: FeedHandle,
    pub messages: mpsc::Receiver<FeedMessage>,
}

/// Server-push transport for row change feeds.
pub trait FeedTransport: Send + Sync {
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        filter: FeedFilter,
    ) -> BoxFuture<'a, ConnectorResult<FeedSubscription>>;

    fn unsubscribe(&self, handle: FeedHandle) -> BoxFuture<'_, ()>;
}

// ---------------------------------------------------------------------------
// Cache invalidation
// ---------------------------------------------------------------------------

/// Fire-and-forget invalidation signal to the data-fetching layer.
pub trait CacheSink: Send + Sync {
    fn invalidate(&self, key: &str);
}

// ---------------------------------------------------------------------------
// Alert channels
// ---------------------------------------------------------------------------

/// A preloaded alert sound.
pub trait AlertSound: Send + Sync {
    /// Rewind to position zero and play.
    fn play_from_start(&self) -> ConnectorResult<()>;
}

/// Platform desktop notification permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// The user has not been asked yet
    Default,
    Granted,
    Denied,
}

/// A shown desktop alert. `clicked` resolves when the user clicks it.
#[derive(Debug)]
pub struct DesktopAlert {
    pub id: String,
    pub clicked: oneshot::Receiver<()>,
}

/// Native desktop notifications.
pub trait DesktopNotifier: Send + Sync {
    fn permission(&self) -> Permission;

    fn request_permission(&self) -> BoxFuture<'_, ConnectorResult<Permission>>;

    fn show(&self, title: &str, body: &str) -> ConnectorResult<DesktopAlert>;

    fn close(&self, alert_id: &str);

    /// Bring the application window to the foreground.
    fn focus_window(&self);
}

/// In-app transient message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub body: String,
    pub duration: Duration,
}

/// In-app toast surface.
pub trait ToastSink: Send + Sync {
    fn show(&self, toast: Toast) -> ConnectorResult<()>;
}
