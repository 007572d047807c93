//! In-process implementations of every connector trait.
//!
//! Backs the `portal replay` command and the test suites. State lives in
//! memory; nothing leaves the process.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use portal_protocol::{
    new_id, FeedFilter, FeedMessage, FeedStatus, InboundEvent, ProfileRow, Role, RoleRow, Session,
    SessionChange,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    AlertSound, CacheSink, ConnectorError, ConnectorResult, DesktopAlert, DesktopNotifier,
    Directory, FeedHandle, FeedSubscription, FeedTransport, Permission, SessionStore, Toast,
    ToastSink,
};

const SESSION_CHANGE_CAPACITY: usize = 64;
const FEED_QUEUE_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// LocalSessionStore
// ---------------------------------------------------------------------------

/// Session store held in memory. `sign_in` / `refresh_token` push the same
/// change events a hosted auth service would.
pub struct LocalSessionStore {
    session: Mutex<Option<Session>>,
    changes: broadcast::Sender<SessionChange>,
    reject_sign_out: AtomicBool,
    sign_out_calls: AtomicUsize,
}

impl LocalSessionStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(SESSION_CHANGE_CAPACITY);
        Self {
            session: Mutex::new(None),
            changes,
            reject_sign_out: AtomicBool::new(false),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    /// Start with `session` already active (no change event is pushed).
    pub fn with_session(session: Session) -> Self {
        let store = Self::new();
        *lock(&store.session) = Some(session);
        store
    }

    pub fn sign_in(&self, session: Session) {
        *lock(&self.session) = Some(session.clone());
        self.push(SessionChange::signed_in(session));
    }

    pub fn refresh_token(&self, session: Session) {
        *lock(&self.session) = Some(session.clone());
        self.push(SessionChange::token_refreshed(session));
    }

    /// Push an arbitrary change without touching the stored session.
    pub fn push(&self, change: SessionChange) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.changes.send(change);
    }

    /// Make subsequent remote sign-outs fail.
    pub fn set_reject_sign_out(&self, reject: bool) {
        self.reject_sign_out.store(reject, Ordering::SeqCst);
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Option<Session> {
        lock(&self.session).clone()
    }
}

impl Default for LocalSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for LocalSessionStore {
    fn current_session(&self) -> BoxFuture<'_, ConnectorResult<Option<Session>>> {
        let session = self.session();
        async move { Ok(session) }.boxed()
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    fn sign_out(&self) -> BoxFuture<'_, ConnectorResult<()>> {
        async move {
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_sign_out.load(Ordering::SeqCst) {
                return Err(ConnectorError::Backend("sign-out rejected".to_string()));
            }
            let had_session = lock(&self.session).take().is_some();
            if had_session {
                self.push(SessionChange::signed_out());
            }
            Ok(())
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// LocalDirectory
// ---------------------------------------------------------------------------

/// Role/profile rows keyed by user id, with optional per-user latency and
/// failure injection.
#[derive(Default)]
pub struct LocalDirectory {
    roles: DashMap<String, Vec<Role>>,
    profiles: DashMap<String, String>,
    latency: DashMap<String, Duration>,
    failing: DashMap<String, String>,
    role_queries: AtomicUsize,
}

impl LocalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_roles(&self, user_id: &str, roles: Vec<Role>) {
        self.roles.insert(user_id.to_string(), roles);
    }

    pub fn set_role(&self, user_id: &str, role: Role) {
        self.set_roles(user_id, vec![role]);
    }

    pub fn set_profile(&self, user_id: &str, display_name: &str) {
        self.profiles
            .insert(user_id.to_string(), display_name.to_string());
    }

    /// Delay every lookup for `user_id` by `latency`.
    pub fn set_latency(&self, user_id: &str, latency: Duration) {
        self.latency.insert(user_id.to_string(), latency);
    }

    /// Make every lookup for `user_id` fail with `message`.
    pub fn set_failing(&self, user_id: &str, message: &str) {
        self.failing.insert(user_id.to_string(), message.to_string());
    }

    pub fn role_queries(&self) -> usize {
        self.role_queries.load(Ordering::SeqCst)
    }

    async fn simulate(&self, user_id: &str) -> ConnectorResult<()> {
        let latency = self.latency.get(user_id).map(|d| *d);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.failing.get(user_id).map(|m| m.clone());
        match failure {
            Some(message) => Err(ConnectorError::Backend(message)),
            None => Ok(()),
        }
    }
}

impl Directory for LocalDirectory {
    fn roles<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, ConnectorResult<Vec<RoleRow>>> {
        self.lookup_roles(user_id).boxed()
    }

    fn profile<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, ConnectorResult<Option<ProfileRow>>> {
        self.lookup_profile(user_id).boxed()
    }
}

impl LocalDirectory {
    async fn lookup_roles(&self, user_id: &str) -> ConnectorResult<Vec<RoleRow>> {
        self.role_queries.fetch_add(1, Ordering::SeqCst);
        self.simulate(user_id).await?;
        let roles = self
            .roles
            .get(user_id)
            .map(|r| r.iter().map(|role| RoleRow { role: *role }).collect())
            .unwrap_or_default();
        Ok(roles)
    }

    async fn lookup_profile(&self, user_id: &str) -> ConnectorResult<Option<ProfileRow>> {
        self.simulate(user_id).await?;
        Ok(self.profiles.get(user_id).map(|name| ProfileRow {
            display_name: Some(name.clone()),
        }))
    }
}

// ---------------------------------------------------------------------------
// LocalFeed
// ---------------------------------------------------------------------------

struct LocalSubscription {
    topic: String,
    filter: FeedFilter,
    tx: mpsc::Sender<FeedMessage>,
}

/// In-process live feed. `publish` routes an inserted row to every
/// subscription whose filter matches its owner.
#[derive(Default)]
pub struct LocalFeed {
    subscriptions: DashMap<String, LocalSubscription>,
    subscribe_latency: Mutex<Duration>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl LocalFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay subscribe completion, simulating a slow channel join.
    pub fn set_subscribe_latency(&self, latency: Duration) {
        *lock(&self.subscribe_latency) = latency;
    }

    /// Deliver an inserted notification row. Returns the number of
    /// subscriptions it was routed to.
    pub fn publish(&self, event: &InboundEvent) -> usize {
        let mut delivered = 0;
        for entry in self.subscriptions.iter() {
            let sub = entry.value();
            if sub.filter.value != event.owner_id {
                continue;
            }
            let msg = FeedMessage::Insert {
                record: event.clone(),
            };
            if sub.tx.try_send(msg).is_ok() {
                delivered += 1;
            } else {
                warn!(
                    component = "local_feed",
                    event = "local_feed.publish.dropped",
                    topic = %sub.topic,
                    "Feed queue full or closed, message dropped"
                );
            }
        }
        delivered
    }

    /// Send a raw message to every subscription on `topic`, bypassing the
    /// owner filter.
    pub fn inject(&self, topic: &str, msg: FeedMessage) -> usize {
        let mut delivered = 0;
        for entry in self.subscriptions.iter() {
            if entry.value().topic == topic && entry.value().tx.try_send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Topics with an open subscription
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().topic.clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    async fn open(&self, topic: &str, filter: FeedFilter) -> ConnectorResult<FeedSubscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *lock(&self.subscribe_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let (tx, messages) = mpsc::channel(FEED_QUEUE_CAPACITY);
        tx.try_send(FeedMessage::Status(FeedStatus::Subscribed))
            .map_err(|_| ConnectorError::ChannelClosed)?;

        let handle = FeedHandle {
            id: new_id(),
            topic: topic.to_string(),
        };
        self.subscriptions.insert(
            handle.id.clone(),
            LocalSubscription {
                topic: topic.to_string(),
                filter,
                tx,
            },
        );
        debug!(
            component = "local_feed",
            event = "local_feed.subscribed",
            topic = %topic,
            handle_id = %handle.id,
            "Local feed subscription opened"
        );
        Ok(FeedSubscription { handle, messages })
    }
}

impl FeedTransport for LocalFeed {
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        filter: FeedFilter,
    ) -> BoxFuture<'a, ConnectorResult<FeedSubscription>> {
        self.open(topic, filter).boxed()
    }

    fn unsubscribe(&self, handle: FeedHandle) -> BoxFuture<'_, ()> {
        async move {
            self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
            // Dropping the sender closes the subscriber's queue.
            self.subscriptions.remove(&handle.id);
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Cache, sound, toasts
// ---------------------------------------------------------------------------

/// Records every invalidated key in order.
#[derive(Default)]
pub struct RecordingCache {
    keys: Mutex<Vec<String>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidations(&self) -> Vec<String> {
        lock(&self.keys).clone()
    }
}

impl CacheSink for RecordingCache {
    fn invalidate(&self, key: &str) {
        lock(&self.keys).push(key.to_string());
    }
}

/// Terminal bell as the alert sound.
#[derive(Default)]
pub struct ConsoleSound {
    bell: bool,
    plays: AtomicUsize,
}

impl ConsoleSound {
    pub fn new(bell: bool) -> Self {
        Self {
            bell,
            plays: AtomicUsize::new(0),
        }
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }
}

impl AlertSound for ConsoleSound {
    fn play_from_start(&self) -> ConnectorResult<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        if self.bell {
            let mut out = std::io::stdout();
            out.write_all(b"\x07")
                .and_then(|_| out.flush())
                .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

/// Toasts printed to stdout (when `echo` is set) and kept for inspection.
#[derive(Default)]
pub struct ConsoleToasts {
    echo: bool,
    shown: Mutex<Vec<Toast>>,
}

impl ConsoleToasts {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn shown(&self) -> Vec<Toast> {
        lock(&self.shown).clone()
    }
}

impl ToastSink for ConsoleToasts {
    fn show(&self, toast: Toast) -> ConnectorResult<()> {
        if self.echo {
            println!("[toast] {}: {}", toast.title, toast.body);
        }
        lock(&self.shown).push(toast);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LocalNotifier
// ---------------------------------------------------------------------------

/// Desktop notifier simulation with scriptable permission and clicks.
pub struct LocalNotifier {
    permission: Mutex<Permission>,
    answer: Permission,
    requests: AtomicUsize,
    shown: Mutex<Vec<(String, String, String)>>,
    closed: Mutex<Vec<String>>,
    clicks: Mutex<HashMap<String, oneshot::Sender<()>>>,
    focus_calls: AtomicUsize,
}

impl LocalNotifier {
    /// `permission` is the current state; `answer` is what a permission
    /// prompt resolves to.
    pub fn new(permission: Permission, answer: Permission) -> Self {
        Self {
            permission: Mutex::new(permission),
            answer,
            requests: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            clicks: Mutex::new(HashMap::new()),
            focus_calls: AtomicUsize::new(0),
        }
    }

    pub fn granted() -> Self {
        Self::new(Permission::Granted, Permission::Granted)
    }

    pub fn permission_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// (id, title, body) of every alert shown
    pub fn shown(&self) -> Vec<(String, String, String)> {
        lock(&self.shown).clone()
    }

    pub fn closed(&self) -> Vec<String> {
        lock(&self.closed).clone()
    }

    pub fn focus_calls(&self) -> usize {
        self.focus_calls.load(Ordering::SeqCst)
    }

    /// Simulate a user click. Returns false if the alert is gone.
    pub fn click(&self, alert_id: &str) -> bool {
        match lock(&self.clicks).remove(alert_id) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

impl DesktopNotifier for LocalNotifier {
    fn permission(&self) -> Permission {
        *lock(&self.permission)
    }

    fn request_permission(&self) -> BoxFuture<'_, ConnectorResult<Permission>> {
        async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            *lock(&self.permission) = self.answer;
            Ok(self.answer)
        }
        .boxed()
    }

    fn show(&self, title: &str, body: &str) -> ConnectorResult<DesktopAlert> {
        if self.permission() != Permission::Granted {
            return Err(ConnectorError::PermissionDenied);
        }
        let id = new_id();
        let (tx, clicked) = oneshot::channel();
        lock(&self.clicks).insert(id.clone(), tx);
        lock(&self.shown).push((id.clone(), title.to_string(), body.to_string()));
        info!(
            component = "local_notifier",
            event = "local_notifier.shown",
            alert_id = %id,
            title = %title,
            "Desktop alert shown"
        );
        Ok(DesktopAlert { id, clicked })
    }

    fn close(&self, alert_id: &str) {
        lock(&self.clicks).remove(alert_id);
        lock(&self.closed).push(alert_id.to_string());
    }

    fn focus_window(&self) {
        self.focus_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, owner: &str) -> InboundEvent {
        InboundEvent {
            id: id.to_string(),
            title: "Title".to_string(),
            body: "Body".to_string(),
            kind: "info".to_string(),
            owner_id: owner.to_string(),
            read: false,
            created_at: "2026-10-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn sign_out_clears_session_and_pushes_change() {
        let store = LocalSessionStore::with_session(Session::new("u1"));
        let mut rx = store.subscribe_changes();

        store.sign_out().await.expect("sign out");
        assert_eq!(store.session(), None);
        assert_eq!(rx.recv().await.expect("change"), SessionChange::signed_out());
        assert_eq!(store.sign_out_calls(), 1);
    }

    #[tokio::test]
    async fn rejected_sign_out_keeps_session() {
        let store = LocalSessionStore::with_session(Session::new("u1"));
        store.set_reject_sign_out(true);

        assert!(store.sign_out().await.is_err());
        assert!(store.session().is_some());
    }

    #[tokio::test]
    async fn directory_returns_rows_in_order() {
        let directory = LocalDirectory::new();
        directory.set_roles("u1", vec![Role::Employee, Role::Admin]);
        directory.set_profile("u1", "Robin");

        let roles = directory.roles("u1").await.expect("roles");
        assert_eq!(roles[0].role, Role::Employee);
        assert_eq!(roles.len(), 2);
        assert!(directory.roles("nobody").await.expect("roles").is_empty());
        assert_eq!(
            directory.profile("u1").await.expect("profile"),
            Some(ProfileRow {
                display_name: Some("Robin".to_string())
            })
        );

        directory.set_failing("u1", "boom");
        assert!(directory.roles("u1").await.is_err());
        assert_eq!(directory.role_queries(), 3);
    }

    #[tokio::test]
    async fn feed_routes_by_owner_and_closes_on_unsubscribe() {
        let feed = LocalFeed::new();
        let mut sub = feed
            .subscribe("notifications:u1", FeedFilter::notifications_for("u1"))
            .await
            .expect("subscribe");

        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(FeedStatus::Subscribed))
        );
        assert_eq!(feed.publish(&event("n1", "u2")), 0);
        assert_eq!(feed.publish(&event("n2", "u1")), 1);
        match sub.messages.recv().await {
            Some(FeedMessage::Insert { record }) => assert_eq!(record.id, "n2"),
            other => panic!("unexpected message: {:?}", other),
        }

        feed.unsubscribe(sub.handle.clone()).await;
        assert!(feed.active_topics().is_empty());
        assert_eq!(sub.messages.recv().await, None);
    }

    #[tokio::test]
    async fn notifier_click_resolves_alert() {
        let notifier = LocalNotifier::granted();
        let alert = notifier.show("Hi", "There").expect("show");

        assert!(notifier.click(&alert.id));
        assert!(alert.clicked.await.is_ok());
        assert!(!notifier.click("missing"));
    }

    #[test]
    fn notifier_refuses_without_permission() {
        let notifier = LocalNotifier::new(Permission::Denied, Permission::Denied);
        assert!(matches!(
            notifier.show("Hi", "There"),
            Err(ConnectorError::PermissionDenied)
        ));
    }
}
