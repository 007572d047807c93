//! Identity resolver: the single owner of "who is logged in and what can
//! they do".
//!
//! The resolver runs as a tokio task that owns the `IdentityState` and
//! processes session changes, refreshes and sign-outs one at a time.
//! Callers talk to it through `IdentityHandle`; reads are lock-free
//! through `ArcSwap`, and `watch` wakes anyone following changes.
//!
//! Every session change starts a resolution task. The task yields once
//! before querying so the store that pushed the change has fully returned,
//! then reports its outcome back over a queue. Each resolution carries a
//! monotonically increasing token; only the newest one may land, and older
//! tasks are aborted when superseded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use portal_connectors::{ConnectorError, Directory, SessionStore};
use portal_protocol::{Identity, Session};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::identity_command::{IdentityCommand, Resolved, Trigger};

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 16;

/// Resolver tuning
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How often to log while a resolution is still outstanding. Logging
    /// only; resolutions are never timed out.
    pub stall_warn_after: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            stall_warn_after: Duration::from_secs(10),
        }
    }
}

/// Published identity snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityState {
    pub identity: Identity,
    /// True from start until the first resolution lands, and again from the
    /// start of every later resolution until it lands.
    pub loading: bool,
    /// Token of the resolution that produced this state
    pub revision: u64,
}

impl IdentityState {
    fn initial() -> Self {
        Self {
            identity: Identity::empty(),
            loading: true,
            revision: 0,
        }
    }
}

/// Why a session was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnauthorizedReason {
    /// The directory has no role row for the user
    NoRole,
    /// The role or profile query failed
    LookupFailed(String),
}

/// Effects for navigation-level consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// A session existed but could not be authorized. It has been torn down
    /// and the user should be redirected to sign-in.
    Unauthorized {
        user_id: String,
        reason: UnauthorizedReason,
    },
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity resolver is not running")]
    ActorGone,

    #[error("Remote sign-out failed: {0}")]
    SignOut(#[source] ConnectorError),
}

#[derive(Debug)]
pub(crate) enum ResolutionOutcome {
    SignedOut,
    Authorized(Identity),
    Unauthorized {
        user_id: String,
        reason: UnauthorizedReason,
    },
}

// ---------------------------------------------------------------------------
// IdentityHandle
// ---------------------------------------------------------------------------

/// Handle to a running identity resolver (cheap to Clone).
#[derive(Clone)]
pub struct IdentityHandle {
    command_tx: mpsc::Sender<IdentityCommand>,
    snapshot: Arc<ArcSwap<IdentityState>>,
    changes: watch::Receiver<Arc<IdentityState>>,
    events: broadcast::Sender<IdentityEvent>,
}

impl IdentityHandle {
    /// Spawn the resolver. It immediately checks the active session and
    /// follows `store`'s change feed from then on.
    pub fn spawn(
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn Directory>,
        config: ResolverConfig,
    ) -> IdentityHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        let initial = Arc::new(IdentityState::initial());
        let snapshot = Arc::new(ArcSwap::new(initial.clone()));
        let (changes_tx, changes) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        // Subscribe before the one-shot check so no change can fall between them.
        let session_rx = store.subscribe_changes();

        let actor = ResolverActor {
            store,
            directory,
            config,
            state: IdentityState::initial(),
            snapshot: snapshot.clone(),
            changes_tx,
            events: events.clone(),
            token: 0,
            in_flight: None,
            waiters: Vec::new(),
            resolved_tx,
        };
        tokio::spawn(actor.run(command_rx, session_rx, resolved_rx));

        IdentityHandle {
            command_tx,
            snapshot,
            changes,
            events,
        }
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<IdentityState> {
        self.snapshot.load_full()
    }

    pub fn identity(&self) -> Identity {
        self.snapshot().identity.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().loading
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<IdentityState>> {
        self.changes.clone()
    }

    /// Redirect effects (unauthorized sessions).
    pub fn events(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<Arc<IdentityState>, IdentityError>
    where
        F: FnMut(&IdentityState) -> bool,
    {
        let mut rx = self.changes.clone();
        let state = rx
            .wait_for(|state| predicate(state.as_ref()))
            .await
            .map_err(|_| IdentityError::ActorGone)?;
        Ok(Arc::clone(&state))
    }

    /// Wait until no resolution is outstanding.
    pub async fn settled(&self) -> Result<Arc<IdentityState>, IdentityError> {
        self.wait_for(|state| !state.loading).await
    }

    /// Re-derive identity from the ambient session without waiting for a
    /// push event.
    pub async fn refresh(&self) -> Result<Identity, IdentityError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(IdentityCommand::Refresh { reply })
            .await
            .map_err(|_| IdentityError::ActorGone)?;
        rx.await.map_err(|_| IdentityError::ActorGone)
    }

    /// Clear the identity and sign out remotely. The identity is empty
    /// afterwards even if this returns `IdentityError::SignOut`.
    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(IdentityCommand::SignOut { reply })
            .await
            .map_err(|_| IdentityError::ActorGone)?;
        rx.await
            .map_err(|_| IdentityError::ActorGone)?
            .map_err(IdentityError::SignOut)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct ResolverActor {
    store: Arc<dyn SessionStore>,
    directory: Arc<dyn Directory>,
    config: ResolverConfig,
    state: IdentityState,
    snapshot: Arc<ArcSwap<IdentityState>>,
    changes_tx: watch::Sender<Arc<IdentityState>>,
    events: broadcast::Sender<IdentityEvent>,
    /// Latest issued resolution token
    token: u64,
    in_flight: Option<JoinHandle<()>>,
    waiters: Vec<oneshot::Sender<Identity>>,
    resolved_tx: mpsc::UnboundedSender<Resolved>,
}

impl ResolverActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<IdentityCommand>,
        mut session_rx: broadcast::Receiver<portal_protocol::SessionChange>,
        mut resolved_rx: mpsc::UnboundedReceiver<Resolved>,
    ) {
        self.begin(Trigger::Ambient);
        let mut session_feed_open = true;

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                change = session_rx.recv(), if session_feed_open => match change {
                    Ok(change) => {
                        debug!(
                            component = "identity",
                            event = "identity.session_change",
                            kind = ?change.kind,
                            "Session change received"
                        );
                        self.begin(Trigger::Change(change));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            component = "identity",
                            event = "identity.session_change.lagged",
                            skipped = n,
                            "Session change feed lagged, re-reading active session"
                        );
                        self.begin(Trigger::Ambient);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(
                            component = "identity",
                            event = "identity.session_change.closed",
                            "Session change feed closed"
                        );
                        session_feed_open = false;
                    }
                },
                Some(resolved) = resolved_rx.recv() => self.finish(resolved),
            }
        }

        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        debug!(
            component = "identity",
            event = "identity.stopped",
            "Identity resolver stopped"
        );
    }

    fn handle_command(&mut self, cmd: IdentityCommand) {
        match cmd {
            IdentityCommand::Refresh { reply } => {
                self.waiters.push(reply);
                self.begin(Trigger::Ambient);
            }
            IdentityCommand::SignOut { reply } => {
                // Anything still resolving is now stale.
                self.token += 1;
                if let Some(task) = self.in_flight.take() {
                    task.abort();
                }
                self.publish(Identity::empty(), false);
                self.notify_waiters();

                // Remote sign-out runs off the actor loop.
                let store = self.store.clone();
                tokio::spawn(async move {
                    let result = store.sign_out().await;
                    if let Err(e) = &result {
                        warn!(
                            component = "identity",
                            event = "identity.sign_out.remote_failed",
                            error = %e,
                            "Remote sign-out failed; local identity already cleared"
                        );
                    } else {
                        info!(
                            component = "identity",
                            event = "identity.signed_out",
                            "Signed out"
                        );
                    }
                    let _ = reply.send(result);
                });
            }
        }
    }

    /// Start a resolution, superseding any in flight.
    fn begin(&mut self, trigger: Trigger) {
        self.token += 1;
        let token = self.token;
        if let Some(task) = self.in_flight.take() {
            task.abort();
            debug!(
                component = "identity",
                event = "identity.resolution.superseded",
                token,
                "Superseded in-flight resolution"
            );
        }
        self.publish(self.state.identity.clone(), true);

        let store = self.store.clone();
        let directory = self.directory.clone();
        let resolved_tx = self.resolved_tx.clone();
        let warn_after = self.config.stall_warn_after;
        self.in_flight = Some(tokio::spawn(async move {
            // Next scheduling turn: the dispatch that triggered us has returned.
            tokio::task::yield_now().await;
            let outcome = warn_if_stalled(
                resolve(store.as_ref(), directory.as_ref(), trigger),
                warn_after,
                token,
            )
            .await;
            let _ = resolved_tx.send(Resolved { token, outcome });
        }));
    }

    fn finish(&mut self, resolved: Resolved) {
        if resolved.token != self.token {
            debug!(
                component = "identity",
                event = "identity.resolution.stale",
                token = resolved.token,
                latest = self.token,
                "Discarded stale resolution"
            );
            return;
        }
        self.in_flight = None;

        match resolved.outcome {
            ResolutionOutcome::SignedOut => {
                self.publish(Identity::empty(), false);
                self.notify_waiters();
            }
            ResolutionOutcome::Authorized(identity) => {
                info!(
                    component = "identity",
                    event = "identity.resolved",
                    user_id = ?identity.user_id,
                    role = ?identity.role,
                    "Identity resolved"
                );
                self.publish(identity, false);
                self.notify_waiters();
            }
            ResolutionOutcome::Unauthorized { user_id, reason } => {
                warn!(
                    component = "identity",
                    event = "identity.unauthorized",
                    user_id = %user_id,
                    reason = ?reason,
                    "No usable role for session, signing out"
                );
                self.publish(Identity::empty(), false);
                self.notify_waiters();

                // Redirect only after the remote sign-out returns.
                let store = self.store.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.sign_out().await {
                        warn!(
                            component = "identity",
                            event = "identity.sign_out.remote_failed",
                            user_id = %user_id,
                            error = %e,
                            "Remote sign-out failed after authorization failure"
                        );
                    }
                    let _ = events.send(IdentityEvent::Unauthorized { user_id, reason });
                });
            }
        }
    }

    fn publish(&mut self, identity: Identity, loading: bool) {
        self.state = IdentityState {
            identity,
            loading,
            revision: self.token,
        };
        let shared = Arc::new(self.state.clone());
        self.snapshot.store(shared.clone());
        self.changes_tx.send_replace(shared);
    }

    fn notify_waiters(&mut self) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(self.state.identity.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

async fn resolve(
    store: &dyn SessionStore,
    directory: &dyn Directory,
    trigger: Trigger,
) -> ResolutionOutcome {
    let session = match trigger {
        Trigger::Change(change) => change.session,
        Trigger::Ambient => match store.current_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    component = "identity",
                    event = "identity.session_lookup_failed",
                    error = %e,
                    "Active session lookup failed, treating as signed out"
                );
                None
            }
        },
    };

    match session {
        Some(session) => resolve_session(directory, session).await,
        None => ResolutionOutcome::SignedOut,
    }
}

async fn resolve_session(directory: &dyn Directory, session: Session) -> ResolutionOutcome {
    let user_id = session.user_id.clone();
    let (roles, profile) = tokio::join!(directory.roles(&user_id), directory.profile(&user_id));

    let rows = match roles {
        Ok(rows) => rows,
        Err(e) => {
            return ResolutionOutcome::Unauthorized {
                user_id,
                reason: UnauthorizedReason::LookupFailed(e.to_string()),
            }
        }
    };
    let Some(first) = rows.first() else {
        return ResolutionOutcome::Unauthorized {
            user_id,
            reason: UnauthorizedReason::NoRole,
        };
    };
    let role = first.role;
    if rows.iter().any(|row| row.role != role) {
        warn!(
            component = "identity",
            event = "identity.multiple_roles",
            user_id = %user_id,
            roles = ?rows.iter().map(|row| row.role).collect::<Vec<_>>(),
            chosen = ?role,
            "Multiple role rows, using the first"
        );
    }

    let profile = match profile {
        Ok(profile) => profile,
        Err(e) => {
            return ResolutionOutcome::Unauthorized {
                user_id,
                reason: UnauthorizedReason::LookupFailed(e.to_string()),
            }
        }
    };
    let display_name = profile
        .and_then(|p| p.display_name)
        .filter(|name| !name.trim().is_empty())
        .or(session.email)
        .unwrap_or_default();

    ResolutionOutcome::Authorized(Identity {
        session_present: true,
        user_id: Some(user_id),
        role: Some(role),
        display_name,
    })
}

async fn warn_if_stalled<F: Future>(future: F, warn_after: Duration, token: u64) -> F::Output {
    if warn_after.is_zero() {
        return future.await;
    }
    tokio::pin!(future);
    let mut waited = Duration::ZERO;
    loop {
        tokio::select! {
            output = &mut future => return output,
            _ = tokio::time::sleep(warn_after) => {
                waited += warn_after;
                warn!(
                    component = "identity",
                    event = "identity.resolution.stalled",
                    token,
                    waited_ms = waited.as_millis() as u64,
                    "Identity resolution still pending"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use portal_connectors::{ConnectorResult, LocalDirectory, LocalSessionStore};
    use portal_protocol::{Role, SessionChange};

    fn spawn_resolver(
        store: &Arc<LocalSessionStore>,
        directory: &Arc<LocalDirectory>,
    ) -> IdentityHandle {
        IdentityHandle::spawn(store.clone(), directory.clone(), ResolverConfig::default())
    }

    #[tokio::test]
    async fn resolves_active_session_on_start() {
        let store = Arc::new(LocalSessionStore::with_session(Session::new("u1")));
        let directory = Arc::new(LocalDirectory::new());
        directory.set_role("u1", Role::Admin);
        directory.set_profile("u1", "Avery Stone");

        let handle = spawn_resolver(&store, &directory);
        assert!(handle.is_loading());

        let state = handle.settled().await.expect("settled");
        assert!(!state.loading);
        assert!(state.identity.is_authorized());
        assert_eq!(state.identity.user_id.as_deref(), Some("u1"));
        assert_eq!(state.identity.role, Some(Role::Admin));
        assert_eq!(state.identity.display_name, "Avery Stone");
    }

    #[tokio::test]
    async fn no_session_settles_empty() {
        let store = Arc::new(LocalSessionStore::new());
        let directory = Arc::new(LocalDirectory::new());

        let handle = spawn_resolver(&store, &directory);
        let state = handle.settled().await.expect("settled");
        assert!(state.identity.is_empty());
        assert!(state.revision >= 1);
        assert_eq!(directory.role_queries(), 0);
    }

    #[tokio::test]
    async fn sign_in_push_resolves_identity() {
        let store = Arc::new(LocalSessionStore::new());
        let directory = Arc::new(LocalDirectory::new());
        directory.set_role("u2", Role::Intern);

        let handle = spawn_resolver(&store, &directory);
        handle.settled().await.expect("settled");

        store.sign_in(Session::new("u2").with_email("u2@example.test"));
        let state = handle
            .wait_for(|s| !s.loading && s.identity.user_id.is_some())
            .await
            .expect("resolved");
        assert_eq!(state.identity.role, Some(Role::Intern));
        // No profile row: display name falls back to the session email.
        assert_eq!(state.identity.display_name, "u2@example.test");
    }

    #[tokio::test(start_paused = true)]
    async fn later_session_change_wins_over_slower_earlier_one() {
        let store = Arc::new(LocalSessionStore::new());
        let directory = Arc::new(LocalDirectory::new());
        directory.set_role("u-slow", Role::Intern);
        directory.set_latency("u-slow", Duration::from_secs(30));
        directory.set_role("u-fast", Role::Admin);

        let handle = spawn_resolver(&store, &directory);
        handle.settled().await.expect("settled");

        store.sign_in(Session::new("u-slow"));
        store.sign_in(Session::new("u-fast"));

        let state = handle
            .wait_for(|s| !s.loading && s.identity.user_id.is_some())
            .await
            .expect("resolved");
        assert_eq!(state.identity.user_id.as_deref(), Some("u-fast"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        let state = handle.snapshot();
        assert_eq!(state.identity.user_id.as_deref(), Some("u-fast"));
        assert_eq!(state.identity.role, Some(Role::Admin));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn zero_role_rows_fail_closed() {
        let store = Arc::new(LocalSessionStore::with_session(Session::new("u1")));
        let directory = Arc::new(LocalDirectory::new());

        let handle = spawn_resolver(&store, &directory);
        let mut events = handle.events();

        let event = events.recv().await.expect("event");
        assert_eq!(
            event,
            IdentityEvent::Unauthorized {
                user_id: "u1".to_string(),
                reason: UnauthorizedReason::NoRole,
            }
        );
        assert_eq!(store.sign_out_calls(), 1);
        assert!(store.session().is_none());

        let state = handle.settled().await.expect("settled");
        assert!(state.identity.is_empty());
        assert!(!state.identity.is_authorized());
    }

    #[tokio::test]
    async fn role_lookup_failure_fails_closed() {
        let store = Arc::new(LocalSessionStore::with_session(Session::new("u1")));
        let directory = Arc::new(LocalDirectory::new());
        directory.set_role("u1", Role::Admin);
        directory.set_failing("u1", "connection reset");

        let handle = spawn_resolver(&store, &directory);
        let mut events = handle.events();

        match events.recv().await.expect("event") {
            IdentityEvent::Unauthorized { reason, .. } => {
                assert!(matches!(reason, UnauthorizedReason::LookupFailed(ref m) if m.contains("connection reset")));
            }
        }
        assert!(handle.identity().is_empty());
        assert_eq!(store.sign_out_calls(), 1);
    }

    #[tokio::test]
    async fn first_role_row_is_authoritative() {
        let store = Arc::new(LocalSessionStore::with_session(Session::new("u1")));
        let directory = Arc::new(LocalDirectory::new());
        directory.set_roles("u1", vec![Role::Employee, Role::Admin]);

        let handle = spawn_resolver(&store, &directory);
        let state = handle.settled().await.expect("settled");
        assert_eq!(state.identity.role, Some(Role::Employee));
    }

    #[tokio::test]
    async fn sign_out_clears_identity_even_when_remote_fails() {
        let store = Arc::new(LocalSessionStore::with_session(Session::new("u1")));
        let directory = Arc::new(LocalDirectory::new());
        directory.set_role("u1", Role::Employee);

        let handle = spawn_resolver(&store, &directory);
        handle.settled().await.expect("settled");
        assert!(handle.identity().is_authorized());

        store.set_reject_sign_out(true);
        let result = handle.sign_out().await;
        assert!(matches!(result, Err(IdentityError::SignOut(_))));

        let state = handle.snapshot();
        assert!(state.identity.is_empty());
        assert!(!state.loading);
    }

    /// Session store whose remote sign-out never returns.
    struct HungSignOut {
        inner: LocalSessionStore,
    }

    impl SessionStore for HungSignOut {
        fn current_session(&self) -> BoxFuture<'_, ConnectorResult<Option<Session>>> {
            self.inner.current_session()
        }

        fn subscribe_changes(&self) -> broadcast::Receiver<SessionChange> {
            self.inner.subscribe_changes()
        }

        fn sign_out(&self) -> BoxFuture<'_, ConnectorResult<()>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_remote_sign_out_does_not_block_the_actor() {
        let store = Arc::new(HungSignOut {
            inner: LocalSessionStore::with_session(Session::new("u1")),
        });
        let directory = Arc::new(LocalDirectory::new());
        directory.set_role("u1", Role::Employee);
        directory.set_role("u2", Role::Admin);

        let handle = IdentityHandle::spawn(store.clone(), directory.clone(), ResolverConfig::default());
        handle.settled().await.expect("settled");

        let signer = handle.clone();
        let pending = tokio::spawn(async move { signer.sign_out().await });
        handle
            .wait_for(|s| s.identity.is_empty())
            .await
            .expect("cleared");

        // Commands and session pushes are still served.
        let identity = tokio::time::timeout(Duration::from_secs(5), handle.refresh())
            .await
            .expect("refresh answered")
            .expect("refresh");
        assert_eq!(identity.user_id.as_deref(), Some("u1"));

        store.inner.sign_in(Session::new("u2"));
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_for(|s| !s.loading && s.identity.user_id.as_deref() == Some("u2")),
        )
        .await
        .expect("u2 resolved")
        .expect("state");
        assert_eq!(state.identity.role, Some(Role::Admin));
        assert!(!pending.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_sign_out_after_unauthorized_keeps_actor_live() {
        let store = Arc::new(HungSignOut {
            inner: LocalSessionStore::with_session(Session::new("u1")),
        });
        let directory = Arc::new(LocalDirectory::new());
        directory.set_role("u2", Role::Intern);

        let handle = IdentityHandle::spawn(store.clone(), directory.clone(), ResolverConfig::default());
        let state = handle.settled().await.expect("settled");
        assert!(state.identity.is_empty());

        store.inner.sign_in(Session::new("u2"));
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_for(|s| !s.loading && s.identity.user_id.is_some()),
        )
        .await
        .expect("u2 resolved")
        .expect("state");
        assert_eq!(state.identity.role, Some(Role::Intern));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_sets_loading_until_it_lands() {
        let store = Arc::new(LocalSessionStore::with_session(Session::new("u1")));
        let directory = Arc::new(LocalDirectory::new());
        directory.set_role("u1", Role::Admin);
        directory.set_latency("u1", Duration::from_secs(5));

        let handle = spawn_resolver(&store, &directory);
        handle.settled().await.expect("settled");

        let refresher = handle.clone();
        let refresh = tokio::spawn(async move { refresher.refresh().await });

        let loading = handle.wait_for(|s| s.loading).await.expect("loading");
        // The previous identity stays visible while loading.
        assert_eq!(loading.identity.role, Some(Role::Admin));

        let identity = refresh.await.expect("join").expect("refresh");
        assert_eq!(identity.role, Some(Role::Admin));
        assert!(!handle.is_loading());
        assert_eq!(directory.role_queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_resolution_keeps_loading() {
        let store = Arc::new(LocalSessionStore::with_session(Session::new("u1")));
        let directory = Arc::new(LocalDirectory::new());
        directory.set_role("u1", Role::Admin);
        directory.set_latency("u1", Duration::from_secs(3600));

        let handle = spawn_resolver(&store, &directory);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(handle.is_loading());
        assert!(handle.identity().is_empty());
    }
}
