//! Event subscription channel: one live notification feed per identity.
//!
//! `EventChannel::bind` opens `notifications:<owner>` on the transport and
//! pumps inserts into a single handler, in delivery order. Rebinding closes
//! the previous feed first; the new pump waits for the old one to finish
//! its unsubscribe before subscribing. Closing flips a live guard under a
//! lock, so once `close()` returns the handler is never invoked again, even
//! if the subscribe call was still in flight.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use portal_connectors::{FeedSubscription, FeedTransport};
use portal_protocol::{notification_topic, FeedFilter, FeedMessage, FeedStatus, InboundEvent};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECENT_IDS: usize = 256;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Receives inbound events from an `EventChannel`.
///
/// Called on the channel's pump task while the live guard is held, so
/// implementations must not block or close the same channel.
pub trait InboundHandler: Send + Sync + 'static {
    fn handle(&self, event: InboundEvent);
}

impl<F> InboundHandler for F
where
    F: Fn(InboundEvent) + Send + Sync + 'static,
{
    fn handle(&self, event: InboundEvent) {
        self(event)
    }
}

/// Live/dead flag guarding handler invocations.
#[derive(Debug)]
pub struct LiveGuard {
    live: Mutex<bool>,
}

impl LiveGuard {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(true),
        }
    }

    pub fn is_live(&self) -> bool {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark dead. Waits for an invocation already running under the guard.
    pub fn kill(&self) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Run `f` only while live. Returns whether it ran.
    pub fn run_if_live(&self, f: impl FnOnce()) -> bool {
        let guard = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard {
            f();
            true
        } else {
            false
        }
    }
}

impl Default for LiveGuard {
    fn default() -> Self {
        Self::new()
    }
}

struct ActiveChannel {
    id: u64,
    owner_id: String,
    live: Arc<LiveGuard>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// A rebindable notification feed.
pub struct EventChannel {
    transport: Arc<dyn FeedTransport>,
    handler: Arc<dyn InboundHandler>,
    active: Option<ActiveChannel>,
}

impl EventChannel {
    pub fn new(transport: Arc<dyn FeedTransport>, handler: Arc<dyn InboundHandler>) -> Self {
        Self {
            transport,
            handler,
            active: None,
        }
    }

    /// Owner the channel is currently bound to
    pub fn owner(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.owner_id.as_str())
    }

    /// Bind to `owner`, or to nothing with `None`. Rebinding to the current
    /// owner is a no-op.
    pub fn bind(&mut self, owner: Option<&str>) {
        if self.owner() == owner {
            return;
        }
        let previous = self.teardown();
        if let Some(owner) = owner {
            self.active = Some(self.open(owner, previous));
        }
    }

    /// Close the current feed. No handler invocation happens after this
    /// returns; the transport unsubscribe completes in the background.
    pub fn close(&mut self) {
        // Detach: the old pump finishes its unsubscribe on its own.
        let _ = self.teardown();
    }

    fn teardown(&mut self) -> Option<JoinHandle<()>> {
        let mut active = self.active.take()?;
        active.live.kill();
        if let Some(shutdown) = active.shutdown.take() {
            let _ = shutdown.send(());
        }
        info!(
            component = "subscription",
            event = "subscription.closed",
            channel_id = active.id,
            owner_id = %active.owner_id,
            "Notification channel closed"
        );
        Some(active.task)
    }

    fn open(&self, owner: &str, previous: Option<JoinHandle<()>>) -> ActiveChannel {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        let live = Arc::new(LiveGuard::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let pump = Pump {
            channel_id: id,
            owner_id: owner.to_string(),
            transport: self.transport.clone(),
            handler: self.handler.clone(),
            live: live.clone(),
        };
        let task = tokio::spawn(pump.run(shutdown_rx, previous));

        info!(
            component = "subscription",
            event = "subscription.opening",
            channel_id = id,
            owner_id = %owner,
            "Opening notification channel"
        );

        ActiveChannel {
            id,
            owner_id: owner.to_string(),
            live,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.close();
    }
}

struct Pump {
    channel_id: u64,
    owner_id: String,
    transport: Arc<dyn FeedTransport>,
    handler: Arc<dyn InboundHandler>,
    live: Arc<LiveGuard>,
}

impl Pump {
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>, previous: Option<JoinHandle<()>>) {
        if let Some(previous) = previous {
            // The previous owner's feed must be gone before ours opens.
            let _ = previous.await;
        }
        if !self.live.is_live() {
            return;
        }

        let topic = notification_topic(&self.owner_id);
        let subscription = match self
            .transport
            .subscribe(&topic, FeedFilter::notifications_for(&self.owner_id))
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(
                    component = "subscription",
                    event = "subscription.subscribe_failed",
                    channel_id = self.channel_id,
                    topic = %topic,
                    error = %e,
                    "Feed subscribe failed"
                );
                return;
            }
        };
        let FeedSubscription {
            handle,
            mut messages,
        } = subscription;

        if !self.live.is_live() {
            debug!(
                component = "subscription",
                event = "subscription.closed_while_connecting",
                channel_id = self.channel_id,
                topic = %topic,
                "Channel closed before subscribe completed"
            );
            self.transport.unsubscribe(handle).await;
            return;
        }

        let mut recent = RecentIds::new(RECENT_IDS);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                msg = messages.recv() => match msg {
                    Some(FeedMessage::Insert { record }) => self.dispatch(record, &mut recent),
                    Some(FeedMessage::Status(status)) => self.log_status(&topic, &status),
                    None => {
                        info!(
                            component = "subscription",
                            event = "subscription.transport_closed",
                            channel_id = self.channel_id,
                            topic = %topic,
                            "Transport closed the feed"
                        );
                        break;
                    }
                },
            }
        }

        self.transport.unsubscribe(handle).await;
        debug!(
            component = "subscription",
            event = "subscription.unsubscribed",
            channel_id = self.channel_id,
            topic = %topic,
            "Feed unsubscribed"
        );
    }

    fn dispatch(&self, event: InboundEvent, recent: &mut RecentIds) {
        if event.owner_id != self.owner_id {
            warn!(
                component = "subscription",
                event = "subscription.foreign_event_dropped",
                channel_id = self.channel_id,
                event_id = %event.id,
                "Dropped event addressed to another identity"
            );
            return;
        }
        if !recent.insert(&event.id) {
            debug!(
                component = "subscription",
                event = "subscription.duplicate_dropped",
                channel_id = self.channel_id,
                event_id = %event.id,
                "Dropped duplicate delivery"
            );
            return;
        }
        let handler = &self.handler;
        self.live.run_if_live(|| handler.handle(event));
    }

    fn log_status(&self, topic: &str, status: &FeedStatus) {
        match status {
            FeedStatus::Subscribed => info!(
                component = "subscription",
                event = "subscription.subscribed",
                channel_id = self.channel_id,
                topic = %topic,
                "Notification channel subscribed"
            ),
            FeedStatus::ChannelError { message } => warn!(
                component = "subscription",
                event = "subscription.channel_error",
                channel_id = self.channel_id,
                topic = %topic,
                error = %message,
                "Notification channel error"
            ),
            FeedStatus::TimedOut => warn!(
                component = "subscription",
                event = "subscription.timed_out",
                channel_id = self.channel_id,
                topic = %topic,
                "Notification channel timed out"
            ),
            FeedStatus::Closed => info!(
                component = "subscription",
                event = "subscription.status_closed",
                channel_id = self.channel_id,
                topic = %topic,
                "Notification channel reported closed"
            ),
        }
    }
}

/// Bounded window of recently delivered event ids
struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// False if `id` was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use portal_connectors::LocalFeed;

    fn event(id: &str, owner: &str) -> InboundEvent {
        InboundEvent {
            id: id.to_string(),
            title: format!("Title {id}"),
            body: "Body".to_string(),
            kind: "info".to_string(),
            owner_id: owner.to_string(),
            read: false,
            created_at: "2026-10-01T00:00:00Z".to_string(),
        }
    }

    fn recording_channel(feed: &Arc<LocalFeed>) -> (EventChannel, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |event: InboundEvent| sink.lock().unwrap().push(event.id);
        (EventChannel::new(feed.clone(), Arc::new(handler)), seen)
    }

    async fn wait_for_topics(feed: &LocalFeed, expected: &[&str]) {
        for _ in 0..200 {
            if feed.active_topics() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "feed topics never became {:?}, got {:?}",
            expected,
            feed.active_topics()
        );
    }

    async fn wait_for_count(seen: &Mutex<Vec<String>>, count: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("handler never saw {count} events");
    }

    #[tokio::test]
    async fn delivers_inserts_in_order() {
        let feed = Arc::new(LocalFeed::new());
        let (mut channel, seen) = recording_channel(&feed);

        channel.bind(Some("u1"));
        wait_for_topics(&feed, &["notifications:u1"]).await;

        for id in ["a", "b", "c"] {
            assert_eq!(feed.publish(&event(id, "u1")), 1);
        }
        wait_for_count(&seen, 3).await;
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn binding_none_opens_nothing() {
        let feed = Arc::new(LocalFeed::new());
        let (mut channel, _seen) = recording_channel(&feed);

        channel.bind(None);
        tokio::task::yield_now().await;
        assert_eq!(channel.owner(), None);
        assert_eq!(feed.subscribe_calls(), 0);
    }

    #[tokio::test]
    async fn rebinding_closes_previous_owner_first() {
        let feed = Arc::new(LocalFeed::new());
        let (mut channel, seen) = recording_channel(&feed);

        channel.bind(Some("u1"));
        wait_for_topics(&feed, &["notifications:u1"]).await;

        channel.bind(Some("u2"));
        wait_for_topics(&feed, &["notifications:u2"]).await;
        assert_eq!(feed.unsubscribe_calls(), 1);

        assert_eq!(feed.publish(&event("old", "u1")), 0);
        feed.publish(&event("new", "u2"));
        wait_for_count(&seen, 1).await;
        assert_eq!(*seen.lock().unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn rebinding_same_owner_keeps_channel() {
        let feed = Arc::new(LocalFeed::new());
        let (mut channel, _seen) = recording_channel(&feed);

        channel.bind(Some("u1"));
        wait_for_topics(&feed, &["notifications:u1"]).await;
        channel.bind(Some("u1"));
        tokio::task::yield_now().await;

        assert_eq!(feed.subscribe_calls(), 1);
        assert_eq!(feed.unsubscribe_calls(), 0);
    }

    #[tokio::test]
    async fn drops_foreign_and_duplicate_events() {
        let feed = Arc::new(LocalFeed::new());
        let (mut channel, seen) = recording_channel(&feed);

        channel.bind(Some("u1"));
        wait_for_topics(&feed, &["notifications:u1"]).await;

        let insert = |e: InboundEvent| FeedMessage::Insert { record: e };
        feed.inject("notifications:u1", insert(event("x", "u2")));
        feed.inject("notifications:u1", insert(event("a", "u1")));
        feed.inject("notifications:u1", insert(event("a", "u1")));
        feed.inject("notifications:u1", insert(event("b", "u1")));

        wait_for_count(&seen, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn channel_error_status_does_not_stop_delivery() {
        let feed = Arc::new(LocalFeed::new());
        let (mut channel, seen) = recording_channel(&feed);

        channel.bind(Some("u1"));
        wait_for_topics(&feed, &["notifications:u1"]).await;

        feed.inject(
            "notifications:u1",
            FeedMessage::Status(FeedStatus::ChannelError {
                message: "heartbeat missed".to_string(),
            }),
        );
        feed.publish(&event("a", "u1"));
        wait_for_count(&seen, 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_subscribe_never_invokes_handler() {
        let feed = Arc::new(LocalFeed::new());
        feed.set_subscribe_latency(Duration::from_secs(1));
        let (mut channel, seen) = recording_channel(&feed);

        channel.bind(Some("u1"));
        while feed.subscribe_calls() == 0 {
            tokio::task::yield_now().await;
        }
        channel.close();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(feed.publish(&event("late", "u1")), 0);
        assert!(feed.active_topics().is_empty());
        assert_eq!(feed.unsubscribe_calls(), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drop_tears_down_feed() {
        let feed = Arc::new(LocalFeed::new());
        let (mut channel, _seen) = recording_channel(&feed);

        channel.bind(Some("u1"));
        wait_for_topics(&feed, &["notifications:u1"]).await;
        drop(channel);

        wait_for_topics(&feed, &[]).await;
    }

    #[test]
    fn live_guard_blocks_after_kill() {
        let guard = LiveGuard::new();
        assert!(guard.run_if_live(|| {}));
        guard.kill();
        assert!(!guard.is_live());
        assert!(!guard.run_if_live(|| panic!("must not run")));
    }

    #[test]
    fn recent_ids_window_evicts_oldest() {
        let mut recent = RecentIds::new(2);
        assert!(recent.insert("a"));
        assert!(!recent.insert("a"));
        assert!(recent.insert("b"));
        assert!(recent.insert("c"));
        // "a" fell out of the window
        assert!(recent.insert("a"));
    }
}
