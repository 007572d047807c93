//! Mounted notification consumer.
//!
//! Follows the identity resolver and keeps one `EventChannel` bound to the
//! current user, delivering inserts to a `NotificationFanOut`. Unmounting
//! disables the handler immediately and tears the channel down.

use std::sync::Arc;

use portal_connectors::FeedTransport;
use portal_protocol::InboundEvent;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::fan_out::NotificationFanOut;
use crate::identity::{IdentityHandle, IdentityState};
use crate::subscription::{EventChannel, LiveGuard};

pub struct NotificationConsumer {
    live: Arc<LiveGuard>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    prepare: Option<JoinHandle<()>>,
}

impl NotificationConsumer {
    /// Bind to whoever `identity` resolves to, rebinding on every change.
    /// The desktop permission prompt runs alongside; an unanswered prompt
    /// never holds back the feed.
    pub fn mount(
        identity: &IdentityHandle,
        transport: Arc<dyn FeedTransport>,
        fan_out: Arc<NotificationFanOut>,
    ) -> Self {
        let live = Arc::new(LiveGuard::new());
        let handler_live = live.clone();
        let handler_fan_out = fan_out.clone();
        let handler = move |event: InboundEvent| {
            handler_live.run_if_live(|| handler_fan_out.deliver(&event));
        };
        let channel = EventChannel::new(transport, Arc::new(handler));

        let prepare = tokio::spawn(async move { fan_out.prepare().await });
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(follow(identity.subscribe(), channel, stop_rx));

        info!(
            component = "consumer",
            event = "consumer.mounted",
            "Notification consumer mounted"
        );

        Self {
            live,
            stop: Some(stop),
            task: Some(task),
            prepare: Some(prepare),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.stop.is_some()
    }

    /// Stop delivering. No fan-out happens after this returns.
    pub fn unmount(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        self.live.kill();
        let _ = stop.send(());
        if let Some(prepare) = self.prepare.take() {
            prepare.abort();
        }
        info!(
            component = "consumer",
            event = "consumer.unmounted",
            "Notification consumer unmounted"
        );
    }

    /// Unmount and wait for the channel teardown to be issued.
    pub async fn shutdown(mut self) {
        self.unmount();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for NotificationConsumer {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn follow(
    mut changes: watch::Receiver<Arc<IdentityState>>,
    mut channel: EventChannel,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let owner = changes.borrow_and_update().identity.user_id.clone();
        if channel.owner() != owner.as_deref() {
            debug!(
                component = "consumer",
                event = "consumer.rebind",
                owner_id = ?owner,
                "Identity changed, rebinding notification channel"
            );
            channel.bind(owner.as_deref());
        }

        tokio::select! {
            biased;
            _ = &mut stop => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    // Resolver is gone; nothing more to follow.
                    break;
                }
            }
        }
    }

    channel.close();
}
