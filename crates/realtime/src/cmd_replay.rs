//! `portal replay`: push a JSONL file of notification rows through the
//! full pipeline (resolver → feed → fan-out) against in-process connectors.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use portal_connectors::{
    ConsoleSound, ConsoleToasts, LocalDirectory, LocalFeed, LocalNotifier, LocalSessionStore,
    Permission, RecordingCache,
};
use portal_protocol::{notification_topic, InboundEvent, Role, Session};
use portal_realtime::{IdentityHandle, NotificationConsumer, NotificationFanOut, ResolverConfig};
use serde::Serialize;
use tracing::{info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSONL file, one notification row per line
    pub input: PathBuf,

    /// User the replay signs in as
    #[arg(long, default_value = "replay-user")]
    pub user: String,

    /// Role granted to the replay user
    #[arg(long, default_value = "employee")]
    pub role: Role,

    /// Display name for the replay user
    #[arg(long)]
    pub name: Option<String>,

    /// Enable simulated desktop alerts (permission is prompted once)
    #[arg(long)]
    pub desktop: bool,

    /// Ring the terminal bell as the alert sound
    #[arg(long)]
    pub bell: bool,

    /// Delay between published rows
    #[arg(long, default_value_t = 0)]
    pub interval_ms: u64,

    /// Don't print toasts
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ReplaySummary {
    pub user_id: String,
    pub role: Role,
    /// Rows read from the input
    pub published: usize,
    /// Rows the feed routed to the subscription
    pub routed: usize,
    /// Rows that reached the fan-out
    pub delivered: usize,
    pub toasts: usize,
    pub sounds: usize,
    pub desktop_alerts: usize,
}

pub async fn run(args: &ReplayArgs) -> anyhow::Result<ReplaySummary> {
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let events = parse_events(&text)?;

    let store = Arc::new(LocalSessionStore::with_session(Session::new(&args.user)));
    let directory = Arc::new(LocalDirectory::new());
    directory.set_role(&args.user, args.role);
    if let Some(name) = &args.name {
        directory.set_profile(&args.user, name);
    }
    let identity = IdentityHandle::spawn(store, directory, ResolverConfig::default());
    let state = identity.settled().await?;
    if !state.identity.is_authorized() {
        bail!("replay user {} did not resolve to an authorized identity", args.user);
    }

    let feed = Arc::new(LocalFeed::new());
    let toasts = Arc::new(ConsoleToasts::new(!args.quiet));
    let cache = Arc::new(RecordingCache::new());
    let sound = Arc::new(ConsoleSound::new(args.bell));
    let notifier = Arc::new(LocalNotifier::new(Permission::Default, Permission::Granted));

    let mut fan_out = NotificationFanOut::new(toasts.clone(), cache.clone()).with_sound(sound.clone());
    if args.desktop {
        fan_out = fan_out.with_desktop(notifier.clone());
    }
    let fan_out = Arc::new(fan_out);
    let consumer = NotificationConsumer::mount(&identity, feed.clone(), fan_out.clone());

    let topic = notification_topic(&args.user);
    poll_until(READY_TIMEOUT, || feed.active_topics().contains(&topic))
        .await
        .with_context(|| format!("feed {topic} never opened"))?;
    if args.desktop {
        poll_until(READY_TIMEOUT, || fan_out.permission().is_some())
            .await
            .context("desktop permission prompt never answered")?;
    }

    let interval = Duration::from_millis(args.interval_ms);
    let mut routed = 0;
    let mut expected = HashSet::new();
    for event in &events {
        let hits = feed.publish(event);
        if hits > 0 {
            routed += hits;
            expected.insert(event.id.clone());
        }
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    if poll_until(DRAIN_TIMEOUT, || cache.invalidations().len() >= expected.len())
        .await
        .is_err()
    {
        warn!(
            component = "cmd_replay",
            event = "replay.drain_timeout",
            expected = expected.len(),
            delivered = cache.invalidations().len(),
            "Replay finished before every row was delivered"
        );
    }
    consumer.shutdown().await;

    let summary = ReplaySummary {
        user_id: args.user.clone(),
        role: args.role,
        published: events.len(),
        routed,
        delivered: cache.invalidations().len(),
        toasts: toasts.shown().len(),
        sounds: sound.plays(),
        desktop_alerts: notifier.shown().len(),
    };
    info!(
        component = "cmd_replay",
        event = "replay.completed",
        published = summary.published,
        delivered = summary.delivered,
        "Replay completed"
    );
    Ok(summary)
}

/// One row per non-blank line.
fn parse_events(text: &str) -> anyhow::Result<Vec<InboundEvent>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}: invalid row", idx + 1))
        })
        .collect()
}

async fn poll_until(limit: Duration, mut ready: impl FnMut() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(limit, async {
        while !ready() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .context("timed out")
}
