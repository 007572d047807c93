//! `portal whoami`: resolve a session against the live directory and print
//! the identity it maps to.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use portal_connectors::{LocalSessionStore, RestDirectory};
use portal_protocol::Session;
use portal_realtime::{IdentityEvent, IdentityHandle, ResolverConfig};
use tracing::info;

use crate::config::PortalConfig;

const EVENT_WAIT: Duration = Duration::from_secs(2);

#[derive(Args, Debug)]
pub struct WhoamiArgs {
    /// User id to resolve. Defaults to the saved session in the data dir.
    #[arg(long)]
    pub user_id: Option<String>,

    /// Email used as the display name fallback
    #[arg(long)]
    pub email: Option<String>,

    /// Session access token for row-level reads
    #[arg(long, env = "PORTAL_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
}

pub async fn run(args: &WhoamiArgs, config: &PortalConfig) -> anyhow::Result<()> {
    let backend = config.backend()?;
    let session = match &args.user_id {
        Some(user_id) => Session {
            user_id: user_id.clone(),
            email: args.email.clone(),
            access_token: args.access_token.clone(),
        },
        None => load_session(&config.paths.session_path())?,
    };

    let mut directory = RestDirectory::new(&backend.url, &backend.api_key);
    if let Some(token) = &session.access_token {
        directory = directory.with_access_token(token.clone());
    }
    let user_id = session.user_id.clone();
    let store = Arc::new(LocalSessionStore::with_session(session));

    let identity = IdentityHandle::spawn(store, Arc::new(directory), ResolverConfig::default());
    let mut events = identity.events();
    let state = identity
        .wait_for(|state| state.revision > 0 && !state.loading)
        .await?;

    if !state.identity.is_authorized() {
        // The redirect effect follows the cleared state once remote sign-out returns.
        let reason = match tokio::time::timeout(EVENT_WAIT, events.recv()).await {
            Ok(Ok(IdentityEvent::Unauthorized { reason, .. })) => format!("{reason:?}"),
            _ => "unknown".to_string(),
        };
        bail!("{user_id} is not authorized ({reason})");
    }

    info!(
        component = "cmd_whoami",
        event = "whoami.resolved",
        user_id = %user_id,
        "Identity resolved"
    );
    println!("{}", serde_json::to_string_pretty(&state.identity)?);
    Ok(())
}

fn load_session(path: &Path) -> anyhow::Result<Session> {
    let text = std::fs::read_to_string(path).with_context(|| {
        format!(
            "no --user-id given and no saved session at {}",
            path.display()
        )
    })?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
