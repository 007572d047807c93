//! Portal CLI
//!
//! Drives the realtime core from the terminal: classify a sidebar snapshot,
//! replay a notification feed, or resolve an identity against the backend.

mod cmd_classify;
mod cmd_replay;
mod cmd_whoami;
mod config;

use clap::{Parser, Subcommand};
use portal_realtime::logging::init_logging;
use tracing::info;

use crate::config::{GlobalArgs, PortalConfig};

#[derive(Parser, Debug)]
#[command(name = "portal", version, about = "Portal realtime core tooling")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bucket conversation records for the sidebar
    Classify(cmd_classify::ClassifyArgs),

    /// Replay notification rows through the live pipeline
    Replay(cmd_replay::ReplayArgs),

    /// Resolve a session to its identity and role
    Whoami(cmd_whoami::WhoamiArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PortalConfig::from_args(&cli.global)?;
    config.paths.ensure_dirs()?;
    let logging = init_logging(&config.paths.log_dir(), config.log_to_stderr)?;

    info!(
        component = "cli",
        event = "cli.start",
        version = portal_realtime::VERSION,
        run_id = %logging.run_id,
        data_dir = %config.paths.root().display(),
        "Portal starting"
    );

    match &cli.command {
        Command::Classify(args) => cmd_classify::run(args)?,
        Command::Replay(args) => {
            let summary = cmd_replay::run(args).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Whoami(args) => cmd_whoami::run(args, &config).await?,
    }

    Ok(())
}
