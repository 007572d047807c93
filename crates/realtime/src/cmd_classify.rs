//! `portal classify`: bucket a JSON array of conversation records the way
//! the sidebar does.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use portal_protocol::ConversationRecord;
use portal_realtime::classifier::{classify, ConversationBuckets};
use serde::Serialize;

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// JSON file holding an array of conversation records
    pub input: PathBuf,

    /// Sidebar search text (case-insensitive substring)
    #[arg(long, default_value = "")]
    pub filter: String,

    /// Viewer user id, for the "awaiting approval" bucket
    #[arg(long)]
    pub viewer: Option<String>,

    /// Pretty-print the output
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Debug, Serialize)]
struct ClassifyOutput {
    unread_total: u32,
    #[serde(flatten)]
    buckets: ConversationBuckets,
}

pub fn run(args: &ClassifyArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let output = classify_text(&text, &args.filter, args.viewer.as_deref())?;

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{rendered}");

    tracing::info!(
        component = "cmd_classify",
        event = "classify.completed",
        input = %args.input.display(),
        unread_total = output.unread_total,
        "Classified conversation records"
    );
    Ok(())
}

fn classify_text(
    text: &str,
    filter: &str,
    viewer: Option<&str>,
) -> anyhow::Result<ClassifyOutput> {
    let records: Vec<ConversationRecord> =
        serde_json::from_str(text).context("input is not an array of conversation records")?;
    let buckets = classify(&records, filter, viewer);
    Ok(ClassifyOutput {
        unread_total: buckets.unread_total(),
        buckets,
    })
}
