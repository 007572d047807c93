//! Sidebar classification of conversation records.
//!
//! Pure functions over a snapshot: no state is kept between calls, so the
//! caller re-runs `classify` whenever the records, the filter text or the
//! viewer change.

use std::collections::HashSet;

use portal_protocol::{ConversationKind, ConversationRecord, Identity};
use serde::Serialize;

/// Label for a direct conversation without a counterpart name
pub const DIRECT_PLACEHOLDER: &str = "Unknown User";
/// Label for a broadcast or group conversation without a name
pub const UNNAMED_PLACEHOLDER: &str = "Unnamed";

const MAX_INITIALS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Avatar {
    Image(String),
    Initials(String),
}

/// One rendered sidebar row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidebarEntry {
    pub label: String,
    pub avatar: Avatar,
    pub record: ConversationRecord,
}

impl SidebarEntry {
    fn from_record(record: &ConversationRecord) -> Self {
        let label = display_label(record);
        let avatar = avatar_for(record, &label);
        Self {
            label,
            avatar,
            record: record.clone(),
        }
    }
}

/// Sidebar buckets, each in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationBuckets {
    pub broadcast: Vec<SidebarEntry>,
    pub direct: Vec<SidebarEntry>,
    pub group: Vec<SidebarEntry>,
    /// Pending records the viewer created, any kind
    pub own_pending: Vec<SidebarEntry>,
}

impl ConversationBuckets {
    pub fn is_empty(&self) -> bool {
        self.broadcast.is_empty()
            && self.direct.is_empty()
            && self.group.is_empty()
            && self.own_pending.is_empty()
    }

    /// Unread messages across every visible record. A record listed in
    /// two buckets counts once.
    pub fn unread_total(&self) -> u32 {
        let mut seen = HashSet::new();
        [&self.broadcast, &self.direct, &self.group, &self.own_pending]
            .into_iter()
            .flatten()
            .filter(|entry| seen.insert(entry.record.id.as_str()))
            .filter_map(|entry| entry.record.unread_count)
            .sum()
    }
}

/// Partition `records` into sidebar buckets for `viewer_id`.
///
/// Records are kept when their label contains `filter_text`, compared
/// case-insensitively as a plain substring. A pending record owned by
/// someone else lands in no bucket, broadcasts included. A rejected one
/// shows only if it is a broadcast.
pub fn classify(
    records: &[ConversationRecord],
    filter_text: &str,
    viewer_id: Option<&str>,
) -> ConversationBuckets {
    let needle = filter_text.to_lowercase();
    let mut buckets = ConversationBuckets::default();

    for record in records {
        let entry = SidebarEntry::from_record(record);
        if !entry.label.to_lowercase().contains(&needle) {
            continue;
        }

        let own = viewer_id.is_some_and(|viewer| viewer == record.owner_id);
        if record.is_pending() {
            if !own {
                continue;
            }
            buckets.own_pending.push(entry.clone());
        }

        match record.kind {
            ConversationKind::Broadcast => buckets.broadcast.push(entry),
            ConversationKind::Direct if record.is_approved() => buckets.direct.push(entry),
            ConversationKind::Group if record.is_approved() => buckets.group.push(entry),
            _ => {}
        }
    }

    buckets
}

/// Sidebar label: the counterpart's name for direct conversations, the
/// record's own name otherwise. Blank names fall back to a placeholder.
pub fn display_label(record: &ConversationRecord) -> String {
    let (name, placeholder) = match record.kind {
        ConversationKind::Direct => (
            record
                .counterpart
                .as_ref()
                .and_then(|c| c.display_name.as_deref()),
            DIRECT_PLACEHOLDER,
        ),
        ConversationKind::Broadcast | ConversationKind::Group => {
            (record.display_name.as_deref(), UNNAMED_PLACEHOLDER)
        }
    };
    non_blank(name).unwrap_or(placeholder).to_string()
}

/// Image when the record (or, for direct, the counterpart) has one,
/// otherwise initials of `label`.
pub fn avatar_for(record: &ConversationRecord, label: &str) -> Avatar {
    let image = match record.kind {
        ConversationKind::Direct => record
            .counterpart
            .as_ref()
            .and_then(|c| c.avatar_ref.as_deref()),
        ConversationKind::Broadcast | ConversationKind::Group => record.avatar_ref.as_deref(),
    };
    match non_blank(image) {
        Some(image) => Avatar::Image(image.to_string()),
        None => Avatar::Initials(initials(label)),
    }
}

/// First letter of each whitespace token, uppercased, at most two.
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|token| token.chars().next())
        .flat_map(char::to_uppercase)
        .take(MAX_INITIALS)
        .collect()
}

/// Whether `identity` may approve or reject `record`.
pub fn can_review(identity: &Identity, record: &ConversationRecord) -> bool {
    record.is_pending() && identity.role.is_some_and(|role| role.can_review())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
