//! Live feed messages (transport → client)

use serde::{Deserialize, Serialize};

use crate::types::InboundEvent;

/// Table whose inserts carry notifications
pub const NOTIFICATIONS_TABLE: &str = "notifications";

/// Column that scopes a notification to its owner
pub const OWNER_COLUMN: &str = "user_id";

/// Topic key for one identity's notification feed
pub fn notification_topic(owner_id: &str) -> String {
    format!("notifications:{owner_id}")
}

/// Row change kinds a feed can be filtered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedEventKind {
    Insert,
    Update,
    Delete,
}

/// Server-side filter for a feed subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    pub event: FeedEventKind,
    pub table: String,
    pub column: String,
    pub value: String,
}

impl FeedFilter {
    /// Insert-only notifications owned by `owner_id`
    pub fn notifications_for(owner_id: &str) -> Self {
        Self {
            event: FeedEventKind::Insert,
            table: NOTIFICATIONS_TABLE.to_string(),
            column: OWNER_COLUMN.to_string(),
            value: owner_id.to_string(),
        }
    }

    /// Filter expression in the backend's `column=eq.value` syntax
    pub fn expression(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }
}

/// Status transitions reported by the transport for one subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedStatus {
    Subscribed,
    ChannelError { message: String },
    TimedOut,
    Closed,
}

/// Messages delivered on a feed subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Insert { record: InboundEvent },
    Status(FeedStatus),
}
