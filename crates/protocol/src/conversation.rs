//! Conversation records as fetched for the chat sidebar

use serde::{Deserialize, Serialize};

/// Conversation kind; fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Broadcast,
    Group,
    Direct,
}

/// Approval gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

/// The other participant of a direct conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterpart {
    #[serde(default, alias = "full_name")]
    pub display_name: Option<String>,
    #[serde(default, alias = "avatar_url")]
    pub avatar_ref: Option<String>,
}

/// One chat thread with its display and approval state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    #[serde(alias = "type")]
    pub kind: ConversationKind,
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
    #[serde(default, alias = "avatar_url")]
    pub avatar_ref: Option<String>,
    #[serde(alias = "created_by")]
    pub owner_id: String,
    #[serde(alias = "approval_status")]
    pub approval_state: ApprovalState,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(default, alias = "other_user", skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<Counterpart>,
}

impl ConversationRecord {
    pub fn is_pending(&self) -> bool {
        self.approval_state == ApprovalState::Pending
    }

    pub fn is_approved(&self) -> bool {
        self.approval_state == ApprovalState::Approved
    }
}
