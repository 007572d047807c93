//! Core identity and notification types

use serde::{Deserialize, Serialize};

/// Authorization role attached to an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Employee,
    Intern,
}

impl Role {
    /// Whether this role may approve or reject pending conversations
    pub fn can_review(self) -> bool {
        matches!(self, Role::Admin | Role::Employee)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Employee => "employee",
            Role::Intern => "intern",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "employee" => Ok(Role::Employee),
            "intern" => Ok(Role::Intern),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The resolved (user, role, display name) tuple for the current session.
///
/// `role` is only ever `Some` when the backend returned at least one role
/// row for `user_id`. An identity without a role is not authorized for any
/// role-gated view, even when `session_present` is true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub session_present: bool,
    pub user_id: Option<String>,
    pub role: Option<Role>,
    pub display_name: String,
}

impl Identity {
    /// The signed-out identity
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::empty()
    }

    /// True when the identity carries both a session and a role
    pub fn is_authorized(&self) -> bool {
        self.session_present && self.user_id.is_some() && self.role.is_some()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role)
    }
}

/// An authenticated backend session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            access_token: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// What caused a session change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionChangeKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// A pushed session change (login, logout, token refresh, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChange {
    pub kind: SessionChangeKind,
    pub session: Option<Session>,
}

impl SessionChange {
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: SessionChangeKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: SessionChangeKind::SignedOut,
            session: None,
        }
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self {
            kind: SessionChangeKind::TokenRefreshed,
            session: Some(session),
        }
    }
}

/// One authorization role row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRow {
    pub role: Role,
}

/// Profile row; only the display name is read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    #[serde(default, alias = "full_name")]
    pub display_name: Option<String>,
}

/// A server-pushed notification for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    pub title: String,
    #[serde(alias = "message")]
    pub body: String,
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(alias = "user_id")]
    pub owner_id: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: String,
}
