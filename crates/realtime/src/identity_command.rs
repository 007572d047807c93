//! Commands sent to the identity resolver actor.

use portal_connectors::ConnectorError;
use portal_protocol::{Identity, SessionChange};
use tokio::sync::oneshot;

use crate::identity::ResolutionOutcome;

/// A command that can be sent to the identity resolver.
pub enum IdentityCommand {
    /// Re-derive identity from the ambient session. Replies once the
    /// resolution this command started (or a later one superseding it)
    /// has landed.
    Refresh { reply: oneshot::Sender<Identity> },

    /// Clear identity and sign out remotely. The identity is cleared even
    /// when the remote call fails; the remote result is the reply.
    SignOut {
        reply: oneshot::Sender<Result<(), ConnectorError>>,
    },
}

/// What started a resolution
#[derive(Debug, Clone)]
pub(crate) enum Trigger {
    /// Read the currently active session from the store
    Ambient,
    /// A pushed session change carrying its own session
    Change(SessionChange),
}

/// A finished resolution reported back by its task
pub(crate) struct Resolved {
    pub token: u64,
    pub outcome: ResolutionOutcome,
}
