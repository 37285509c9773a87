//! Error types for team mutation operations.
//!
//! A single `TeamError` covers resolution, derivation, build, and post
//! failures. Errors abort the current operation and surface unchanged to the
//! caller; the only class eligible for automatic retry is [`StaleSequence`],
//! reported by the post authority when the sigchain advanced concurrently.
//!
//! [`StaleSequence`]: TeamError::StaleSequence

use thiserror::Error;

use crate::types::{Application, Generation, Role, Seqno};

/// Errors that can occur while mutating a team or deriving its keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TeamError {
    /// No generation secret is loaded for the requested generation.
    #[error("no team secret found at generation {generation}")]
    SecretUnavailable {
        /// The generation that has no seed.
        generation: Generation,
    },

    /// The reader-key-mask table has no entry for this application/generation.
    #[error("no reader key mask for {application:?} at generation {generation}")]
    MaskUnavailable {
        /// Application the mask was requested for.
        application: Application,
        /// Generation the mask was requested for.
        generation: Generation,
    },

    /// A reader key mask was present but not exactly 32 bytes.
    #[error("reader key mask length: {len}, expected 32")]
    MalformedMask {
        /// Length of the malformed mask.
        len: usize,
    },

    /// The acting identity holds no admin-or-above permission anywhere in the
    /// ancestor chain.
    #[error("only admins can perform this operation")]
    AdminRequired,

    /// Owner-role entries are not allowed on non-root teams.
    #[error("owners may not be added to a subteam")]
    SubteamOwnersNotAllowed,

    /// The caller derives admin rights only implicitly from an ancestor and
    /// has no explicit membership to leave.
    #[error("an implicit admin cannot leave a team without explicit membership")]
    ImplicitAdminCannotLeave,

    /// An active invite for the same (name, type) pair already exists.
    #[error("an invite for {name} already exists")]
    InviteAlreadyExists {
        /// Invitee name of the duplicate.
        name: String,
    },

    /// A link asserting an admin permission was built without a freshness
    /// anchor. This is a programming error in the caller, not a server state.
    #[error("link asserts admin permission but no freshness anchor was supplied")]
    MissingFreshnessAnchor,

    /// The freshness authority had no anchor available.
    #[error("no freshness anchor available")]
    NoFreshnessAnchorAvailable,

    /// The authority's log advanced past the sequence number we signed.
    /// Retryable: rebuild the section against the new chain length.
    #[error("sequence number {seqno} already used")]
    StaleSequence {
        /// The sequence number that was rejected.
        seqno: Seqno,
    },

    /// The user declined the delete confirmation prompt.
    #[error("team delete not confirmed")]
    DeleteNotConfirmed,

    /// Deleting a root team requires the caller to be an owner.
    #[error("you must be an owner to delete a team")]
    SelfNotOwner,

    /// The operation applies only to implicit teams (or only to explicit
    /// ones) and was invoked on the wrong kind.
    #[error("operation {operation} not supported for this team kind")]
    ImplicitTeamOperation {
        /// The rejected operation.
        operation: &'static str,
    },

    /// A role value outside what the operation accepts.
    #[error("unexpected role: {role:?}")]
    UnexpectedRole {
        /// The offending role.
        role: Role,
    },

    /// A link type that signs with per-team keys was built without them.
    #[error("per-team keys required for this link type but not loaded")]
    MissingTeamKeys,

    /// The retry driver exhausted its attempts without capturing an error.
    /// Contract violation in the post closure.
    #[error("failed retryable team operation")]
    RetryLogic,

    /// A crypto primitive failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] cohort_crypto::CryptoError),

    /// Serializing a link body failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// The user resolver could not resolve an identity.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// An external authority failed outside the taxonomy above.
    #[error("service error: {0}")]
    Service(String),
}

impl TeamError {
    /// Returns true if this error may succeed on retry.
    ///
    /// Only the stale-sequence condition is retryable: the caller must
    /// rebuild its section against the advanced chain before posting again.
    /// Everything else is terminal for the current attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleSequence { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::TeamError;
    use crate::types::Generation;

    #[test]
    fn only_stale_sequence_is_retryable() {
        assert!(TeamError::StaleSequence { seqno: 7 }.is_retryable());

        assert!(!TeamError::AdminRequired.is_retryable());
        assert!(!TeamError::SecretUnavailable { generation: Generation(1) }.is_retryable());
        assert!(!TeamError::DeleteNotConfirmed.is_retryable());
        assert!(!TeamError::RetryLogic.is_retryable());
    }
}
