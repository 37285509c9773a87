//! External collaborators consumed by the engine.
//!
//! Every network-facing step is a suspension point behind one of these
//! traits: snapshot loading, identity resolution, freshness anchors,
//! downgrade leases, posting, notification fan-out, and delete confirmation.
//! Production wires them to the real transport; tests wire in-memory fakes.

use async_trait::async_trait;

use crate::error::TeamError;
use crate::link::SigPayload;
use crate::team::Team;
use crate::types::{
    DowngradeLease, FreshnessAnchor, FreshnessPurpose, LeaseId, Seqno, TeamChangeSet, TeamId,
    TeamName, UserId, UserVersion,
};

/// Arguments for loading a team snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadArgs {
    /// Team to load.
    pub id: TeamId,
    /// Whether the public chain is wanted.
    pub public: bool,
    /// Bypass caches and observe the newest server state.
    pub force_repoll: bool,
    /// Load enough of the chain to answer admin queries.
    pub need_admin: bool,
}

/// Loads team snapshots. Persistent caching lives behind this seam.
#[async_trait]
pub trait TeamLoader: Send + Sync {
    /// Load a snapshot of the team's current state.
    async fn load(&self, args: LoadArgs) -> Result<Team, TeamError>;
}

/// A user identity resolved to usable key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    /// The server's current version for this user.
    pub version: UserVersion,
    /// The user's device encryption public key.
    pub encryption_key: [u8; 32],
}

/// Result of looking up a pinned user version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberLookup {
    /// The account still lives at this version.
    Active(ResolvedUser),
    /// The account was reset since the version was pinned; its old keys are
    /// gone and no lease is needed to demote it.
    Reset {
        /// The eldest seqno the account lives at now.
        current_eldest: Seqno,
    },
}

/// Result of resolving a uid to its current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserResolution {
    /// The user has a usable public key.
    Resolved(ResolvedUser),
    /// The account exists but holds no usable public key yet; only a
    /// keybase-type invite can add it.
    InviteRequired {
        /// The account's current version.
        version: UserVersion,
    },
}

/// Resolves user identities to versions and key material.
#[async_trait]
pub trait UserResolver: Send + Sync {
    /// Look up a pinned user version, reporting whether the account reset.
    async fn lookup(&self, version: &UserVersion) -> Result<MemberLookup, TeamError>;

    /// Resolve a uid to its current version and key material.
    async fn resolve_uid(&self, uid: UserId) -> Result<UserResolution, TeamError>;
}

/// Serves freshness anchors proving recent observation of global state.
#[async_trait]
pub trait FreshnessAuthority: Send + Sync {
    /// Fetch the newest anchor, `None` when the authority has none.
    async fn fetch_anchor(
        &self,
        purpose: FreshnessPurpose,
    ) -> Result<Option<FreshnessAnchor>, TeamError>;
}

/// Fetch an anchor, treating an empty authority as an error.
pub async fn require_anchor(
    authority: &dyn FreshnessAuthority,
    purpose: FreshnessPurpose,
) -> Result<FreshnessAnchor, TeamError> {
    authority.fetch_anchor(purpose).await?.ok_or(TeamError::NoFreshnessAnchorAvailable)
}

/// Grants and cancels downgrade leases.
#[async_trait]
pub trait LeaseAuthority: Send + Sync {
    /// Request a lease naming `uids`, returning it with a fresh anchor.
    async fn request_lease(
        &self,
        team_id: TeamId,
        uids: &[UserId],
    ) -> Result<(DowngradeLease, FreshnessAnchor), TeamError>;

    /// Cancel a previously granted lease.
    async fn cancel_lease(&self, id: LeaseId) -> Result<(), TeamError>;
}

/// Accepts signed link payloads, enforcing strict monotonic sequencing.
#[async_trait]
pub trait PostAuthority: Send + Sync {
    /// Post a payload; `StaleSequence` when the chain advanced concurrently.
    async fn post(&self, payload: &SigPayload) -> Result<(), TeamError>;
}

/// Fire-and-forget change notifications; receivers are idempotent.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce that a team changed at `next_seqno`.
    async fn notify(
        &self,
        team_id: TeamId,
        name: TeamName,
        next_seqno: Seqno,
        implicit: bool,
        changes: TeamChangeSet,
    );
}

/// Which delete is being confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteKind {
    /// Deleting a root team.
    Root,
    /// Deleting a subteam.
    Subteam,
}

/// Confirmation prompt consulted before irreversible deletes.
#[async_trait]
pub trait ConfirmUi: Send + Sync {
    /// Ask the user to confirm the delete; `false` aborts the operation.
    async fn confirm_delete(&self, kind: DeleteKind, name: &TeamName) -> Result<bool, TeamError>;
}

/// The bundle of external authorities one snapshot operates against.
#[derive(Clone)]
pub struct Services {
    /// Snapshot loader.
    pub loader: std::sync::Arc<dyn TeamLoader>,
    /// Identity resolver.
    pub resolver: std::sync::Arc<dyn UserResolver>,
    /// Freshness anchor authority.
    pub freshness: std::sync::Arc<dyn FreshnessAuthority>,
    /// Downgrade lease authority.
    pub leases: std::sync::Arc<dyn LeaseAuthority>,
    /// Post authority.
    pub poster: std::sync::Arc<dyn PostAuthority>,
    /// Notification sink.
    pub notifier: std::sync::Arc<dyn Notifier>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Services(..)")
    }
}
