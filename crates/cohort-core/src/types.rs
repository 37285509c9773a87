//! Core identifiers, roles, and wire-adjacent value types.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Sequence number within a team sigchain. The first link is seqno 1.
pub type Seqno = u64;

/// Unique team identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TeamId(pub [u8; 16]);

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Unique user identifier, stable across account resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub [u8; 16]);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A user identity pinned to one account era.
///
/// `eldest_seqno` identifies the account's current key lineage; it bumps when
/// the account is reset, so a `UserVersion` with a stale marker refers to an
/// identity that no longer controls any keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserVersion {
    /// Stable user id.
    pub uid: UserId,
    /// Sequence number of the account's eldest key.
    pub eldest_seqno: Seqno,
}

impl std::fmt::Display for UserVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%{}", self.uid, self.eldest_seqno)
    }
}

/// Membership role, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Role {
    /// No membership.
    #[default]
    None,
    /// Read-only member.
    Reader,
    /// Read/write member.
    Writer,
    /// Can change membership and settings.
    Admin,
    /// Full control, including delete. Root teams only.
    Owner,
}

impl Role {
    /// True for Admin and Owner.
    pub fn is_admin_or_above(self) -> bool {
        self >= Self::Admin
    }

    /// True if `self` is at least as privileged as `other`.
    pub fn is_or_above(self, other: Self) -> bool {
        self >= other
    }
}

/// Version index of a team's shared secret.
///
/// Strictly increasing and gapless from 1; a generation is sealed once
/// created and only superseded by rotation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Generation(pub u32);

impl Generation {
    /// The first generation every team starts at.
    pub const FIRST: Self = Self(1);

    /// The generation a rotation produces.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash identifying one link in a team sigchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub [u8; 32]);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Human-readable team name ("acme" or "acme.platform.infra").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamName(pub String);

impl std::fmt::Display for TeamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Downstream application a per-generation key is derived for.
///
/// Closed set: adding an application means updating the derivation label and
/// the reader-key-mask policy together, here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Application {
    /// Team filesystem encryption.
    Kbfs,
    /// Chat message encryption.
    Chat,
    /// Saltpack message encryption.
    Saltpack,
    /// Git repository metadata encryption.
    GitMetadata,
    /// Token-invite key packing.
    SeitanInviteToken,
}

impl Application {
    /// Domain-separation label for key derivation.
    pub fn derivation_label(self) -> &'static str {
        match self {
            Self::Kbfs => "Cohort-Derived-Team-KBFS-1",
            Self::Chat => "Cohort-Derived-Team-Chat-1",
            Self::Saltpack => "Cohort-Derived-Team-Saltpack-1",
            Self::GitMetadata => "Cohort-Derived-Team-GitMetadata-1",
            Self::SeitanInviteToken => "Cohort-Derived-Team-Seitan-1",
        }
    }

    /// Whether this application's keys are reader-masked.
    ///
    /// Token-invite keys are not: implicit admins have every privilege of
    /// explicit members, so masking would add nothing.
    pub fn uses_reader_key_mask(self) -> bool {
        !matches!(self, Self::SeitanInviteToken)
    }
}

/// A usable per-(application, generation) key.
#[derive(Clone)]
pub struct ApplicationKey {
    /// Application the key was derived for.
    pub application: Application,
    /// Generation of the seed it was derived from.
    pub generation: Generation,
    key: [u8; 32],
}

impl ApplicationKey {
    pub(crate) fn new(application: Application, generation: Generation, key: [u8; 32]) -> Self {
        Self { application, generation, key }
    }

    /// The raw 32-byte key.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for ApplicationKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for ApplicationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationKey")
            .field("application", &self.application)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Proof that the signer observed sufficiently recent global state.
///
/// Opaque to this engine beyond its monotonically-advancing seqno; attached
/// to any link that asserts an admin permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessAnchor {
    /// Global sequence number of the anchor.
    pub seqno: Seqno,
    /// Root hash at that seqno.
    pub root_hash: [u8; 32],
}

/// Why a freshness anchor is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessPurpose {
    /// The link will assert an admin permission.
    AdminAssertion,
}

/// Identifier of a downgrade lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub [u8; 16]);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A time-bound server grant permitting safe revocation of the named users'
/// privileged status. Must be cancelled exactly once after use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DowngradeLease {
    /// Lease identifier, included in the guarded post and in cancellation.
    pub id: LeaseId,
    /// Users whose privileged status this lease covers.
    pub uids: Vec<UserId>,
}

/// Identifier of a team invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InviteId(pub [u8; 16]);

impl InviteId {
    /// Generate a random invite id.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut id = [0u8; 16];
        rng.fill_bytes(&mut id);
        Self(id)
    }
}

impl std::fmt::Display for InviteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Delivery channel of an invite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InviteType {
    /// Addressed to an existing account that cannot be added directly yet.
    Keybase,
    /// Addressed to an email address, resolved later.
    Email,
    /// Addressed to a social-network handle, resolved later.
    Social(String),
    /// Anonymous token invite; redeemable by whoever holds the invite key.
    SeitanToken,
}

impl InviteType {
    /// Wire tag for the invite entry.
    pub fn wire_tag(&self) -> &str {
        match self {
            Self::Keybase => "keybase",
            Self::Email => "email",
            Self::Social(service) => service,
            Self::SeitanToken => "seitan_invite_token",
        }
    }
}

/// An invite as recorded in chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    /// Unique invite id.
    pub id: InviteId,
    /// Delivery channel.
    pub invite_type: InviteType,
    /// Invitee name, or the packed token for token invites.
    pub name: String,
    /// Role granted on completion.
    pub role: Role,
}

/// Which aspects of the team a posted link changed. Carried in the
/// fire-and-forget notification to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeamChangeSet {
    /// Membership was added, removed, or re-roled.
    pub membership_changed: bool,
    /// The generation secret rotated.
    pub key_rotated: bool,
    /// Settings or other metadata changed.
    pub misc: bool,
}

/// Where in which chain a user was granted admin-or-above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminLogPoint {
    /// Team whose chain contains the granting link.
    pub team_id: TeamId,
    /// Sequence number of the granting link.
    pub seqno: Seqno,
    /// Chain kind of the granting link.
    pub seq_type: SeqType,
}

/// Which sigchain family a seqno refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeqType {
    /// Private team chain.
    Private,
    /// Public team chain.
    Public,
}

impl SeqType {
    /// The chain family for a team's publicness.
    pub fn for_publicness(public: bool) -> Self {
        if public { Self::Public } else { Self::Private }
    }
}

/// Random per-link entropy preventing replay of structurally identical links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entropy(pub [u8; 18]);

impl Entropy {
    /// Draw fresh entropy.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut bytes = [0u8; 18];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Open/closed team settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSettings {
    /// Whether anyone may join without an invite.
    pub open: bool,
    /// Role granted to open joiners.
    pub join_as: Role,
}
