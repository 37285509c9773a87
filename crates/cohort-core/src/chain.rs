//! Read-only view of a team's reduced sigchain state.
//!
//! The reducer that folds links into this state lives outside this crate;
//! the engine only queries the result. Implementations are snapshots: the
//! answers must not change for the lifetime of one [`crate::team::Team`].

use crate::types::{
    AdminLogPoint, Generation, Invite, InviteType, LinkId, Role, Seqno, TeamId, TeamName,
    UserVersion,
};

/// Queries over the current reduced state of one team's chain.
pub trait ChainState: Send + Sync {
    /// The team this state belongs to.
    fn team_id(&self) -> TeamId;

    /// Human-readable team name.
    fn name(&self) -> TeamName;

    /// Whether the team is publicly visible.
    fn is_public(&self) -> bool;

    /// Whether the team is implicit (created to back a conversation or
    /// filesystem folder rather than named by users).
    fn is_implicit(&self) -> bool;

    /// Whether anyone may join without an invite.
    fn is_open(&self) -> bool;

    /// Parent team id; `None` for a root team.
    fn parent_id(&self) -> Option<TeamId>;

    /// Latest per-team-key generation.
    fn latest_generation(&self) -> Generation;

    /// Sequence number of the newest link.
    fn latest_seqno(&self) -> Seqno;

    /// Id of the newest link, embedded as `prev` in the next one.
    fn latest_link_id(&self) -> LinkId;

    /// Role of a user version, `Role::None` if not a member.
    fn user_role(&self, user: &UserVersion) -> Role;

    /// All explicit members with their roles.
    fn members(&self) -> Vec<(UserVersion, Role)>;

    /// The member version for a uid, regardless of eldest seqno.
    fn user_version_by_uid(&self, uid: crate::types::UserId) -> Option<UserVersion>;

    /// Where this user was granted admin-or-above in this chain, if ever.
    fn admin_log_point(&self, user: &UserVersion) -> Option<AdminLogPoint>;

    /// Direct subteam ids.
    fn subteams(&self) -> Vec<TeamId>;

    /// Invites that are neither completed nor revoked.
    fn active_invites(&self) -> Vec<Invite>;

    /// Whether an active invite exists for this (name, type) pair.
    fn has_active_invite(&self, name: &str, invite_type: &InviteType) -> bool {
        self.active_invites()
            .iter()
            .any(|i| i.name == name && i.invite_type == *invite_type)
    }
}
