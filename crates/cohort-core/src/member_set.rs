//! Resolution of a role-change request into recipients and downgrades.
//!
//! A [`ChangeRequest`] names target roles by user version. Resolution loads
//! each named identity's key material and produces a [`MemberSet`]: the
//! per-role member lists, the recipients who need seed boxes, and the
//! downgrade set that must be leased before posting.

use std::collections::BTreeMap;

use crate::chain::ChainState;
use crate::error::TeamError;
use crate::link::MembersSection;
use crate::service::{MemberLookup, UserResolver};
use crate::types::{InviteId, Role, UserId, UserVersion};

/// Requested role changes, grouped by target role.
///
/// An identity listed under `none` is removed entirely. `completed_invites`
/// marks invites satisfied by this change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeRequest {
    /// Identities to become owners.
    pub owners: Vec<UserVersion>,
    /// Identities to become admins.
    pub admins: Vec<UserVersion>,
    /// Identities to become writers.
    pub writers: Vec<UserVersion>,
    /// Identities to become readers.
    pub readers: Vec<UserVersion>,
    /// Identities to remove from the team.
    pub none: Vec<UserVersion>,
    /// Invites completed by this change.
    pub completed_invites: Vec<InviteId>,
}

impl ChangeRequest {
    /// File `version` under the list for `role`.
    ///
    /// `Role::None` is not a valid target here; removals are filed
    /// explicitly by the caller.
    pub fn add_with_role(&mut self, version: UserVersion, role: Role) -> Result<(), TeamError> {
        match role {
            Role::Owner => self.owners.push(version),
            Role::Admin => self.admins.push(version),
            Role::Writer => self.writers.push(version),
            Role::Reader => self.readers.push(version),
            Role::None => return Err(TeamError::UnexpectedRole { role }),
        }
        Ok(())
    }

    /// True when no change of any kind is requested.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
            && self.admins.is_empty()
            && self.writers.is_empty()
            && self.readers.is_empty()
            && self.none.is_empty()
            && self.completed_invites.is_empty()
    }
}

/// One member named in a change, with resolved key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// The member's pinned version.
    pub version: UserVersion,
    /// The member's device encryption public key.
    pub encryption_key: [u8; 32],
}

/// A resolved change request: per-role members plus box recipients.
///
/// Transient; consumed once per operation.
#[derive(Debug, Clone, Default)]
pub struct MemberSet {
    /// Members becoming owners.
    pub owners: Vec<Member>,
    /// Members becoming admins.
    pub admins: Vec<Member>,
    /// Members becoming writers.
    pub writers: Vec<Member>,
    /// Members becoming readers.
    pub readers: Vec<Member>,
    /// Identities being removed. Keys are not needed to remove someone.
    pub none: Vec<UserVersion>,
    /// Invites completed by this change.
    pub completed_invites: Vec<InviteId>,
    recipients: BTreeMap<UserVersion, [u8; 32]>,
}

impl MemberSet {
    /// Resolve every identity named in `req` to its key material.
    ///
    /// Identities being added must resolve to live accounts; a reset account
    /// in an add list is a resolution error. Removals are kept as bare
    /// versions.
    pub async fn resolve(
        resolver: &dyn UserResolver,
        req: &ChangeRequest,
    ) -> Result<Self, TeamError> {
        let mut set = Self {
            none: req.none.clone(),
            completed_invites: req.completed_invites.clone(),
            ..Self::default()
        };

        set.owners = Self::resolve_group(resolver, &req.owners).await?;
        set.admins = Self::resolve_group(resolver, &req.admins).await?;
        set.writers = Self::resolve_group(resolver, &req.writers).await?;
        set.readers = Self::resolve_group(resolver, &req.readers).await?;

        for member in
            set.owners.iter().chain(&set.admins).chain(&set.writers).chain(&set.readers)
        {
            set.recipients.insert(member.version, member.encryption_key);
        }

        Ok(set)
    }

    async fn resolve_group(
        resolver: &dyn UserResolver,
        versions: &[UserVersion],
    ) -> Result<Vec<Member>, TeamError> {
        let mut members = Vec::with_capacity(versions.len());
        for version in versions {
            match resolver.lookup(version).await? {
                MemberLookup::Active(user) => {
                    members.push(Member { version: *version, encryption_key: user.encryption_key });
                }
                MemberLookup::Reset { current_eldest } => {
                    return Err(TeamError::Resolve(format!(
                        "cannot add {version}: account was reset (now at eldest seqno {current_eldest})"
                    )));
                }
            }
        }
        Ok(members)
    }

    /// True when the change removes anyone from the team.
    pub fn has_removal(&self) -> bool {
        !self.none.is_empty()
    }

    /// True when the change removes anyone or lowers anyone's role.
    ///
    /// Either condition forces a full key rotation: the departing or demoted
    /// identity must not be able to read future material.
    pub fn has_privilege_reduction(&self, chain: &dyn ChainState) -> bool {
        if self.has_removal() {
            return true;
        }
        let demoted = |members: &[Member], target: Role| {
            members.iter().any(|m| chain.user_role(&m.version) > target)
        };
        demoted(&self.owners, Role::Owner)
            || demoted(&self.admins, Role::Admin)
            || demoted(&self.writers, Role::Writer)
            || demoted(&self.readers, Role::Reader)
    }

    /// The membership section mirroring this set.
    pub fn section(&self) -> MembersSection {
        let versions = |members: &[Member]| members.iter().map(|m| m.version).collect();
        MembersSection {
            owners: versions(&self.owners),
            admins: versions(&self.admins),
            writers: versions(&self.writers),
            readers: versions(&self.readers),
            none: self.none.clone(),
        }
    }

    /// Identities that need a seed box, with their device keys.
    pub fn recipients(&self) -> &BTreeMap<UserVersion, [u8; 32]> {
        &self.recipients
    }

    /// Number of identities currently needing a box.
    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    /// New admin-or-above members, who also need every descendant team's
    /// current secret boxed for them.
    pub fn admin_and_owner_recipients(&self) -> BTreeMap<UserVersion, [u8; 32]> {
        self.owners
            .iter()
            .chain(&self.admins)
            .map(|m| (m.version, m.encryption_key))
            .collect()
    }

    /// Drop recipients who are already members; they hold the current seed.
    pub fn remove_existing_members(&mut self, chain: &dyn ChainState) {
        self.recipients.retain(|version, _| chain.user_role(version) == Role::None);
    }

    /// Add every current member not being removed to the recipient set.
    ///
    /// Used when rotating: the fresh seed must reach all remaining members.
    /// Members whose accounts were reset are skipped; they cannot decrypt
    /// anything anymore.
    pub async fn add_remaining_recipients(
        &mut self,
        resolver: &dyn UserResolver,
        existing: Vec<(UserVersion, Role)>,
    ) -> Result<(), TeamError> {
        for (version, _) in existing {
            if self.none.contains(&version) {
                continue;
            }
            match resolver.lookup(&version).await? {
                MemberLookup::Active(user) => {
                    self.recipients.insert(version, user.encryption_key);
                }
                MemberLookup::Reset { .. } => {}
            }
        }
        Ok(())
    }

    /// Add an already-resolved identity to the recipient set.
    pub fn add_recipient(&mut self, version: UserVersion, encryption_key: [u8; 32]) {
        self.recipients.insert(version, encryption_key);
    }

    /// Uids that must be leased before this change can post.
    ///
    /// Removals and members dropping below admin both qualify. An identity
    /// whose account was reset since the snapshot was loaded is exempt: its
    /// old keys are gone, so there is nothing left to race over.
    pub async fn downgraded_uids(
        &self,
        resolver: &dyn UserResolver,
        chain: &dyn ChainState,
    ) -> Result<Vec<UserId>, TeamError> {
        let mut uids = Vec::new();

        for version in &self.none {
            match resolver.lookup(version).await? {
                MemberLookup::Active(_) => uids.push(version.uid),
                MemberLookup::Reset { .. } => {}
            }
        }

        for member in self.writers.iter().chain(&self.readers) {
            if chain.user_role(&member.version).is_admin_or_above() {
                uids.push(member.version.uid);
            }
        }

        Ok(uids)
    }
}
