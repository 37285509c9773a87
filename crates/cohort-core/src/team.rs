//! The team mutation orchestrator.
//!
//! [`Team`] is one loaded snapshot of a team: its reduced chain state, the
//! generation seeds decrypted for it, and the external authorities it posts
//! through. Every public operation runs the same shape: resolve the change,
//! box key material, build and sign the link, lease if the change demotes
//! privileged members, post, notify.
//!
//! A snapshot is not safe for concurrent mutation. Operations that need to
//! observe their own effect (self-demotion before leaving) reload through
//! the loader and replace the snapshot in place.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use cohort_crypto::InviteKey;
use rand::rngs::OsRng;
use tracing::{debug, info};

use crate::chain::ChainState;
use crate::error::TeamError;
use crate::invite::{InviteEntry, InviteSection, generate_seitan_invite, parse_social};
use crate::keys::{BoxBatch, PerTeamKeySection, ReaderKeyMasks, TeamKeyManager};
use crate::lease::with_downgrade_lease;
use crate::link::{
    AdminSection, KbfsSection, LinkType, ParentSection, PayloadArgs, SubteamSection, TeamSection,
    precheck_section, sig_payload, sig_team_item, validate_settings,
};
use crate::member_set::{ChangeRequest, MemberSet};
use crate::operator::Operator;
use crate::service::{
    ConfirmUi, DeleteKind, LoadArgs, MemberLookup, Services, UserResolution, require_anchor,
};
use crate::types::{
    Application, ApplicationKey, Entropy, FreshnessAnchor, FreshnessPurpose, Generation,
    InviteType, Role, SeqType, Seqno, TeamChangeSet, TeamId, TeamName, TeamSettings, UserId,
    UserVersion,
};

/// One loaded team snapshot plus the authorities it operates against.
pub struct Team {
    chain: Arc<dyn ChainState>,
    keys: TeamKeyManager,
    masks: ReaderKeyMasks,
    services: Services,
    rotated: bool,
}

impl Team {
    /// Assemble a snapshot from loaded state.
    pub fn new(
        chain: Arc<dyn ChainState>,
        keys: TeamKeyManager,
        masks: ReaderKeyMasks,
        services: Services,
    ) -> Self {
        Self { chain, keys, masks, services, rotated: false }
    }

    /// The team's id.
    pub fn id(&self) -> TeamId {
        self.chain.team_id()
    }

    /// The team's name.
    pub fn name(&self) -> TeamName {
        self.chain.name()
    }

    /// Whether the team's chain is public.
    pub fn is_public(&self) -> bool {
        self.chain.is_public()
    }

    /// Whether the team is implicit.
    pub fn is_implicit(&self) -> bool {
        self.chain.is_implicit()
    }

    /// Whether the team has a parent.
    pub fn is_subteam(&self) -> bool {
        self.chain.parent_id().is_some()
    }

    /// Whether anyone may join without an invite.
    pub fn is_open(&self) -> bool {
        self.chain.is_open()
    }

    /// The generation the loaded chain state is at.
    pub fn generation(&self) -> Generation {
        self.chain.latest_generation()
    }

    /// Sequence number of the newest loaded link.
    pub fn current_seqno(&self) -> Seqno {
        self.chain.latest_seqno()
    }

    /// Sequence number the next link will carry.
    pub fn next_seqno(&self) -> Seqno {
        self.chain.latest_seqno() + 1
    }

    /// The loaded chain state.
    pub fn chain(&self) -> &dyn ChainState {
        self.chain.as_ref()
    }

    /// Role of a user version, `Role::None` if not a member.
    pub fn member_role(&self, user: &UserVersion) -> Role {
        self.chain.user_role(user)
    }

    /// The operator's own role in this team.
    pub fn my_role(&self, operator: &Operator) -> Role {
        self.chain.user_role(&operator.user)
    }

    /// The member version for a uid, regardless of eldest seqno.
    pub fn user_version_by_uid(&self, uid: UserId) -> Option<UserVersion> {
        self.chain.user_version_by_uid(uid)
    }

    /// Whether an active invite exists for this (name, type) pair.
    pub fn has_active_invite(&self, name: &str, invite_type: &InviteType) -> bool {
        self.chain.has_active_invite(name, invite_type)
    }

    /// The application key at a specific generation.
    pub fn application_key_at_generation(
        &self,
        application: Application,
        generation: Generation,
    ) -> Result<ApplicationKey, TeamError> {
        self.keys.application_key_at_generation(application, generation, &self.masks)
    }

    /// The application key at the newest generation.
    pub fn application_key(&self, application: Application) -> Result<ApplicationKey, TeamError> {
        self.keys.application_key(application, &self.masks)
    }

    /// Keys for every generation of an application, oldest first.
    pub fn all_application_keys(
        &self,
        application: Application,
    ) -> Result<Vec<ApplicationKey>, TeamError> {
        self.keys.all_application_keys(application, &self.masks)
    }

    /// All admins, owners, and (for subteams) implicit admins.
    pub async fn all_admins(&self) -> Result<Vec<UserVersion>, TeamError> {
        let mut admins: Vec<UserVersion> = self
            .chain
            .members()
            .into_iter()
            .filter(|(_, role)| role.is_admin_or_above())
            .map(|(version, _)| version)
            .collect();

        if self.is_subteam() {
            for version in self.implicit_admins().await? {
                if !admins.contains(&version) {
                    admins.push(version);
                }
            }
        }

        Ok(admins)
    }

    /// Rotate the generation secret for all current members.
    pub async fn rotate(&mut self, operator: &Operator) -> Result<(), TeamError> {
        self.keys.latest_shared_secret()?;

        let admin = self.admin_permission(operator, false).await?;
        let mut member_set = MemberSet::default();
        let mut rng = OsRng;

        let (boxes, per_team_key) = self.rotate_boxes(operator, &mut member_set, &mut rng).await?;

        let mut section = TeamSection::bare(self.id(), self.is_implicit(), self.is_public());
        section.admin = admin;
        section.members = Some(member_set.section());
        section.per_team_key = Some(per_team_key);

        let anchor = if section.admin.is_some() {
            Some(
                require_anchor(self.services.freshness.as_ref(), FreshnessPurpose::AdminAssertion)
                    .await?,
            )
        } else {
            None
        };

        let args = PayloadArgs { secret_boxes: Some(boxes), ..PayloadArgs::default() };
        self.post_change_item(operator, &section, LinkType::RotateKey, anchor, args).await?;

        info!(team = %self.id(), generation = %self.keys.latest_generation(), "team key rotated");
        self.notify(TeamChangeSet { key_rotated: true, ..TeamChangeSet::default() }).await;
        Ok(())
    }

    /// Apply a role-change request.
    pub async fn change_membership(
        &mut self,
        operator: &Operator,
        req: &ChangeRequest,
    ) -> Result<(), TeamError> {
        self.change_membership_permanent(operator, req, false).await
    }

    /// Apply a role-change request, optionally banning removed members from
    /// rejoining an open team.
    pub async fn change_membership_permanent(
        &mut self,
        operator: &Operator,
        req: &ChangeRequest,
        permanent: bool,
    ) -> Result<(), TeamError> {
        if self.is_subteam() && !req.owners.is_empty() {
            return Err(TeamError::SubteamOwnersNotAllowed);
        }

        let (section, secret_boxes, implicit_admin_boxes, member_set) =
            self.change_membership_section(operator, req).await?;

        let downgrades = member_set
            .downgraded_uids(self.services.resolver.as_ref(), self.chain.as_ref())
            .await?;

        let this = &*self;
        with_downgrade_lease(
            self.services.leases.as_ref(),
            this.id(),
            &downgrades,
            |lease, anchor| async move {
                // The lease request supplies the anchor when a lease is held;
                // otherwise fetch one here, inside the guarded attempt.
                let anchor = match anchor {
                    Some(anchor) => anchor,
                    None => {
                        require_anchor(
                            this.services.freshness.as_ref(),
                            FreshnessPurpose::AdminAssertion,
                        )
                        .await?
                    }
                };
                let args = PayloadArgs {
                    secret_boxes,
                    implicit_admin_boxes,
                    lease_id: lease.map(|l| l.id),
                    permanent: permanent.then_some(true),
                };
                this.post_change_item(
                    operator,
                    &section,
                    LinkType::ChangeMembership,
                    Some(anchor),
                    args,
                )
                .await
            },
        )
        .await?;

        self.notify(TeamChangeSet { membership_changed: true, ..TeamChangeSet::default() }).await;
        Ok(())
    }

    /// Leave the team, self-demoting first when the caller is admin-or-above.
    ///
    /// Fails with [`TeamError::ImplicitAdminCannotLeave`] when the caller has
    /// no explicit membership and holds admin rights only through an
    /// ancestor.
    pub async fn leave(&mut self, operator: &Operator, permanent: bool) -> Result<(), TeamError> {
        if self.my_role(operator).is_admin_or_above() {
            let req =
                ChangeRequest { writers: vec![operator.user], ..ChangeRequest::default() };
            self.change_membership(operator, &req).await?;

            // Reload to observe the demotion before posting the leave link.
            let reloaded = self
                .services
                .loader
                .load(LoadArgs {
                    id: self.id(),
                    public: self.is_public(),
                    force_repoll: true,
                    need_admin: false,
                })
                .await?;
            *self = reloaded;
        }

        if self.my_role(operator) == Role::None
            && self.admin_permission(operator, false).await?.is_some()
        {
            return Err(TeamError::ImplicitAdminCannotLeave);
        }

        let section = TeamSection::bare(self.id(), self.is_implicit(), self.is_public());
        let args = PayloadArgs { permanent: Some(permanent), ..PayloadArgs::default() };
        self.post_change_item(operator, &section, LinkType::Leave, None, args).await
    }

    /// Delete this team, dispatching on whether it has a parent.
    pub async fn delete(&self, operator: &Operator, ui: &dyn ConfirmUi) -> Result<(), TeamError> {
        if self.is_subteam() {
            self.delete_subteam(operator, ui).await
        } else {
            self.delete_root(operator, ui).await
        }
    }

    /// Delete a root team. Requires ownership and explicit confirmation.
    pub async fn delete_root(
        &self,
        operator: &Operator,
        ui: &dyn ConfirmUi,
    ) -> Result<(), TeamError> {
        if self.my_role(operator) != Role::Owner {
            return Err(TeamError::SelfNotOwner);
        }

        if !ui.confirm_delete(DeleteKind::Root, &self.name()).await? {
            return Err(TeamError::DeleteNotConfirmed);
        }

        let section = TeamSection::bare(self.id(), self.is_implicit(), self.is_public());
        self.post_change_item(operator, &section, LinkType::DeleteRoot, None, PayloadArgs::default())
            .await?;

        info!(team = %self.id(), "root team deleted");
        Ok(())
    }

    /// Delete a subteam: one link in the parent chain, one in the child's,
    /// posted as a single atomic batch.
    pub async fn delete_subteam(
        &self,
        operator: &Operator,
        ui: &dyn ConfirmUi,
    ) -> Result<(), TeamError> {
        if self.is_implicit() {
            return Err(TeamError::ImplicitTeamOperation { operation: "delete_subteam" });
        }
        let Some(parent_id) = self.chain.parent_id() else {
            return Err(TeamError::Service("delete_subteam called on a root team".into()));
        };

        let parent = self
            .services
            .loader
            .load(LoadArgs {
                id: parent_id,
                public: self.is_public(),
                force_repoll: true,
                need_admin: false,
            })
            .await?;

        let admin = parent.admin_permission(operator, true).await?;

        if !ui.confirm_delete(DeleteKind::Subteam, &self.name()).await? {
            return Err(TeamError::DeleteNotConfirmed);
        }

        let mut rng = OsRng;
        let anchor =
            require_anchor(self.services.freshness.as_ref(), FreshnessPurpose::AdminAssertion)
                .await?;

        let mut parent_section =
            TeamSection::bare(parent.id(), parent.is_implicit(), parent.is_public());
        parent_section.admin = admin;
        parent_section.subteam = Some(SubteamSection { id: self.id(), name: self.name() });
        parent_section.entropy = Some(Entropy::generate(&mut rng));
        let sig_parent = sig_team_item(
            operator,
            parent.chain.as_ref(),
            None,
            parent_section,
            LinkType::DeleteSubteam,
            Some(anchor),
        )?;

        let mut sub_section = TeamSection::bare(self.id(), self.is_implicit(), self.is_public());
        sub_section.admin = admin;
        sub_section.name = Some(self.name());
        sub_section.parent = Some(ParentSection {
            id: parent.id(),
            // The up-pointer names the parent's *new* delete link.
            seqno: parent.current_seqno() + 1,
            seq_type: SeqType::for_publicness(parent.is_public()),
        });
        let sig_sub = sig_team_item(
            operator,
            self.chain.as_ref(),
            None,
            sub_section,
            LinkType::DeleteUpPointer,
            Some(anchor),
        )?;

        let payload = sig_payload(vec![sig_parent, sig_sub], PayloadArgs::default());
        self.services.poster.post(&payload).await?;

        info!(team = %self.id(), parent = %parent_id, "subteam deleted");
        Ok(())
    }

    /// Invite a member who cannot be added directly.
    pub async fn invite_member(
        &self,
        operator: &Operator,
        invitee: Invitee,
        role: Role,
    ) -> Result<AddMemberResult, TeamError> {
        match invitee {
            Invitee::Keybase { version, username } => {
                debug!(team = %self.name(), user = %version, "invite keybase member");
                let entry = InviteEntry::keybase(version, &mut OsRng);
                self.post_invite(operator, entry, role).await?;
                Ok(AddMemberResult {
                    invited: true,
                    user: Some(AddedUser { uid: version.uid, username }),
                })
            }
            Invitee::Assertion(assertion) => {
                // Social and email channels cannot carry ownership.
                if role.is_or_above(Role::Owner) {
                    return Err(TeamError::UnexpectedRole { role });
                }
                let (service, handle) = parse_social(&assertion)?;
                debug!(team = %self.name(), %service, %handle, "invite social member");
                let entry = InviteEntry::social(&service, &handle, &mut OsRng);
                self.post_invite(operator, entry, role).await?;
                Ok(AddMemberResult { invited: true, user: None })
            }
        }
    }

    /// Invite an email address, resolved to an account later.
    pub async fn invite_email_member(
        &self,
        operator: &Operator,
        email: &str,
        role: Role,
    ) -> Result<(), TeamError> {
        debug!(team = %self.name(), %email, "invite email member");
        if self.is_subteam() && role == Role::Owner {
            return Err(TeamError::SubteamOwnersNotAllowed);
        }
        if role == Role::Owner {
            return Err(TeamError::UnexpectedRole { role });
        }
        let entry = InviteEntry::email(email, &mut OsRng);
        self.post_invite(operator, entry, role).await
    }

    /// Create a token invite redeemable by whoever holds the returned key.
    ///
    /// The key is returned exactly once; only its packed form is posted.
    pub async fn invite_seitan(
        &self,
        operator: &Operator,
        role: Role,
    ) -> Result<InviteKey, TeamError> {
        debug!(team = %self.name(), ?role, "invite seitan");
        // Token invites cannot carry ownership.
        if role == Role::Owner {
            return Err(TeamError::UnexpectedRole { role });
        }
        let app_key = self.application_key(Application::SeitanInviteToken)?;
        let mut rng = OsRng;
        let invite = generate_seitan_invite(&app_key, &mut rng)?;
        self.post_invite(operator, invite.entry, role).await?;
        Ok(invite.invite_key)
    }

    async fn post_invite(
        &self,
        operator: &Operator,
        entry: InviteEntry,
        role: Role,
    ) -> Result<(), TeamError> {
        if self.has_active_invite(&entry.name, &entry.invite_type) {
            return Err(TeamError::InviteAlreadyExists { name: entry.name });
        }
        if self.is_subteam() && role == Role::Owner {
            return Err(TeamError::SubteamOwnersNotAllowed);
        }
        let section = InviteSection::with_role(role, vec![entry])?;
        self.post_team_invites(operator, section).await
    }

    /// Post a batch of invites as one invite link.
    pub async fn post_team_invites(
        &self,
        operator: &Operator,
        invites: InviteSection,
    ) -> Result<(), TeamError> {
        let admin = self.admin_permission(operator, true).await?;

        if self.is_subteam() && invites.has_owners() {
            return Err(TeamError::SubteamOwnersNotAllowed);
        }

        let mut rng = OsRng;
        let mut section = TeamSection::bare(self.id(), self.is_implicit(), self.is_public());
        section.admin = admin;
        section.invites = Some(invites);
        section.entropy = Some(Entropy::generate(&mut rng));

        let anchor =
            require_anchor(self.services.freshness.as_ref(), FreshnessPurpose::AdminAssertion)
                .await?;

        self.post_change_item(operator, &section, LinkType::Invite, Some(anchor), PayloadArgs::default())
            .await?;

        self.notify(TeamChangeSet { membership_changed: true, ..TeamChangeSet::default() }).await;
        Ok(())
    }

    /// Post an open/closed settings change. No key material is implied.
    pub async fn post_settings(
        &self,
        operator: &Operator,
        settings: TeamSettings,
    ) -> Result<(), TeamError> {
        self.keys.latest_shared_secret()?;
        validate_settings(&settings)?;

        let admin = self.admin_permission(operator, true).await?;

        let mut section = TeamSection::bare(self.id(), self.is_implicit(), self.is_public());
        section.admin = admin;
        section.settings = Some(settings);

        let anchor =
            require_anchor(self.services.freshness.as_ref(), FreshnessPurpose::AdminAssertion)
                .await?;

        self.post_change_item(operator, &section, LinkType::Settings, Some(anchor), PayloadArgs::default())
            .await?;

        self.notify(TeamChangeSet::default()).await;
        Ok(())
    }

    /// Bind an external filesystem folder id to an implicit team.
    pub async fn associate_external_id(
        &self,
        operator: &Operator,
        tlf_id: &str,
    ) -> Result<(), TeamError> {
        if !self.is_implicit() {
            return Err(TeamError::ImplicitTeamOperation { operation: "associate_external_id" });
        }

        let mut section = TeamSection::bare(self.id(), self.is_implicit(), self.is_public());
        section.kbfs = Some(KbfsSection { tlf_id: tlf_id.to_string() });

        self.post_change_item(operator, &section, LinkType::KbfsSettings, None, PayloadArgs::default())
            .await
    }

    /// The admin assertion for this operator, searching the ancestor chain.
    ///
    /// Walks parent pointers upward until an admin log point for the
    /// operator is found; a visited set guards against malformed cycles.
    async fn admin_permission(
        &self,
        operator: &Operator,
        required: bool,
    ) -> Result<Option<AdminSection>, TeamError> {
        if let Some(point) = self.chain.admin_log_point(&operator.user) {
            return Ok(Some(point.into()));
        }

        let mut visited = HashSet::from([self.id()]);
        let mut parent = self.chain.parent_id();
        while let Some(id) = parent {
            if !visited.insert(id) {
                break;
            }
            let ancestor = self
                .services
                .loader
                .load(LoadArgs {
                    id,
                    public: self.is_public(),
                    force_repoll: true,
                    need_admin: false,
                })
                .await?;
            if let Some(point) = ancestor.chain.admin_log_point(&operator.user) {
                return Ok(Some(point.into()));
            }
            parent = ancestor.chain.parent_id();
        }

        if required { Err(TeamError::AdminRequired) } else { Ok(None) }
    }

    /// Admin-or-above members of every ancestor team.
    async fn implicit_admins(&self) -> Result<Vec<UserVersion>, TeamError> {
        let mut admins = Vec::new();
        let mut visited = HashSet::from([self.id()]);
        let mut parent = self.chain.parent_id();
        while let Some(id) = parent {
            if !visited.insert(id) {
                break;
            }
            let ancestor = self
                .services
                .loader
                .load(LoadArgs {
                    id,
                    public: self.is_public(),
                    force_repoll: true,
                    need_admin: false,
                })
                .await?;
            for (version, role) in ancestor.chain.members() {
                if role.is_admin_or_above() && !admins.contains(&version) {
                    admins.push(version);
                }
            }
            parent = ancestor.chain.parent_id();
        }
        Ok(admins)
    }

    /// Every team below this one, loaded with admin visibility.
    async fn transitive_subteams(&self) -> Result<Vec<Team>, TeamError> {
        let mut found = Vec::new();
        let mut visited = HashSet::from([self.id()]);
        let mut worklist = self.chain.subteams();
        while let Some(id) = worklist.pop() {
            if !visited.insert(id) {
                continue;
            }
            let subteam = self
                .services
                .loader
                .load(LoadArgs {
                    id,
                    public: self.is_public(),
                    force_repoll: true,
                    need_admin: true,
                })
                .await?;
            worklist.extend(subteam.chain.subteams());
            found.push(subteam);
        }
        Ok(found)
    }

    async fn change_membership_section(
        &mut self,
        operator: &Operator,
        req: &ChangeRequest,
    ) -> Result<
        (TeamSection, Option<BoxBatch>, BTreeMap<TeamId, BoxBatch>, MemberSet),
        TeamError,
    > {
        self.keys.latest_shared_secret()?;

        let admin = self.admin_permission(operator, true).await?;

        let mut member_set =
            MemberSet::resolve(self.services.resolver.as_ref(), req).await?;

        let mut section = TeamSection::bare(self.id(), self.is_implicit(), self.is_public());
        section.admin = admin;
        section.members = Some(member_set.section());
        section.completed_invites = req.completed_invites.clone();

        let (secret_boxes, implicit_admin_boxes, per_team_key) =
            self.recipient_boxes(operator, &mut member_set).await?;
        section.per_team_key = per_team_key;

        Ok((section, secret_boxes, implicit_admin_boxes, member_set))
    }

    /// Box the seed for everyone the change requires, rotating when the
    /// change reduces anyone's privileges.
    async fn recipient_boxes(
        &mut self,
        operator: &Operator,
        member_set: &mut MemberSet,
    ) -> Result<
        (Option<BoxBatch>, BTreeMap<TeamId, BoxBatch>, Option<PerTeamKeySection>),
        TeamError,
    > {
        let mut rng = OsRng;

        // New admins and owners need every descendant team's current secret,
        // so their implicit adminship is usable immediately.
        let mut implicit_admin_boxes = BTreeMap::new();
        let admin_recipients = member_set.admin_and_owner_recipients();
        if !admin_recipients.is_empty() {
            for subteam in self.transitive_subteams().await? {
                let batch =
                    subteam.keys.shared_secret_boxes(operator, &admin_recipients, &mut rng)?;
                implicit_admin_boxes.insert(subteam.id(), batch);
            }
        }

        if member_set.has_privilege_reduction(self.chain.as_ref()) {
            debug!(team = %self.id(), "change reduces privileges, rotating team key");
            let (boxes, per_team_key) =
                self.rotate_boxes(operator, member_set, &mut rng).await?;
            return Ok((Some(boxes), implicit_admin_boxes, Some(per_team_key)));
        }

        // Existing members already hold the current seed.
        member_set.remove_existing_members(self.chain.as_ref());
        debug!(
            team = %self.id(),
            new_members = member_set.recipient_count(),
            "membership change without rotation"
        );
        if member_set.recipient_count() == 0 {
            return Ok((None, implicit_admin_boxes, None));
        }

        let boxes = self.keys.shared_secret_boxes(operator, member_set.recipients(), &mut rng)?;
        Ok((Some(boxes), implicit_admin_boxes, None))
    }

    /// Rotate and box the fresh seed for every remaining member, and for
    /// every implicit admin when this team is a subteam.
    async fn rotate_boxes(
        &mut self,
        operator: &Operator,
        member_set: &mut MemberSet,
        rng: &mut OsRng,
    ) -> Result<(BoxBatch, PerTeamKeySection), TeamError> {
        member_set
            .add_remaining_recipients(self.services.resolver.as_ref(), self.chain.members())
            .await?;

        if self.is_subteam() {
            for version in self.implicit_admins().await? {
                match self.services.resolver.lookup(&version).await? {
                    MemberLookup::Active(user) => {
                        member_set.add_recipient(version, user.encryption_key);
                    }
                    MemberLookup::Reset { .. } => {}
                }
            }
        }

        self.rotated = true;
        self.keys.rotate_shared_secret_boxes(operator, member_set.recipients(), rng)
    }

    /// Sign one link for this team and post it with its key material.
    async fn post_change_item(
        &self,
        operator: &Operator,
        section: &TeamSection,
        link_type: LinkType,
        anchor: Option<FreshnessAnchor>,
        args: PayloadArgs,
    ) -> Result<(), TeamError> {
        precheck_section(self.chain.as_ref(), section)?;

        let keys = link_type.uses_per_team_keys().then_some(&self.keys);
        let link =
            sig_team_item(operator, self.chain.as_ref(), keys, section.clone(), link_type, anchor)?;

        let payload = sig_payload(vec![link], args);
        self.services.poster.post(&payload).await
    }

    /// Announce a posted change. Receivers are idempotent; the next seqno
    /// doubles as a load hint.
    async fn notify(&self, mut changes: TeamChangeSet) {
        changes.key_rotated = changes.key_rotated || self.rotated;
        self.services
            .notifier
            .notify(self.id(), self.name(), self.next_seqno(), self.is_implicit(), changes)
            .await;
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// Who an invite is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invitee {
    /// An existing account without usable keys, pinned to a version.
    Keybase {
        /// The account's current version.
        version: UserVersion,
        /// Resolved username, echoed back in the result.
        username: String,
    },
    /// A social or email assertion pending resolution.
    Assertion(String),
}

/// Result of an invite-or-add operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddMemberResult {
    /// Whether an invite (rather than a direct add) was posted.
    pub invited: bool,
    /// The affected account, when the invitee resolved to one.
    pub user: Option<AddedUser>,
}

/// An account touched by an invite-or-add operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedUser {
    /// The account's uid.
    pub uid: UserId,
    /// The account's username.
    pub username: String,
}

/// Why a best-effort target was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The resolver failed for this target.
    ResolutionFailed(String),
    /// The pinned eldest seqno no longer matches the server's.
    StaleEldestSeqno {
        /// Eldest seqno the caller asked for.
        requested: Seqno,
        /// Eldest seqno the account lives at now.
        current: Seqno,
    },
    /// Already a member at or above the target role.
    AlreadyAtRole(Role),
    /// A newer version of the account is already in the team.
    NewerVersionInTeam(UserVersion),
    /// An equivalent invite is already active.
    DuplicateInvite,
    /// The target needed an invite, and invites cannot grant ownership.
    OwnerInviteUnsupported,
}

/// What happened to one best-effort target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Added via the membership link.
    Added,
    /// Added via a keybase-type invite.
    Invited,
    /// Skipped, with the reason made explicit.
    Skipped(SkipReason),
}

/// Per-target outcome of [`add_members_best_effort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    /// The requested user version.
    pub target: UserVersion,
    /// What happened to it.
    pub disposition: Disposition,
}

/// Best-effort, idempotent bulk add.
///
/// Classifies each target as a direct add, a keybase-type invite (no usable
/// key yet), or a skip, then posts at most one membership link and one
/// invite link. Per-target failures become skips; the only fatal
/// classification error is a target role outside the member roles. Calling
/// twice with the same input posts nothing the second time.
pub async fn add_members_best_effort(
    services: &Services,
    operator: &Operator,
    team_id: TeamId,
    public: bool,
    role: Role,
    targets: &[UserVersion],
    force_repoll: bool,
) -> Result<Vec<TargetOutcome>, TeamError> {
    if role == Role::None {
        return Err(TeamError::UnexpectedRole { role });
    }

    let mut team = services
        .loader
        .load(LoadArgs { id: team_id, public, force_repoll, need_admin: false })
        .await?;

    let mut req = ChangeRequest::default();
    let mut pending_invites: Vec<UserVersion> = Vec::new();
    let mut dispositions: BTreeMap<UserVersion, Disposition> = BTreeMap::new();

    for target in targets {
        let needs_invite = match services.resolver.resolve_uid(target.uid).await {
            Ok(UserResolution::Resolved(user)) => {
                if user.version.eldest_seqno != target.eldest_seqno {
                    debug!(user = %target, current = user.version.eldest_seqno, "stale eldest seqno, skipping");
                    dispositions.insert(
                        *target,
                        Disposition::Skipped(SkipReason::StaleEldestSeqno {
                            requested: target.eldest_seqno,
                            current: user.version.eldest_seqno,
                        }),
                    );
                    continue;
                }
                false
            }
            Ok(UserResolution::InviteRequired { version }) => {
                if version.eldest_seqno != target.eldest_seqno {
                    dispositions.insert(
                        *target,
                        Disposition::Skipped(SkipReason::StaleEldestSeqno {
                            requested: target.eldest_seqno,
                            current: version.eldest_seqno,
                        }),
                    );
                    continue;
                }
                debug!(user = %target, "no usable key, invite required");
                true
            }
            Err(err) => {
                debug!(user = %target, %err, "could not resolve target, skipping");
                dispositions.insert(
                    *target,
                    Disposition::Skipped(SkipReason::ResolutionFailed(err.to_string())),
                );
                continue;
            }
        };

        let current_role = team.member_role(target);
        if current_role.is_or_above(role) {
            debug!(user = %target, ?current_role, "already at or above target role, skipping");
            dispositions
                .insert(*target, Disposition::Skipped(SkipReason::AlreadyAtRole(current_role)));
            continue;
        }

        if let Some(existing) = team.user_version_by_uid(target.uid) {
            if existing.eldest_seqno > target.eldest_seqno {
                debug!(user = %target, %existing, "newer version already in team, skipping");
                dispositions.insert(
                    *target,
                    Disposition::Skipped(SkipReason::NewerVersionInTeam(existing)),
                );
                continue;
            }
            if existing.eldest_seqno < target.eldest_seqno {
                debug!(user = %target, old = %existing, "replacing old version of user");
                req.none.push(existing);
            }
        }

        if needs_invite {
            pending_invites.push(*target);
        } else {
            req.add_with_role(*target, role)?;
            dispositions.insert(*target, Disposition::Added);
        }
    }

    let posted_membership = !req.is_empty();
    if posted_membership {
        team.change_membership(operator, &req).await?;
    }

    if !pending_invites.is_empty() {
        if posted_membership {
            // Observe the link just posted before building the invite batch.
            team = services
                .loader
                .load(LoadArgs { id: team_id, public, force_repoll: true, need_admin: false })
                .await?;
        }

        if role == Role::Owner {
            debug!(team = %team_id, "invites cannot grant ownership, skipping invite batch");
            for target in pending_invites {
                dispositions.insert(
                    target,
                    Disposition::Skipped(SkipReason::OwnerInviteUnsupported),
                );
            }
        } else {
            let mut rng = OsRng;
            let mut entries = Vec::new();
            for target in pending_invites {
                let entry = InviteEntry::keybase(target, &mut rng);
                if team.has_active_invite(&entry.name, &entry.invite_type) {
                    debug!(user = %target, "invite already active, skipping");
                    dispositions
                        .insert(target, Disposition::Skipped(SkipReason::DuplicateInvite));
                    continue;
                }
                entries.push(entry);
                dispositions.insert(target, Disposition::Invited);
            }

            if !entries.is_empty() {
                let section = InviteSection::with_role(role, entries)?;
                team.post_team_invites(operator, section).await?;
            }
        }
    }

    Ok(targets
        .iter()
        .filter_map(|target| {
            dispositions
                .get(target)
                .map(|disposition| TargetOutcome { target: *target, disposition: disposition.clone() })
        })
        .collect())
}
