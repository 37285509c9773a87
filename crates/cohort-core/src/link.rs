//! Building and signing sigchain links.
//!
//! A link is an inner CBOR body (team section, seqno, prev pointer, optional
//! freshness anchor) under an outer device signature. Link types form a
//! closed set; adding one means updating [`LinkType::uses_per_team_keys`] and
//! the section checks together.
//!
//! When a link carries a key section it is signed twice: the outer signature
//! by the poster's device key, and a reverse signature over the body by the
//! new team signing key itself, proving the new key approved its own
//! introduction.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::chain::ChainState;
use crate::error::TeamError;
use crate::invite::InviteSection;
use crate::keys::{BoxBatch, PerTeamKeySection, TeamKeyManager};
use crate::operator::Operator;
use crate::types::{
    AdminLogPoint, Entropy, FreshnessAnchor, InviteId, LeaseId, Role, SeqType, Seqno, TeamId,
    TeamName, TeamSettings, UserVersion,
};

/// The closed set of link types this engine can post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    /// Add, remove, or re-role members.
    ChangeMembership,
    /// Rotate the generation secret with no membership change.
    RotateKey,
    /// The poster leaves the team.
    Leave,
    /// Post one or more invites.
    Invite,
    /// Delete a root team.
    DeleteRoot,
    /// Delete a subteam (posted in the parent chain).
    DeleteSubteam,
    /// Sever the child's up-pointer (posted in the subteam chain).
    DeleteUpPointer,
    /// Change open/closed settings.
    Settings,
    /// Bind external filesystem metadata.
    KbfsSettings,
}

impl LinkType {
    /// Wire tag of the link type.
    pub fn wire_tag(self) -> &'static str {
        match self {
            Self::ChangeMembership => "team.change_membership",
            Self::RotateKey => "team.rotate_key",
            Self::Leave => "team.leave",
            Self::Invite => "team.invite",
            Self::DeleteRoot => "team.delete_root",
            Self::DeleteSubteam => "team.delete_subteam",
            Self::DeleteUpPointer => "team.delete_up_pointer",
            Self::Settings => "team.settings",
            Self::KbfsSettings => "team.kbfs",
        }
    }

    /// Whether links of this type are vouched for by the per-team keys.
    ///
    /// Types that dissolve membership or precede key access sign with the
    /// device key alone.
    pub fn uses_per_team_keys(self) -> bool {
        match self {
            Self::Leave
            | Self::Invite
            | Self::DeleteRoot
            | Self::DeleteSubteam
            | Self::DeleteUpPointer
            | Self::KbfsSettings => false,
            Self::ChangeMembership | Self::RotateKey | Self::Settings => true,
        }
    }
}

/// The admin assertion embedded in a link, pointing at the chain location
/// where the poster was granted admin-or-above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSection {
    /// Team whose chain granted the permission.
    pub team_id: TeamId,
    /// Granting link's sequence number.
    pub seqno: Seqno,
    /// Granting link's chain family.
    pub seq_type: SeqType,
}

impl From<AdminLogPoint> for AdminSection {
    fn from(point: AdminLogPoint) -> Self {
        Self { team_id: point.team_id, seqno: point.seqno, seq_type: point.seq_type }
    }
}

/// Membership lists carried by a change-membership or rotate link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersSection {
    /// New owners.
    pub owners: Vec<UserVersion>,
    /// New admins.
    pub admins: Vec<UserVersion>,
    /// New writers.
    pub writers: Vec<UserVersion>,
    /// New readers.
    pub readers: Vec<UserVersion>,
    /// Removed identities.
    pub none: Vec<UserVersion>,
}

/// Subteam pointer in a parent-chain link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubteamSection {
    /// The subteam's id.
    pub id: TeamId,
    /// The subteam's name at deletion time.
    pub name: TeamName,
}

/// Parent pointer in a subteam-chain link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSection {
    /// The parent's id.
    pub id: TeamId,
    /// Seqno of the corresponding link in the parent chain.
    pub seqno: Seqno,
    /// The parent chain's family.
    pub seq_type: SeqType,
}

/// External filesystem binding for implicit teams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbfsSection {
    /// The bound filesystem folder id.
    pub tlf_id: String,
}

/// The team section: everything a link asserts about the team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSection {
    /// Team the link belongs to.
    pub id: TeamId,
    /// Admin assertion, present when the poster acts on admin authority.
    pub admin: Option<AdminSection>,
    /// Membership changes.
    pub members: Option<MembersSection>,
    /// Key rotation record.
    pub per_team_key: Option<PerTeamKeySection>,
    /// Invites posted by this link.
    pub invites: Option<InviteSection>,
    /// Settings changes.
    pub settings: Option<TeamSettings>,
    /// Subteam pointer (delete-subteam links).
    pub subteam: Option<SubteamSection>,
    /// Parent pointer (delete-up-pointer links).
    pub parent: Option<ParentSection>,
    /// External filesystem binding (kbfs links).
    pub kbfs: Option<KbfsSection>,
    /// The team's own name, where the link type requires it.
    pub name: Option<TeamName>,
    /// Invites completed by this link.
    pub completed_invites: Vec<InviteId>,
    /// Whether the team is implicit.
    pub implicit: bool,
    /// Whether the team is public.
    pub public: bool,
    /// Per-link entropy preventing replay of structurally identical links.
    pub entropy: Option<Entropy>,
}

impl TeamSection {
    /// A section asserting nothing beyond the team's identity.
    pub fn bare(id: TeamId, implicit: bool, public: bool) -> Self {
        Self {
            id,
            admin: None,
            members: None,
            per_team_key: None,
            invites: None,
            settings: None,
            subteam: None,
            parent: None,
            kbfs: None,
            name: None,
            completed_invites: Vec::new(),
            implicit,
            public,
            entropy: None,
        }
    }
}

/// The signed inner body of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkBody {
    /// Wire tag of the link type.
    pub link_type: String,
    /// This link's sequence number: current chain length + 1.
    pub seqno: Seqno,
    /// Id of the previous link.
    pub prev: crate::types::LinkId,
    /// Chain family.
    pub seq_type: SeqType,
    /// Freshness anchor, present when the link asserts admin permission.
    pub merkle_root: Option<FreshnessAnchor>,
    /// The team section.
    pub team: TeamSection,
}

/// Per-team public keys advertised alongside a link that signs with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamPublicKeys {
    /// Hex key id of the team signing key.
    pub signing: String,
    /// Hex key id of the team encryption key.
    pub encryption: String,
}

/// An immutable signed link, ready to post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLink {
    /// Outer device signature over the inner body bytes.
    pub signature: Signature,
    /// Hex key id of the signing device key.
    pub signing_kid: String,
    /// Declared link type.
    pub link_type: LinkType,
    /// Chain family.
    pub seq_type: SeqType,
    /// Declared sequence number.
    pub seqno: Seqno,
    /// Canonical CBOR of the inner body.
    pub inner: Vec<u8>,
    /// Team the link belongs to.
    pub team_id: TeamId,
    /// Per-team public keys, present iff the type uses them.
    pub public_keys: Option<TeamPublicKeys>,
}

impl SignedLink {
    /// Decode the inner body back into structured form.
    pub fn decode_inner(&self) -> Result<LinkBody, TeamError> {
        ciborium::from_reader(self.inner.as_slice()).map_err(|e| TeamError::Encode(e.to_string()))
    }

    /// Verify the outer signature against a device verifying key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), TeamError> {
        key.verify(&self.inner, &self.signature)
            .map_err(|e| TeamError::Service(format!("signature verification failed: {e}")))
    }
}

fn encode_body(body: &LinkBody) -> Result<Vec<u8>, TeamError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(body, &mut bytes).map_err(|e| TeamError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Assemble and sign one link against the current chain state.
///
/// `keys` must be supplied for link types that sign with per-team keys.
/// `anchor` is mandatory whenever the section asserts an admin permission;
/// building without one is a caller bug, not a server condition.
pub fn sig_team_item(
    operator: &Operator,
    chain: &dyn ChainState,
    keys: Option<&TeamKeyManager>,
    section: TeamSection,
    link_type: LinkType,
    anchor: Option<FreshnessAnchor>,
) -> Result<SignedLink, TeamError> {
    if section.admin.is_some() && anchor.is_none() {
        return Err(TeamError::MissingFreshnessAnchor);
    }

    let seqno = chain.latest_seqno() + 1;
    let seq_type = SeqType::for_publicness(chain.is_public());

    let mut body = LinkBody {
        link_type: link_type.wire_tag().to_string(),
        seqno,
        prev: chain.latest_link_id(),
        seq_type,
        merkle_root: anchor,
        team: section,
    };

    let mut public_keys = None;
    if link_type.uses_per_team_keys() {
        let keys = keys.ok_or(TeamError::MissingTeamKeys)?;
        let team_signing = keys.signing_key()?;
        let team_encryption = keys.encryption_key()?;

        if body.team.per_team_key.is_some() {
            // Reverse signature: sign the body with the reverse_sig slot
            // empty, then embed the result.
            if let Some(ptk) = body.team.per_team_key.as_mut() {
                ptk.reverse_sig = None;
            }
            let unsigned = encode_body(&body)?;
            let reverse = team_signing.sign(&unsigned);
            if let Some(ptk) = body.team.per_team_key.as_mut() {
                ptk.reverse_sig = Some(hex::encode(reverse.to_bytes()));
            }
        }

        public_keys = Some(TeamPublicKeys {
            signing: hex::encode(team_signing.verifying_key().to_bytes()),
            encryption: hex::encode(
                x25519_dalek::PublicKey::from(&team_encryption).to_bytes(),
            ),
        });
    }

    let inner = encode_body(&body)?;
    let signature = operator.sign(&inner);

    Ok(SignedLink {
        signature,
        signing_kid: operator.signing_kid(),
        link_type,
        seq_type,
        seqno,
        inner,
        team_id: body.team.id,
        public_keys,
    })
}

/// Local validation run on every section before it is signed and posted.
///
/// The full chain replay lives in the external reducer; this gate only
/// enforces invariants the engine itself owns.
pub fn precheck_section(chain: &dyn ChainState, section: &TeamSection) -> Result<(), TeamError> {
    if chain.parent_id().is_some() {
        let members_has_owners =
            section.members.as_ref().is_some_and(|m| !m.owners.is_empty());
        let invites_has_owners = section.invites.as_ref().is_some_and(InviteSection::has_owners);
        if members_has_owners || invites_has_owners {
            return Err(TeamError::SubteamOwnersNotAllowed);
        }
    }
    Ok(())
}

/// Everything that travels with one post besides the links themselves.
#[derive(Debug, Default, Clone)]
pub struct PayloadArgs {
    /// Seed boxes for this team.
    pub secret_boxes: Option<BoxBatch>,
    /// Seed boxes for descendant teams, addressed to new implicit admins.
    pub implicit_admin_boxes: BTreeMap<TeamId, BoxBatch>,
    /// Downgrade lease guarding this post.
    pub lease_id: Option<LeaseId>,
    /// Permanent-removal marker (bans the removed identity from rejoining).
    pub permanent: Option<bool>,
}

/// The complete postable artifact: links plus key material and lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigPayload {
    /// Permanent-removal marker.
    pub permanent: Option<bool>,
    /// One link per non-compound operation; two for a subteam delete,
    /// applied atomically.
    pub sigs: Vec<SignedLink>,
    /// Seed boxes for this team.
    pub per_team_key_boxes: Option<BoxBatch>,
    /// Seed boxes for descendant teams keyed by team id.
    pub implicit_admin_boxes: BTreeMap<TeamId, BoxBatch>,
    /// Lease id when the post is guarded by a downgrade lease.
    pub downgrade_lease_id: Option<LeaseId>,
}

/// Assemble the postable payload for a batch of links.
pub fn sig_payload(sigs: Vec<SignedLink>, args: PayloadArgs) -> SigPayload {
    SigPayload {
        permanent: args.permanent,
        sigs,
        per_team_key_boxes: args.secret_boxes,
        implicit_admin_boxes: args.implicit_admin_boxes,
        downgrade_lease_id: args.lease_id,
    }
}

/// Validate the settings a settings link may carry.
///
/// Open teams grant joiners reader or writer, nothing above.
pub fn validate_settings(settings: &TeamSettings) -> Result<(), TeamError> {
    if settings.open && !matches!(settings.join_as, Role::Reader | Role::Writer) {
        return Err(TeamError::UnexpectedRole { role: settings.join_as });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signature, Verifier};
    use rand::{SeedableRng, rngs::StdRng};
    use x25519_dalek::StaticSecret;

    use super::{
        LinkType, MembersSection, TeamSection, precheck_section, sig_team_item, validate_settings,
    };
    use crate::chain::ChainState;
    use crate::error::TeamError;
    use crate::keys::{GenerationSecret, TeamKeyManager};
    use crate::operator::Operator;
    use crate::types::{
        AdminLogPoint, FreshnessAnchor, Generation, Invite, LinkId, Role, SeqType, Seqno, TeamId,
        TeamName, TeamSettings, UserId, UserVersion,
    };

    struct StubChain {
        parent: Option<TeamId>,
        seqno: Seqno,
    }

    impl ChainState for StubChain {
        fn team_id(&self) -> TeamId {
            TeamId([7; 16])
        }
        fn name(&self) -> TeamName {
            TeamName("stub".into())
        }
        fn is_public(&self) -> bool {
            false
        }
        fn is_implicit(&self) -> bool {
            false
        }
        fn is_open(&self) -> bool {
            false
        }
        fn parent_id(&self) -> Option<TeamId> {
            self.parent
        }
        fn latest_generation(&self) -> Generation {
            Generation(1)
        }
        fn latest_seqno(&self) -> Seqno {
            self.seqno
        }
        fn latest_link_id(&self) -> LinkId {
            LinkId([3; 32])
        }
        fn user_role(&self, _user: &UserVersion) -> Role {
            Role::None
        }
        fn members(&self) -> Vec<(UserVersion, Role)> {
            Vec::new()
        }
        fn user_version_by_uid(&self, _uid: UserId) -> Option<UserVersion> {
            None
        }
        fn admin_log_point(&self, _user: &UserVersion) -> Option<AdminLogPoint> {
            None
        }
        fn subteams(&self) -> Vec<TeamId> {
            Vec::new()
        }
        fn active_invites(&self) -> Vec<Invite> {
            Vec::new()
        }
    }

    fn operator() -> Operator {
        let mut rng = StdRng::seed_from_u64(1);
        Operator::new(
            UserVersion { uid: UserId([1; 16]), eldest_seqno: 1 },
            ed25519_dalek::SigningKey::generate(&mut rng),
            StaticSecret::random_from_rng(&mut rng),
        )
    }

    fn key_manager() -> TeamKeyManager {
        let mut rng = StdRng::seed_from_u64(2);
        TeamKeyManager::new(TeamId([7; 16]), GenerationSecret::generate(&mut rng))
    }

    fn anchor() -> FreshnessAnchor {
        FreshnessAnchor { seqno: 900, root_hash: [0xAB; 32] }
    }

    #[test]
    fn per_team_key_table_matches_the_closed_set() {
        assert!(LinkType::ChangeMembership.uses_per_team_keys());
        assert!(LinkType::RotateKey.uses_per_team_keys());
        assert!(LinkType::Settings.uses_per_team_keys());

        assert!(!LinkType::Leave.uses_per_team_keys());
        assert!(!LinkType::Invite.uses_per_team_keys());
        assert!(!LinkType::DeleteRoot.uses_per_team_keys());
        assert!(!LinkType::DeleteSubteam.uses_per_team_keys());
        assert!(!LinkType::DeleteUpPointer.uses_per_team_keys());
        assert!(!LinkType::KbfsSettings.uses_per_team_keys());
    }

    #[test]
    fn seqno_is_chain_length_plus_one() {
        let chain = StubChain { parent: None, seqno: 41 };
        let section = TeamSection::bare(chain.team_id(), false, false);

        let link = sig_team_item(
            &operator(),
            &chain,
            Some(&key_manager()),
            section,
            LinkType::RotateKey,
            None,
        )
        .unwrap();

        assert_eq!(link.seqno, 42);
        let body = link.decode_inner().unwrap();
        assert_eq!(body.seqno, 42);
        assert_eq!(body.prev, LinkId([3; 32]));
        assert_eq!(body.seq_type, SeqType::Private);
    }

    #[test]
    fn admin_section_without_anchor_is_a_build_error() {
        let chain = StubChain { parent: None, seqno: 1 };
        let mut section = TeamSection::bare(chain.team_id(), false, false);
        section.admin = Some(super::AdminSection {
            team_id: chain.team_id(),
            seqno: 1,
            seq_type: SeqType::Private,
        });

        let err = sig_team_item(
            &operator(),
            &chain,
            Some(&key_manager()),
            section,
            LinkType::ChangeMembership,
            None,
        )
        .unwrap_err();

        assert_eq!(err, TeamError::MissingFreshnessAnchor);
    }

    #[test]
    fn per_team_key_types_require_the_key_manager() {
        let chain = StubChain { parent: None, seqno: 1 };
        let section = TeamSection::bare(chain.team_id(), false, false);

        let err =
            sig_team_item(&operator(), &chain, None, section, LinkType::RotateKey, None)
                .unwrap_err();
        assert_eq!(err, TeamError::MissingTeamKeys);
    }

    #[test]
    fn outer_signature_verifies_under_the_device_key() {
        let chain = StubChain { parent: None, seqno: 5 };
        let op = operator();
        let section = TeamSection::bare(chain.team_id(), false, false);

        let link =
            sig_team_item(&op, &chain, None, section, LinkType::Leave, None).unwrap();

        assert!(link.verify(&op.verifying_key()).is_ok());
        assert!(link.public_keys.is_none());
    }

    #[test]
    fn rotation_link_carries_a_valid_reverse_signature() {
        let chain = StubChain { parent: None, seqno: 5 };
        let op = operator();
        let mut keys = key_manager();
        let mut rng = StdRng::seed_from_u64(9);

        let (_, ptk) = keys
            .rotate_shared_secret_boxes(&op, &std::collections::BTreeMap::new(), &mut rng)
            .unwrap();

        let mut section = TeamSection::bare(chain.team_id(), false, false);
        section.admin = Some(super::AdminSection {
            team_id: chain.team_id(),
            seqno: 1,
            seq_type: SeqType::Private,
        });
        section.per_team_key = Some(ptk);

        let link = sig_team_item(
            &op,
            &chain,
            Some(&keys),
            section,
            LinkType::ChangeMembership,
            Some(anchor()),
        )
        .unwrap();

        // Recompute what the reverse signature covered: the body with the
        // reverse_sig slot emptied.
        let mut body = link.decode_inner().unwrap();
        let embedded = body
            .team
            .per_team_key
            .as_mut()
            .and_then(|ptk| ptk.reverse_sig.take())
            .expect("rotation link must embed a reverse signature");

        let mut unsigned = Vec::new();
        ciborium::into_writer(&body, &mut unsigned).unwrap();

        let sig_bytes: [u8; 64] =
            hex::decode(embedded).unwrap().try_into().expect("64-byte signature");
        let reverse = Signature::from_bytes(&sig_bytes);

        let team_verifying = keys.signing_key().unwrap().verifying_key();
        assert!(team_verifying.verify(&unsigned, &reverse).is_ok());

        // And the advertised public keys match the rotated generation.
        let advertised = link.public_keys.unwrap();
        assert_eq!(advertised.signing, hex::encode(team_verifying.to_bytes()));
    }

    #[test]
    fn precheck_rejects_subteam_owners() {
        let chain = StubChain { parent: Some(TeamId([1; 16])), seqno: 1 };
        let mut section = TeamSection::bare(chain.team_id(), false, false);
        section.members = Some(MembersSection {
            owners: vec![UserVersion { uid: UserId([2; 16]), eldest_seqno: 1 }],
            ..MembersSection::default()
        });

        assert_eq!(
            precheck_section(&chain, &section).unwrap_err(),
            TeamError::SubteamOwnersNotAllowed
        );

        // Same section on a root team is fine.
        let root = StubChain { parent: None, seqno: 1 };
        assert!(precheck_section(&root, &section).is_ok());
    }

    #[test]
    fn open_settings_only_allow_reader_or_writer_joiners() {
        assert!(validate_settings(&TeamSettings { open: true, join_as: Role::Reader }).is_ok());
        assert!(validate_settings(&TeamSettings { open: true, join_as: Role::Writer }).is_ok());
        assert_eq!(
            validate_settings(&TeamSettings { open: true, join_as: Role::Admin }).unwrap_err(),
            TeamError::UnexpectedRole { role: Role::Admin },
        );
        // Closed teams never consult join_as.
        assert!(validate_settings(&TeamSettings { open: false, join_as: Role::None }).is_ok());
    }
}
