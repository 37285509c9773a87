//! Invite entries and the token-invite pipeline.
//!
//! Invites grant future membership to identities that cannot be added
//! directly: accounts without usable keys, social or email handles pending
//! resolution, and anonymous token holders. An invite entry lives in a link's
//! invite section under the role it grants; it goes inactive when a later
//! membership change completes it or an admin revokes it.

use cohort_crypto::{InviteKey, pack_invite_key};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::TeamError;
use crate::types::{ApplicationKey, InviteId, InviteType, Role, UserVersion};

/// One invite as carried in a link's invite section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteEntry {
    /// Delivery channel.
    pub invite_type: InviteType,
    /// Invitee name; the packed key for token invites.
    pub name: String,
    /// Unique invite id.
    pub id: InviteId,
}

impl InviteEntry {
    /// Entry for an existing account that cannot be added directly yet.
    pub fn keybase(version: UserVersion, rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self {
            invite_type: InviteType::Keybase,
            name: version.to_string(),
            id: InviteId::generate(rng),
        }
    }

    /// Entry for an email address pending resolution.
    pub fn email(address: &str, rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self {
            invite_type: InviteType::Email,
            name: address.to_string(),
            id: InviteId::generate(rng),
        }
    }

    /// Entry for a social-network handle pending resolution.
    pub fn social(service: &str, handle: &str, rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self {
            invite_type: InviteType::Social(service.to_string()),
            name: handle.to_string(),
            id: InviteId::generate(rng),
        }
    }
}

/// Invites grouped by the role they grant, as carried in a link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteSection {
    /// Owner-role invites. Root teams and keybase-type invites only.
    pub owners: Vec<InviteEntry>,
    /// Admin-role invites.
    pub admins: Vec<InviteEntry>,
    /// Writer-role invites.
    pub writers: Vec<InviteEntry>,
    /// Reader-role invites.
    pub readers: Vec<InviteEntry>,
}

impl InviteSection {
    /// File `entries` under the list granting `role`.
    pub fn with_role(role: Role, entries: Vec<InviteEntry>) -> Result<Self, TeamError> {
        let mut section = Self::default();
        match role {
            Role::Owner => section.owners = entries,
            Role::Admin => section.admins = entries,
            Role::Writer => section.writers = entries,
            Role::Reader => section.readers = entries,
            Role::None => return Err(TeamError::UnexpectedRole { role }),
        }
        Ok(section)
    }

    /// True when the section grants ownership.
    pub fn has_owners(&self) -> bool {
        !self.owners.is_empty()
    }

    /// True when no invite is carried at all.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
            && self.admins.is_empty()
            && self.writers.is_empty()
            && self.readers.is_empty()
    }
}

/// Split a social assertion into (service, handle).
///
/// Accepts "handle@service" and "service:handle". Keybase identities are
/// rejected here; they resolve to user versions and take the keybase invite
/// path instead.
pub fn parse_social(assertion: &str) -> Result<(String, String), TeamError> {
    let (service, handle) = if let Some((handle, service)) = assertion.rsplit_once('@') {
        (service, handle)
    } else if let Some((service, handle)) = assertion.split_once(':') {
        (service, handle)
    } else {
        return Err(TeamError::Resolve(format!("invalid social assertion {assertion:?}")));
    };

    if service.is_empty() || handle.is_empty() {
        return Err(TeamError::Resolve(format!("invalid social assertion {assertion:?}")));
    }
    if service.eq_ignore_ascii_case("keybase") {
        return Err(TeamError::Resolve(format!(
            "keybase assertion {assertion:?} should resolve to a user version"
        )));
    }

    Ok((service.to_ascii_lowercase(), handle.to_string()))
}

/// A freshly generated token invite.
///
/// `invite_key` is handed to the invitee out of band and exists nowhere else
/// in the clear; the entry carries only the packed form and the derived id.
pub struct SeitanInvite {
    /// The secret invite key for the invitee.
    pub invite_key: InviteKey,
    /// The postable invite entry.
    pub entry: InviteEntry,
}

/// Run the three-stage token-invite derivation and pack the key.
///
/// Invite key → session key → deterministic invite id; the invite key is
/// then encrypted under the team's token-invite application key so implicit
/// admins can recover it at redemption time.
pub fn generate_seitan_invite(
    app_key: &ApplicationKey,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<SeitanInvite, TeamError> {
    let invite_key = InviteKey::generate(rng);
    let session_key = invite_key.derive_session_key();
    let invite_id = InviteId(session_key.invite_id());

    let packed = pack_invite_key(&invite_key, app_key.key(), app_key.generation.0, rng)?;

    Ok(SeitanInvite {
        invite_key,
        entry: InviteEntry {
            invite_type: InviteType::SeitanToken,
            name: packed.encode(),
            id: invite_id,
        },
    })
}
