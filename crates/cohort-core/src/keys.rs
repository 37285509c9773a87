//! Per-team key material: generation seeds and everything derived from them.
//!
//! A team owns one 32-byte seed per generation. [`TeamKeyManager`] holds the
//! seeds a snapshot has decrypted so far and derives the per-generation team
//! signing/encryption keypairs and per-application keys on demand. Rotation
//! appends a fresh seed; earlier generations stay loaded so old ciphertexts
//! remain decryptable.

use std::collections::{BTreeMap, HashMap};

use cohort_crypto::{
    CryptoError, SECRET_SIZE, SealedBox, derive_encryption_seed, derive_signing_seed,
    masked_application_secret, seal_box,
};
use ed25519_dalek::SigningKey;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::TeamError;
use crate::operator::Operator;
use crate::types::{Application, ApplicationKey, Generation, TeamId, UserId, UserVersion};

/// One generation's 32-byte shared seed.
///
/// Owned exclusively by the manager holding it; the raw bytes leave the
/// process only inside a sealed box.
pub struct GenerationSecret([u8; SECRET_SIZE]);

impl GenerationSecret {
    /// Draw a fresh random seed.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut seed = [0u8; SECRET_SIZE];
        rng.fill_bytes(&mut seed);
        Self(seed)
    }

    /// Wrap seed bytes received from an opened box.
    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// The raw seed bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }
}

impl Drop for GenerationSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for GenerationSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GenerationSecret(..)")
    }
}

/// Reader key masks known to a snapshot, keyed by (application, generation).
///
/// Masks arrive from the server alongside the chain state; the engine only
/// consumes them. Token-invite keys never consult this table.
#[derive(Debug, Clone, Default)]
pub struct ReaderKeyMasks {
    masks: HashMap<(Application, Generation), Vec<u8>>,
}

impl ReaderKeyMasks {
    /// Record a mask for an application/generation pair.
    pub fn insert(&mut self, application: Application, generation: Generation, mask: Vec<u8>) {
        self.masks.insert((application, generation), mask);
    }

    /// The mask for an application/generation pair, if known.
    pub fn get(&self, application: Application, generation: Generation) -> Option<&[u8]> {
        self.masks.get(&(application, generation)).map(Vec::as_slice)
    }
}

/// The key section embedded in a rotation-bearing link.
///
/// Advertises the new generation and its public keys; `reverse_sig` is filled
/// in by the link builder once the new signing key has co-signed its own
/// introduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerTeamKeySection {
    /// The generation this section introduces.
    pub generation: Generation,
    /// Hex key id of the new team signing key.
    pub signing_kid: String,
    /// Hex key id of the new team encryption key.
    pub encryption_kid: String,
    /// Hex signature by the new signing key over the link body, proving the
    /// key approved its own introduction. Set during link building.
    pub reverse_sig: Option<String>,
}

/// One batch of sealed seed boxes, produced per mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxBatch {
    /// Generation of the seed inside every box.
    pub generation: Generation,
    /// Hex key id of the poster's device encryption key.
    pub sender_kid: String,
    /// One box per recipient, keyed by uid.
    pub boxes: BTreeMap<UserId, SealedBox>,
}

/// Holds a team's generation seeds and derives keys from them.
///
/// Not safe for concurrent mutation; lives inside one team snapshot.
pub struct TeamKeyManager {
    team_id: TeamId,
    seeds: BTreeMap<Generation, GenerationSecret>,
}

impl TeamKeyManager {
    /// Start a manager at generation 1 with the given seed.
    pub fn new(team_id: TeamId, first_seed: GenerationSecret) -> Self {
        let mut seeds = BTreeMap::new();
        seeds.insert(Generation::FIRST, first_seed);
        Self { team_id, seeds }
    }

    /// Build a manager from seeds for generations 1..=N, oldest first.
    ///
    /// Fails with `SecretUnavailable` at generation 1 when `seeds` is empty:
    /// every team has at least one generation.
    pub fn from_seeds(team_id: TeamId, seeds: Vec<GenerationSecret>) -> Result<Self, TeamError> {
        if seeds.is_empty() {
            return Err(TeamError::SecretUnavailable { generation: Generation::FIRST });
        }
        let seeds = seeds
            .into_iter()
            .enumerate()
            .map(|(i, seed)| (Generation(i as u32 + 1), seed))
            .collect();
        Ok(Self { team_id, seeds })
    }

    /// The team these keys belong to.
    pub fn team_id(&self) -> TeamId {
        self.team_id
    }

    /// The newest generation held.
    pub fn latest_generation(&self) -> Generation {
        Generation(self.seeds.len() as u32)
    }

    /// The seed for a generation.
    pub fn shared_secret(&self, generation: Generation) -> Result<&GenerationSecret, TeamError> {
        self.seeds.get(&generation).ok_or(TeamError::SecretUnavailable { generation })
    }

    /// The seed for the newest generation.
    pub fn latest_shared_secret(&self) -> Result<&GenerationSecret, TeamError> {
        self.shared_secret(self.latest_generation())
    }

    /// The team signing keypair for a generation.
    pub fn signing_key_at(&self, generation: Generation) -> Result<SigningKey, TeamError> {
        let seed = self.shared_secret(generation)?;
        Ok(SigningKey::from_bytes(&derive_signing_seed(seed.as_bytes())))
    }

    /// The team signing keypair for the newest generation.
    pub fn signing_key(&self) -> Result<SigningKey, TeamError> {
        self.signing_key_at(self.latest_generation())
    }

    /// The team encryption keypair for a generation.
    pub fn encryption_key_at(&self, generation: Generation) -> Result<StaticSecret, TeamError> {
        let seed = self.shared_secret(generation)?;
        Ok(StaticSecret::from(derive_encryption_seed(seed.as_bytes())))
    }

    /// The team encryption keypair for the newest generation.
    pub fn encryption_key(&self) -> Result<StaticSecret, TeamError> {
        self.encryption_key_at(self.latest_generation())
    }

    /// Derive the usable key for an application at a generation.
    ///
    /// The reader key mask comes from `masks`, except for
    /// [`Application::SeitanInviteToken`] which always uses the all-zero
    /// mask: token invites must be recoverable by any implicit admin, so
    /// masking would add nothing.
    pub fn application_key_at_generation(
        &self,
        application: Application,
        generation: Generation,
        masks: &ReaderKeyMasks,
    ) -> Result<ApplicationKey, TeamError> {
        let seed = self.shared_secret(generation)?;

        const ZERO_MASK: [u8; SECRET_SIZE] = [0u8; SECRET_SIZE];
        let mask: &[u8] = if application.uses_reader_key_mask() {
            masks
                .get(application, generation)
                .ok_or(TeamError::MaskUnavailable { application, generation })?
        } else {
            &ZERO_MASK
        };

        let key = masked_application_secret(seed.as_bytes(), application.derivation_label(), mask)
            .map_err(|e| match e {
                CryptoError::MaskLength { len } => TeamError::MalformedMask { len },
                other => TeamError::Crypto(other),
            })?;

        Ok(ApplicationKey::new(application, generation, key))
    }

    /// Derive the key for an application at the newest generation.
    pub fn application_key(
        &self,
        application: Application,
        masks: &ReaderKeyMasks,
    ) -> Result<ApplicationKey, TeamError> {
        self.application_key_at_generation(application, self.latest_generation(), masks)
    }

    /// Keys for generations 1..=latest, oldest first.
    ///
    /// Fails closed: the first generation that cannot be derived aborts the
    /// whole sequence.
    pub fn all_application_keys(
        &self,
        application: Application,
        masks: &ReaderKeyMasks,
    ) -> Result<Vec<ApplicationKey>, TeamError> {
        (1..=self.latest_generation().0)
            .map(|g| self.application_key_at_generation(application, Generation(g), masks))
            .collect()
    }

    /// Box the newest seed for each recipient device key.
    pub fn shared_secret_boxes(
        &self,
        operator: &Operator,
        recipients: &BTreeMap<UserVersion, [u8; 32]>,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<BoxBatch, TeamError> {
        let generation = self.latest_generation();
        let seed = self.shared_secret(generation)?;

        let mut boxes = BTreeMap::new();
        for (version, device_key) in recipients {
            let sealed = seal_box(seed.as_bytes(), device_key, rng)?;
            boxes.insert(version.uid, sealed);
        }

        debug!(
            team = %self.team_id,
            %generation,
            recipients = boxes.len(),
            "sealed shared secret boxes"
        );

        Ok(BoxBatch {
            generation,
            sender_kid: hex::encode(operator.encryption_public()),
            boxes,
        })
    }

    /// Rotate to a fresh seed and box it for each recipient.
    ///
    /// Appends the new generation, leaving every earlier seed loaded, and
    /// returns the batch together with the key section announcing the new
    /// generation's public keys.
    pub fn rotate_shared_secret_boxes(
        &mut self,
        operator: &Operator,
        recipients: &BTreeMap<UserVersion, [u8; 32]>,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<(BoxBatch, PerTeamKeySection), TeamError> {
        let generation = self.latest_generation().next();
        self.seeds.insert(generation, GenerationSecret::generate(rng));

        debug!(team = %self.team_id, %generation, "rotated team key");

        let boxes = self.shared_secret_boxes(operator, recipients, rng)?;
        let section = self.per_team_key_section()?;
        Ok((boxes, section))
    }

    /// The key section for the newest generation, reverse signature unset.
    pub fn per_team_key_section(&self) -> Result<PerTeamKeySection, TeamError> {
        let generation = self.latest_generation();
        let signing = self.signing_key_at(generation)?;
        let encryption = self.encryption_key_at(generation)?;
        Ok(PerTeamKeySection {
            generation,
            signing_kid: hex::encode(signing.verifying_key().to_bytes()),
            encryption_kid: hex::encode(PublicKey::from(&encryption).to_bytes()),
            reverse_sig: None,
        })
    }
}

impl std::fmt::Debug for TeamKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamKeyManager")
            .field("team_id", &self.team_id)
            .field("latest_generation", &self.latest_generation())
            .finish_non_exhaustive()
    }
}
