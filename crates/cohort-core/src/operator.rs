//! The acting identity for a single top-level operation.
//!
//! There is no process-wide signer. An `Operator` is constructed once per
//! call from the caller's device keys and threaded explicitly through every
//! section builder and signature, so tests and multi-account processes never
//! fight over hidden state.

use ed25519_dalek::{Signature, Signer, SigningKey};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::types::UserVersion;

/// Acting user identity plus device keys for one operation.
pub struct Operator {
    /// The acting user version.
    pub user: UserVersion,
    signing_key: SigningKey,
    encryption_secret: StaticSecret,
}

impl Operator {
    /// Bundle an acting identity with its device keys.
    pub fn new(user: UserVersion, signing_key: SigningKey, encryption_secret: StaticSecret) -> Self {
        Self { user, signing_key, encryption_secret }
    }

    /// Sign a serialized link body with the device signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Hex key id of the device signing key.
    pub fn signing_kid(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Verifying half of the device signing key.
    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public half of the device encryption key.
    pub fn encryption_public(&self) -> [u8; 32] {
        PublicKey::from(&self.encryption_secret).to_bytes()
    }

    /// Device encryption secret, for opening boxes addressed to this device.
    pub fn encryption_secret(&self) -> &StaticSecret {
        &self.encryption_secret
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator").field("user", &self.user).finish_non_exhaustive()
    }
}
