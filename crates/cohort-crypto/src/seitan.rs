//! Token-invite ("seitan") key derivation and packing.
//!
//! A token invite lets someone join a team by presenting a short secret
//! string, with no pre-existing identity. The derivation runs in three
//! stages:
//!
//! ```text
//! InviteKey (random, human-typable)
//!     │  HKDF-SHA256
//!     ▼
//! SessionKey (32 bytes, signs/identifies the redemption)
//!     │  HMAC-SHA256, truncated, tagged
//!     ▼
//! invite id (16 bytes, deterministic, safe to post publicly)
//! ```
//!
//! The invite key itself is AEAD-encrypted ("packed") under the team's
//! token-invite application key and posted alongside the invite entry, so
//! any implicit admin can recover it later. There is no other copy: losing
//! the invite key before redemption makes the invite unredeemable.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Number of characters in a generated invite key.
const INVITE_KEY_LEN: usize = 18;

/// HKDF label for the invite key → session key stage.
const SESSION_LABEL: &[u8] = b"cohort-seitan-session-key-v1";

/// HMAC label for the session key → invite id stage.
const INVITE_ID_LABEL: &[u8] = b"cohort-seitan-invite-id-v1";

/// Trailing tag byte marking an id as a token-invite id.
const INVITE_ID_TAG: u8 = 0x2A;

/// Current pack format version.
const PACK_VERSION: u8 = 1;

/// The secret invite key handed to the invitee out of band.
#[derive(Clone, PartialEq, Eq)]
pub struct InviteKey(String);

impl InviteKey {
    /// Generate a fresh random invite key.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let key: String = (0..INVITE_KEY_LEN)
            .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
            .collect();
        Self(key)
    }

    /// Reconstruct an invite key from its string form (e.g. after unpacking).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// The typable string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stage two: derive the session key identifying this invite.
    pub fn derive_session_key(&self) -> SessionKey {
        let hkdf = Hkdf::<Sha256>::new(None, self.0.as_bytes());
        let mut out = [0u8; 32];
        let Ok(()) = hkdf.expand(SESSION_LABEL, &mut out) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };
        SessionKey(out)
    }
}

impl Drop for InviteKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for InviteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InviteKey(..)")
    }
}

/// Stage-two key derived from an [`InviteKey`].
#[derive(Clone)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Stage three: the deterministic invite id for this session key.
    ///
    /// First 15 bytes of an HMAC over a fixed label, with a fixed trailing
    /// tag byte so token-invite ids are recognizable on sight.
    pub fn invite_id(&self) -> [u8; 16] {
        let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(&self.0) else {
            unreachable!("HMAC-SHA256 accepts any key length")
        };
        mac.update(INVITE_ID_LABEL);
        let digest = mac.finalize().into_bytes();

        let mut id = [0u8; 16];
        id[..15].copy_from_slice(&digest[..15]);
        id[15] = INVITE_ID_TAG;
        id
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// An invite key AEAD-encrypted under a team application key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedInviteKey {
    /// Pack format version.
    pub version: u8,
    /// Generation of the application key used for packing.
    pub key_generation: u32,
    /// Random 24-byte nonce.
    pub nonce: [u8; 24],
    /// XChaCha20-Poly1305 ciphertext of the invite key string.
    pub ciphertext: Vec<u8>,
}

impl PackedInviteKey {
    /// Hex form posted in the invite entry.
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(1 + 4 + 24 + self.ciphertext.len());
        bytes.push(self.version);
        bytes.extend_from_slice(&self.key_generation.to_be_bytes());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        hex::encode(bytes)
    }

    /// Parse the hex form back into a structured pack.
    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(encoded).map_err(|e| CryptoError::Malformed {
            what: "packed invite key",
            reason: e.to_string(),
        })?;
        // version + generation + nonce + at least the AEAD tag
        if bytes.len() < 1 + 4 + 24 + 16 {
            return Err(CryptoError::Malformed {
                what: "packed invite key",
                reason: format!("{} bytes is too short", bytes.len()),
            });
        }
        let version = bytes[0];
        if version != PACK_VERSION {
            return Err(CryptoError::UnsupportedPackVersion(version));
        }
        let mut generation = [0u8; 4];
        generation.copy_from_slice(&bytes[1..5]);
        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(&bytes[5..29]);
        Ok(Self {
            version,
            key_generation: u32::from_be_bytes(generation),
            nonce,
            ciphertext: bytes[29..].to_vec(),
        })
    }
}

/// Pack an invite key under the team's token-invite application key.
pub fn pack_invite_key(
    ikey: &InviteKey,
    app_key: &[u8; 32],
    key_generation: u32,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<PackedInviteKey, CryptoError> {
    let cipher = XChaCha20Poly1305::new(app_key.into());

    let mut nonce_bytes = [0u8; 24];
    rng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, ikey.as_str().as_bytes())
        .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

    Ok(PackedInviteKey {
        version: PACK_VERSION,
        key_generation,
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Recover the invite key from a pack, for redemption.
pub fn unpack_invite_key(
    packed: &PackedInviteKey,
    app_key: &[u8; 32],
) -> Result<InviteKey, CryptoError> {
    if packed.version != PACK_VERSION {
        return Err(CryptoError::UnsupportedPackVersion(packed.version));
    }
    let cipher = XChaCha20Poly1305::new(app_key.into());
    let nonce = XNonce::from(packed.nonce);
    let plaintext =
        cipher.decrypt(&nonce, packed.ciphertext.as_ref()).map_err(|_| CryptoError::OpenFailed)?;
    let s = String::from_utf8(plaintext).map_err(|e| CryptoError::Malformed {
        what: "invite key",
        reason: e.to_string(),
    })?;
    Ok(InviteKey::from_string(s))
}
