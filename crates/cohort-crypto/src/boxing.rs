//! Sealed boxes for distributing generation seeds to recipients.
//!
//! One box per recipient device: an ephemeral X25519 keypair is generated,
//! Diffie-Hellman is performed against the recipient's device encryption key,
//! the shared secret is stretched through HKDF-SHA256, and the seed is
//! encrypted with XChaCha20-Poly1305. The ephemeral public key travels with
//! the ciphertext so only the recipient can recompute the transcript.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::CryptoError;

/// HKDF info string binding the derived AEAD key to this construction.
const BOX_LABEL: &[u8] = b"cohort-seed-box-xchacha20poly1305-v1";

/// Size of the XChaCha20 nonce.
const NONCE_SIZE: usize = 24;

/// A generation seed encrypted for exactly one recipient device key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    /// XChaCha20-Poly1305 ciphertext, auth tag included.
    pub ciphertext: Vec<u8>,
    /// Random 24-byte nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Sender's ephemeral X25519 public key.
    pub ephemeral_pk: [u8; 32],
}

/// Derive the AEAD key from a DH shared secret.
fn derive_box_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(BOX_LABEL, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    key
}

/// Seal `plaintext` for the holder of `recipient_pk`.
///
/// A fresh ephemeral keypair is drawn from `rng` per call, so sealing the
/// same plaintext twice yields unrelated boxes.
pub fn seal_box(
    plaintext: &[u8],
    recipient_pk: &[u8; 32],
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<SealedBox, CryptoError> {
    let recipient = PublicKey::from(*recipient_pk);

    let ephemeral_secret = EphemeralSecret::random_from_rng(&mut *rng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);

    let shared = ephemeral_secret.diffie_hellman(&recipient);
    let key = derive_box_key(shared.as_bytes());
    let cipher = XChaCha20Poly1305::new(&key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

    Ok(SealedBox { ciphertext, nonce: nonce_bytes, ephemeral_pk: ephemeral_public.to_bytes() })
}

/// Open a [`SealedBox`] with the recipient's device encryption secret.
pub fn open_box(sealed: &SealedBox, recipient_secret: &StaticSecret) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = PublicKey::from(sealed.ephemeral_pk);

    let shared = recipient_secret.diffie_hellman(&ephemeral);
    let key = derive_box_key(shared.as_bytes());
    let cipher = XChaCha20Poly1305::new(&key.into());

    let nonce = XNonce::from(sealed.nonce);
    cipher.decrypt(&nonce, sealed.ciphertext.as_ref()).map_err(|_| CryptoError::OpenFailed)
}
