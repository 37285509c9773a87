//! Error types for Cohort crypto primitives.

use thiserror::Error;

/// Errors that can occur in derivation, boxing, and invite-token operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// A reader key mask was not exactly [`crate::MASK_SIZE`] bytes.
    #[error("reader key mask length: {len}, expected 32")]
    MaskLength {
        /// Length of the mask that was supplied.
        len: usize,
    },

    /// AEAD encryption failed while sealing a box.
    #[error("seal failed: {0}")]
    SealFailed(String),

    /// AEAD decryption failed; wrong key or tampered ciphertext.
    #[error("open failed: authentication error")]
    OpenFailed,

    /// An encoded structure was too short or otherwise malformed.
    #[error("malformed {what}: {reason}")]
    Malformed {
        /// Which structure failed to decode.
        what: &'static str,
        /// Why decoding failed.
        reason: String,
    },

    /// A packed invite key declared a version this code does not speak.
    #[error("unsupported invite key pack version: {0}")]
    UnsupportedPackVersion(u8),
}
