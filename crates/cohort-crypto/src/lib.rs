//! Cohort Cryptographic Primitives
//!
//! Cryptographic building blocks for the Cohort team engine. Pure functions
//! with deterministic outputs; callers provide randomness where an operation
//! needs it, so tests can be fully deterministic.
//!
//! # Key Lifecycle
//!
//! Every team carries one 32-byte seed per *generation*. A generation is
//! sealed once created: seeds are never mutated, only superseded when a
//! privilege-reducing membership change forces a rotation. All usable keys
//! hang off the seed via domain-separated derivation:
//!
//! ```text
//! Generation Seed (32 bytes, per team, per generation)
//!        │
//!        ├─ HKDF → team signing keypair   (Ed25519, signs the key section)
//!        ├─ HKDF → team encryption keypair (X25519)
//!        └─ HKDF → application secret ⊕ reader mask → application key
//! ```
//!
//! When membership changes, the seed itself travels to each recipient inside
//! a [`SealedBox`]: an ephemeral X25519 exchange against the recipient's
//! device encryption key, the shared secret stretched through HKDF-SHA256,
//! and the seed encrypted with XChaCha20-Poly1305.
//!
//! # Security
//!
//! - Different generations, applications, and reader masks all produce
//!   unrelated keys; compromise of one application key reveals nothing about
//!   siblings.
//! - A rotation supersedes the seed for all *future* material while leaving
//!   previously derived keys decryptable by holders of the old seed.
//! - Sealed boxes use a fresh ephemeral keypair per recipient, so no two
//!   boxes share a DH transcript.
//! - Token invites ([`seitan`]) never place the invite key on the wire in
//!   the clear; losing the key before redemption makes the invite
//!   unredeemable by design.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod boxing;
pub mod derivation;
pub mod error;
pub mod seitan;

pub use boxing::{SealedBox, open_box, seal_box};
pub use derivation::{
    MASK_SIZE, SECRET_SIZE, derive_encryption_seed, derive_secret, derive_signing_seed,
    masked_application_secret,
};
pub use error::CryptoError;
pub use seitan::{InviteKey, PackedInviteKey, SessionKey, pack_invite_key, unpack_invite_key};
