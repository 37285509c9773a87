//! Domain-separated derivation of team keys using HKDF.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;

/// Size in bytes of a generation seed and everything derived from it.
pub const SECRET_SIZE: usize = 32;

/// Size in bytes of a reader key mask.
pub const MASK_SIZE: usize = 32;

/// Label for deriving the per-generation team signing keypair seed.
const SIGNING_LABEL: &str = "Cohort-Derived-Team-EdDSA-1";

/// Label for deriving the per-generation team encryption keypair seed.
const ENCRYPTION_LABEL: &str = "Cohort-Derived-Team-DH-1";

/// Derive a 32-byte secret from a generation seed under a domain label.
///
/// Deterministic: the same (seed, label) pair always yields the same output,
/// and distinct labels yield unrelated outputs.
pub fn derive_secret(seed: &[u8; SECRET_SIZE], label: &str) -> [u8; SECRET_SIZE] {
    let hkdf = Hkdf::<Sha256>::new(None, seed);
    let mut out = [0u8; SECRET_SIZE];
    let Ok(()) = hkdf.expand(label.as_bytes(), &mut out) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    out
}

/// Seed for the per-generation Ed25519 team signing keypair.
pub fn derive_signing_seed(seed: &[u8; SECRET_SIZE]) -> [u8; SECRET_SIZE] {
    derive_secret(seed, SIGNING_LABEL)
}

/// Seed for the per-generation X25519 team encryption keypair.
pub fn derive_encryption_seed(seed: &[u8; SECRET_SIZE]) -> [u8; SECRET_SIZE] {
    derive_secret(seed, ENCRYPTION_LABEL)
}

/// Derive an application secret and combine it with a reader key mask.
///
/// The usable application key is `HKDF(seed, label) XOR mask`. The mask must
/// be exactly [`MASK_SIZE`] bytes; anything else is rejected before any
/// derivation happens.
pub fn masked_application_secret(
    seed: &[u8; SECRET_SIZE],
    label: &str,
    mask: &[u8],
) -> Result<[u8; SECRET_SIZE], CryptoError> {
    if mask.len() != MASK_SIZE {
        return Err(CryptoError::MaskLength { len: mask.len() });
    }

    let mut key = derive_secret(seed, label);
    for (byte, m) in key.iter_mut().zip(mask) {
        *byte ^= m;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::{ProptestConfig, any, proptest};

    use super::{
        MASK_SIZE, SECRET_SIZE, derive_encryption_seed, derive_secret, derive_signing_seed,
        masked_application_secret,
    };
    use crate::error::CryptoError;

    const SEED: [u8; SECRET_SIZE] = [0x42; SECRET_SIZE];

    #[test]
    fn derive_is_deterministic() {
        let a = derive_secret(&SEED, "label-one");
        let b = derive_secret(&SEED, "label-one");
        assert_eq!(a, b, "same inputs must produce same output");
    }

    #[test]
    fn different_labels_produce_different_secrets() {
        let a = derive_secret(&SEED, "label-one");
        let b = derive_secret(&SEED, "label-two");
        assert_ne!(a, b);
    }

    #[test]
    fn different_seeds_produce_different_secrets() {
        let other = [0x43; SECRET_SIZE];
        assert_ne!(derive_secret(&SEED, "label"), derive_secret(&other, "label"));
    }

    #[test]
    fn signing_and_encryption_seeds_are_distinct() {
        assert_ne!(derive_signing_seed(&SEED), derive_encryption_seed(&SEED));
    }

    #[test]
    fn zero_mask_is_identity() {
        let masked = masked_application_secret(&SEED, "app", &[0u8; MASK_SIZE]).unwrap();
        assert_eq!(masked, derive_secret(&SEED, "app"));
    }

    #[test]
    fn mask_xor_is_involutive() {
        let mask = [0xA5u8; MASK_SIZE];
        let once = masked_application_secret(&SEED, "app", &mask).unwrap();
        let mut twice = once;
        for (byte, m) in twice.iter_mut().zip(mask.iter()) {
            *byte ^= m;
        }
        assert_eq!(twice, derive_secret(&SEED, "app"));
    }

    #[test]
    fn short_mask_is_rejected() {
        let err = masked_application_secret(&SEED, "app", &[0u8; 16]).unwrap_err();
        assert_eq!(err, CryptoError::MaskLength { len: 16 });
    }

    #[test]
    fn long_mask_is_rejected() {
        let err = masked_application_secret(&SEED, "app", &[0u8; 64]).unwrap_err();
        assert_eq!(err, CryptoError::MaskLength { len: 64 });
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn masked_key_differs_from_unmasked_unless_mask_zero(
            seed in any::<[u8; SECRET_SIZE]>(),
            mask in any::<[u8; MASK_SIZE]>(),
        ) {
            let masked = masked_application_secret(&seed, "app", &mask).unwrap();
            let plain = derive_secret(&seed, "app");
            if mask == [0u8; MASK_SIZE] {
                assert_eq!(masked, plain);
            } else {
                assert_ne!(masked, plain);
            }
        }
    }
}
