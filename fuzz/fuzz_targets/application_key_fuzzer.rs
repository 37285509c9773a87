//! Fuzz target for application key derivation and mask handling.
//!
//! # Strategy
//!
//! - Arbitrary generation seeds and derivation labels
//! - Masks of every length (only 32 bytes may succeed)
//! - A `TeamKeyManager` with an arbitrary number of generations, queried at
//!   arbitrary generations with a partially populated mask table
//!
//! # Invariants
//!
//! - Derivation never panics
//! - Same inputs always produce the same key (determinism)
//! - Non-32-byte masks are always rejected, 32-byte masks always accepted
//! - The zero mask is the identity; any non-zero mask changes the key
//! - Distinct labels never collide
//! - A missing generation is `SecretUnavailable`, a missing mask entry is
//!   `MaskUnavailable`, and the token-invite application never needs one

#![no_main]

use arbitrary::Arbitrary;
use cohort_core::{
    Application, Generation, GenerationSecret, ReaderKeyMasks, TeamError, TeamId, TeamKeyManager,
};
use cohort_crypto::{MASK_SIZE, SECRET_SIZE, derive_secret, masked_application_secret};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct DerivationScenario {
    seed: [u8; SECRET_SIZE],
    label: String,
    mask: Vec<u8>,
    extra_seeds: Vec<[u8; SECRET_SIZE]>,
    query_generation: u32,
    mask_table_upto: u32,
}

fn check_raw_derivation(seed: &[u8; SECRET_SIZE], label: &str, mask: &[u8]) {
    let first = masked_application_secret(seed, label, mask);
    let second = masked_application_secret(seed, label, mask);
    assert_eq!(first, second, "derivation must be deterministic");

    match first {
        Ok(key) => {
            assert_eq!(mask.len(), MASK_SIZE, "only 32-byte masks may succeed");

            let plain = derive_secret(seed, label);
            if mask.iter().all(|&b| b == 0) {
                assert_eq!(key, plain, "zero mask is the identity");
            } else {
                assert_ne!(key, plain, "non-zero mask must change the key");
            }
        }
        Err(_) => {
            assert_ne!(mask.len(), MASK_SIZE, "32-byte masks must be accepted");
        }
    }

    // Distinct labels never collide under the same seed.
    let other_label = format!("{label}+");
    assert_ne!(derive_secret(seed, label), derive_secret(seed, &other_label));
}

fn check_manager(scenario: &DerivationScenario) {
    let mut seeds = vec![GenerationSecret::from_bytes(scenario.seed)];
    seeds.extend(
        scenario.extra_seeds.iter().take(4).copied().map(GenerationSecret::from_bytes),
    );
    let latest = seeds.len() as u32;
    let manager = TeamKeyManager::from_seeds(TeamId([1; 16]), seeds)
        .expect("non-empty seed list always builds");

    let mask_table_upto = scenario.mask_table_upto % (latest + 2);
    let mut masks = ReaderKeyMasks::default();
    for g in 1..=mask_table_upto {
        masks.insert(Application::Chat, Generation(g), vec![0x5A; MASK_SIZE]);
    }

    let generation = Generation(scenario.query_generation % (latest + 2));
    let result = manager.application_key_at_generation(Application::Chat, generation, &masks);
    match result {
        Ok(key) => {
            assert!(generation.0 >= 1 && generation.0 <= latest);
            assert!(generation.0 <= mask_table_upto);
            assert_eq!(key.generation, generation);
        }
        Err(TeamError::SecretUnavailable { generation: g }) => {
            assert_eq!(g, generation);
            assert!(generation.0 < 1 || generation.0 > latest);
        }
        Err(TeamError::MaskUnavailable { generation: g, .. }) => {
            assert_eq!(g, generation);
            assert!(generation.0 > mask_table_upto);
        }
        Err(other) => panic!("unexpected error: {other}"),
    }

    // Token-invite keys never consult the mask table.
    let seitan = manager.application_key_at_generation(
        Application::SeitanInviteToken,
        Generation(1),
        &ReaderKeyMasks::default(),
    );
    assert!(seitan.is_ok(), "seitan derivation needs no mask entry");
}

fuzz_target!(|scenario: DerivationScenario| {
    check_raw_derivation(&scenario.seed, &scenario.label, &scenario.mask);
    check_manager(&scenario);
});
