//! Program-derived address derivation.
//!
//! Follows the ledger's standard rule: hash the seeds, a bump byte, the
//! program id and a fixed marker, and walk the bump down from 255 until the
//! hash is not a valid ed25519 point.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    domain::{Address, Identity},
    error::CounterError,
};

pub const COUNTER_SEED: &[u8] = b"counter";
pub const MAX_SEED_LEN: usize = 32;
pub const MAX_SEEDS: usize = 16;
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
    pub address: Address,
    pub bump: u8,
}

pub fn create_program_address(
    seeds: &[&[u8]],
    program_id: &Address,
) -> Result<Address, CounterError> {
    check_seeds(seeds, MAX_SEEDS)?;
    let candidate = hash_seeds(seeds, program_id);
    if candidate.is_on_curve() {
        return Err(CounterError::Derivation(
            "derived address lies on the ed25519 curve".to_string(),
        ));
    }
    Ok(candidate)
}

pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Address,
) -> Result<DerivedAddress, CounterError> {
    check_seeds(seeds, MAX_SEEDS - 1)?;

    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = seeds.to_vec();
        with_bump.push(&bump_seed);

        let address = hash_seeds(&with_bump, program_id);
        if !address.is_on_curve() {
            return Ok(DerivedAddress { address, bump });
        }
    }

    Err(CounterError::Derivation(
        "no viable bump seed found".to_string(),
    ))
}

fn check_seeds(seeds: &[&[u8]], max_seeds: usize) -> Result<(), CounterError> {
    if seeds.len() > max_seeds {
        return Err(CounterError::Derivation(format!(
            "at most {max_seeds} seeds are allowed, got {}",
            seeds.len()
        )));
    }
    if let Some(seed) = seeds.iter().find(|seed| seed.len() > MAX_SEED_LEN) {
        return Err(CounterError::Derivation(format!(
            "seed of {} bytes exceeds the {MAX_SEED_LEN} byte limit",
            seed.len()
        )));
    }
    Ok(())
}

fn hash_seeds(seeds: &[&[u8]], program_id: &Address) -> Address {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);
    Address::new_from_array(hasher.finalize().into())
}

/// The per-user counter account: seeds `["counter", identity]`.
pub fn counter_address(
    identity: &Identity,
    program_id: &Address,
) -> Result<DerivedAddress, CounterError> {
    find_program_address(&[COUNTER_SEED, identity.as_bytes()], program_id)
}
