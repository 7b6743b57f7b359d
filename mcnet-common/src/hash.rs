//! # Routing Hashes
//!
//! Purpose: Turn a key into the 32-bit routing hash the distribution layer
//! uses to pick a server.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `KeyHasher` lets the client inject any algorithm.
//! 2. **Pure Functions**: Hashes depend only on the algorithm and the bytes.

/// Computes routing hashes for keys.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &[u8]) -> u32;
}

/// Built-in hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// Jenkins one-at-a-time.
    #[default]
    OneAtATime,
    Fnv1_32,
    Fnv1a32,
}

const FNV_32_INIT: u32 = 2_166_136_261;
const FNV_32_PRIME: u32 = 16_777_619;

impl KeyHasher for HashAlgorithm {
    fn hash(&self, key: &[u8]) -> u32 {
        match self {
            HashAlgorithm::OneAtATime => one_at_a_time(key),
            HashAlgorithm::Fnv1_32 => key
                .iter()
                .fold(FNV_32_INIT, |h, &b| h.wrapping_mul(FNV_32_PRIME) ^ u32::from(b)),
            HashAlgorithm::Fnv1a32 => key
                .iter()
                .fold(FNV_32_INIT, |h, &b| (h ^ u32::from(b)).wrapping_mul(FNV_32_PRIME)),
        }
    }
}

fn one_at_a_time(key: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &byte in key {
        value = value.wrapping_add(u32::from(byte));
        value = value.wrapping_add(value << 10);
        value ^= value >> 6;
    }
    value = value.wrapping_add(value << 3);
    value ^= value >> 11;
    value.wrapping_add(value << 15)
}
