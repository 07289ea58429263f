//! Deterministic seed derivation and hashing.
//!
//! Every random stream in a run is derived from the single simulation seed so
//! that two runs with the same program and seed replay bit-identically.

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derive an independent 64-bit seed from the run seed, a domain tag and a counter.
pub fn derive_seed(seed: u64, domain: u64, counter: u64) -> u64 {
    splitmix64(splitmix64(seed ^ domain).wrapping_add(counter))
}

pub const SEED_DOMAIN_QUEUE: u64 = 0x5155_4555_4544_4953; // "QUEUEDIS" (tag)
pub const SEED_DOMAIN_FLOW_HASH: u64 = 0x464C_4F57_4841_5348; // "FLOWHASH" (tag)

/// 64-bit FNV-1a over a byte slice, seeded with a perturbation value.
pub fn fnv1a64(bytes: &[u8], perturbation: u64) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ perturbation;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
