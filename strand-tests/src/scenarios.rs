//! Reusable test scenarios.

use bytes::Bytes;
use strand_core::TopicPartition;

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];

    /// Number of derived seeds for the wider sweeps.
    pub const SWEEP_SEED_COUNT: u64 = 50;
}

/// Deterministic hash for randomized choices.
#[must_use]
pub const fn det_hash(seed: u64, counter: u64) -> u64 {
    seed.wrapping_add(counter).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

/// Key of the record at `offset`, one of `keys` distinct keys.
///
/// # Panics
///
/// Panics if `keys` is zero.
#[must_use]
pub fn key_for(tp: &TopicPartition, offset: u64, keys: u64) -> Bytes {
    // TigerStyle: Assert preconditions.
    assert!(keys > 0, "keys must be positive");
    let k = det_hash(tp.partition().get(), offset) % keys;
    Bytes::from(format!("key-{k}"))
}

/// Topic partitions `t-0` through `t-{count - 1}`.
#[must_use]
pub fn partitions(count: u64) -> Vec<TopicPartition> {
    (0..count).map(|p| TopicPartition::new("t", p)).collect()
}
