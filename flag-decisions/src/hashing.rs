//! Deterministic bucketing shared by rollouts and experiments.
//!
//! Every component that maps a user onto a percentage or a weight range goes
//! through this module, so a given user/flag pair lands in the same bucket no
//! matter which engine asks.

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a over the UTF-16 code units of `seed`.
pub fn hash(seed: &str) -> u32 {
    seed.encode_utf16().fold(FNV_OFFSET_BASIS, |h, unit| {
        (h ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
    })
}

/// Builds the `"{user_id}-{discriminator}"` seed. An anonymous user hashes as
/// the empty string, so all anonymous users share a bucket.
pub fn seed(user_id: Option<&str>, discriminator: &str) -> String {
    format!("{}-{}", user_id.unwrap_or(""), discriminator)
}

/// Bucket in `0..100`.
pub fn percentage_bucket(seed: &str) -> u32 {
    hash(seed) % 100
}

/// Weights are bucketed on a grid of this many steps per unit.
pub const WEIGHT_PRECISION: f64 = 1_000.0;

/// Point in `[0, total_weight)`, taken as `hash % total_weight` on a grid fine
/// enough for fractional weights. `total_weight` must be positive and finite.
pub fn weight_bucket(seed: &str, total_weight: f64) -> f64 {
    let steps = (total_weight * WEIGHT_PRECISION).round().max(1.0) as u64;
    (u64::from(hash(seed)) % steps) as f64 / WEIGHT_PRECISION
}
