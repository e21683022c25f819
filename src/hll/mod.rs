//! HyperLogLog unique-visitor estimation
//!
//! Stores keep sparse registers (`register -> rank`) rather than an opaque
//! blob, so adding a visitor is a `max` upsert on one row and the union of
//! several objects is `MAX(rank) ... GROUP BY register` on the server side.
//! This module owns the hashing that maps a visitor id to a register update
//! and the estimator that turns registers back into a cardinality.

use sha2::{Digest, Sha256};

/// Number of index bits. 2^14 registers gives ~0.81% standard error.
pub const PRECISION: u32 = 14;

/// Register count (`m`)
pub const REGISTERS: usize = 1 << PRECISION;

const MAX_RANK: u8 = (64 - PRECISION + 1) as u8;

/// Register update produced by one visitor id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub register: u16,
    pub rank: u8,
}

/// Hash a visitor id into the register it touches and the rank it proposes.
///
/// The same id always yields the same observation, which is what makes
/// repeated visits idempotent for the estimate.
pub fn observe(visitor_id: &str) -> Observation {
    let digest = Sha256::digest(visitor_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let hash = u64::from_be_bytes(head);

    let register = (hash >> (64 - PRECISION)) as u16;
    let remainder = hash << PRECISION;
    let rank = if remainder == 0 {
        MAX_RANK
    } else {
        (remainder.leading_zeros() + 1).min(MAX_RANK as u32) as u8
    };

    Observation { register, rank }
}

fn alpha(m: f64) -> f64 {
    0.7213 / (1.0 + 1.079 / m)
}

/// Estimate cardinality from the non-zero register ranks.
///
/// Registers that were never touched are implicit zeros, so callers only
/// pass what the store returned.
pub fn estimate<I>(ranks: I) -> u64
where
    I: IntoIterator<Item = u8>,
{
    let m = REGISTERS as f64;
    let mut touched = 0usize;
    let mut harmonic = 0.0f64;

    for rank in ranks.into_iter().filter(|r| *r > 0) {
        touched += 1;
        harmonic += 2f64.powi(-(rank as i32));
    }

    let touched = touched.min(REGISTERS);
    let zeros = (REGISTERS - touched) as f64;
    harmonic += zeros;

    let raw = alpha(m) * m * m / harmonic;

    // Linear counting is far more accurate while most registers are empty.
    let estimate = if raw <= 2.5 * m && zeros > 0.0 {
        m * (m / zeros).ln()
    } else {
        raw
    };

    estimate.round() as u64
}
