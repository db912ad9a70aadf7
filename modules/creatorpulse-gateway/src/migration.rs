//! Deterministic traffic splitting for staged rollouts. A caller's
//! identifier always hashes to the same bucket, so its traffic never
//! flip-flops between stacks as the percentage ramps.

use sha2::{Digest, Sha256};

/// Bucket an identifier into [0, 100).
fn bucket(identifier: &str) -> u8 {
    let digest = Sha256::digest(identifier.as_bytes());
    // First two bytes give plenty of spread for a 100-way split
    let n = u16::from_be_bytes([digest[0], digest[1]]);
    (n % 100) as u8
}

/// Whether this identifier's traffic routes to the new stack at the given
/// rollout percentage. The comparison is strictly `bucket < percentage`:
/// bucket 99 only routes at a full 100% rollout.
pub fn routes_to_new_stack(identifier: &str, percentage: u8) -> bool {
    bucket(identifier) < percentage.min(100)
}
