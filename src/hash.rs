//! Stable, non-cryptographic hashing for routing decisions.
//!
//! "Stable" here means deterministic within a node's process lifetime, not
//! across restarts or versions — that's all the routing function needs
//! (spec §9: "consistency is what matters").

use std::hash::{Hash, Hasher};

/// Hashes `value` with a hasher that is deterministic for the lifetime of
/// this process. `ahash`'s per-process random seed would defeat that
/// (two calls in the same run would still agree, but we'd rather not rely
/// on an implementation detail of a hasher chosen for speed, not stability),
/// so we use the standard library's `DefaultHasher`, which has no seed
/// randomization.
pub fn stable_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
