//! Cheap integer hashing for expression nodes and variables.
//!
//! Node hashes are cached and compared directly, and also key hash maps, so
//! the weakly mixed low bits of a plain fxhash over one or two integers are
//! not good enough on their own; the result is folded over its rotated self
//! before use.

use std::hash::Hasher;

use fxhash::FxHasher;

fn finish(hasher: FxHasher) -> u64 {
    let val = hasher.finish();
    val ^ val.rotate_right(32)
}

pub fn hash_u64(value: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(value);
    finish(hasher)
}

/// Combines two values into one hash; used to mix child hashes into a
/// parent node and to derive per-sample variable seeds.
pub fn hash_u64_pair(a: u64, b: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(a);
    hasher.write_u64(b);
    finish(hasher)
}

#[test]
fn order_sensitive() {
    assert_ne!(hash_u64_pair(1, 2), hash_u64_pair(2, 1));
    assert_ne!(hash_u64(0), hash_u64(1));
    assert_eq!(hash_u64_pair(3, 4), hash_u64_pair(3, 4));
}
