//! Hashing helpers.
//!
//! - [`fx_hash`] hashes structured values with `FxHasher` (fast, not DoS resistant).
//! - [`blob_hash`] hashes raw byte blobs (shader byte code, serialized data) with xxh3.
//! - [`LazyHash`] caches a computed hash in an atomic so that shared objects
//!   can compute it on first use without a lock.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHasher;
use xxhash_rust::xxh3::xxh3_64;

#[inline]
#[must_use]
pub fn fx_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

#[inline]
#[must_use]
pub fn blob_hash(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

/// A compute-once hash slot.
///
/// `0` marks the slot as empty; a computed hash of `0` is stored as `1`.
/// Two threads racing on the first call both compute the same value, so the
/// last store wins without changing the result.
#[derive(Debug, Default)]
pub struct LazyHash(AtomicU64);

impl LazyHash {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn get_or_compute(&self, compute: impl FnOnce() -> u64) -> u64 {
        let cached = self.0.load(Ordering::Acquire);
        if cached != 0 {
            return cached;
        }
        let hash = compute().max(1);
        self.0.store(hash, Ordering::Release);
        hash
    }

    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }
}

impl Clone for LazyHash {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.0.load(Ordering::Acquire)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn lazy_hash_computes_once() {
        let hash = LazyHash::new();
        assert!(!hash.is_computed());
        assert_eq!(hash.get_or_compute(|| 42), 42);
        assert_eq!(hash.get_or_compute(|| 7), 42);
        assert!(hash.is_computed());
    }

    #[test]
    fn zero_hash_is_remapped() {
        let hash = LazyHash::new();
        assert_eq!(hash.get_or_compute(|| 0), 1);
    }

    #[test]
    fn concurrent_first_use_agrees() {
        let hash = Arc::new(LazyHash::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hash = Arc::clone(&hash);
                std::thread::spawn(move || hash.get_or_compute(|| fx_hash("signature")))
            })
            .collect();
        let results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn blob_hash_depends_on_content() {
        assert_eq!(blob_hash(b"abc"), blob_hash(b"abc"));
        assert_ne!(blob_hash(b"abc"), blob_hash(b"abd"));
    }
}
