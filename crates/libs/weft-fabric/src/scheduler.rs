//! Dispatch ordering over resolved replica addresses.

use rand_core::{OsRng, RngCore};

/// Orders candidate transport addresses for a delivery attempt.
///
/// The send loop walks the returned sequence until one attempt succeeds.
/// Pluggable so load-balancing or sticky variants can replace the default.
pub trait AddressScheduler<A>: Send + Sync + 'static {
    fn order(&self, candidates: Vec<A>) -> Vec<A>;
}

/// Uniform random shuffle, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShuffleScheduler;

impl<A: Send + 'static> AddressScheduler<A> for ShuffleScheduler {
    fn order(&self, mut candidates: Vec<A>) -> Vec<A> {
        let mut rng = OsRng;
        for i in (1..candidates.len()).rev() {
            let j = (rng.next_u32() as usize) % (i + 1);
            candidates.swap(i, j);
        }
        candidates
    }
}

/// Keeps the resolved order. Deterministic, for tests and sticky setups.
#[derive(Debug, Clone, Copy, Default)]
pub struct InOrderScheduler;

impl<A: Send + 'static> AddressScheduler<A> for InOrderScheduler {
    fn order(&self, candidates: Vec<A>) -> Vec<A> {
        candidates
    }
}
