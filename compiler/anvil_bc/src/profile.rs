//! Per-method execution profiles collected by the interpreter.
//!
//! The optimizing compiler consumes a snapshot of this data: branch counts
//! drive untaken-path pruning and the invocation/backedge counters drive the
//! compilation policy.

use rustc_hash::FxHashMap;

/// Taken/not-taken counters for one conditional branch bci.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BranchCounts {
    pub taken: u64,
    pub not_taken: u64,
}

impl BranchCounts {
    #[inline]
    pub fn total(&self) -> u64 {
        self.taken.saturating_add(self.not_taken)
    }
}

/// Execution profile of one method.
#[derive(Clone, Debug, Default)]
pub struct MethodProfile {
    /// Method entries observed in the interpreter tier.
    pub invocations: u64,
    /// Backward branches taken in the interpreter tier.
    pub backedges: u64,
    branches: FxHashMap<u32, BranchCounts>,
}

impl MethodProfile {
    pub fn record_branch(&mut self, bci: u32, taken: bool) {
        let c = self.branches.entry(bci).or_default();
        if taken {
            c.taken = c.taken.saturating_add(1);
        } else {
            c.not_taken = c.not_taken.saturating_add(1);
        }
    }

    pub fn branch(&self, bci: u32) -> Option<BranchCounts> {
        self.branches.get(&bci).copied()
    }

    /// Shape fingerprint: which branch sides have ever fired. Two profiles
    /// with the same shape lead the compiler to the same pruning decisions,
    /// so the disk cache keys on this rather than on raw counts.
    pub fn shape_fingerprint(&self) -> u64 {
        let mut bcis: Vec<(u32, bool, bool)> = self
            .branches
            .iter()
            .map(|(bci, c)| (*bci, c.taken > 0, c.not_taken > 0))
            .collect();
        bcis.sort_unstable();
        use std::hash::{Hash, Hasher};
        let mut h = rustc_hash::FxHasher::default();
        bcis.hash(&mut h);
        h.finish()
    }
}
