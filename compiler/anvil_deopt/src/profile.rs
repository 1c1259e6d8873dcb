//! Per-method trap bookkeeping and the recompilation hysteresis policy.

use rustc_hash::FxHashMap;

use crate::reason::{Action, Reason};


/// Traps at one (bci, reason) beyond this make the method not entrant.
pub const PER_BCI_TRAP_LIMIT: u32 = 4;

/// Total traps in one method beyond this make the method not entrant.
pub const PER_METHOD_TRAP_LIMIT: u32 = 100;

/// Trap-driven recompiles beyond this give up on compiling the method.
pub const PER_METHOD_RECOMPILE_CUTOFF: u32 = 8;

/// Trap history of one method.
///
/// The policy mirrors the classic tiered-VM shape: tolerate a few traps,
/// then recompile without the failed speculation (the parser consults
/// [`TrapProfile::too_many_traps`] and emits the slow path instead of a
/// trap), and if recompiling keeps trapping, stop compiling the method at
/// all rather than cycle forever.
#[derive(Clone, Debug, Default)]
pub struct TrapProfile {
    per_site: FxHashMap<(u32, Reason), u32>,
    total: u32,
    recompiles: u32,
}

impl TrapProfile {
    /// Record one trap and decide what to do with the compiled code.
    pub fn record_trap(&mut self, bci: u32, reason: Reason) -> Action {
        if reason == Reason::None {
            // Invalidation-driven deopt is not a failed speculation.
            return Action::None;
        }
        let site = self.per_site.entry((bci, reason)).or_insert(0);
        *site += 1;
        self.total = self.total.saturating_add(1);

        if self.recompiles >= PER_METHOD_RECOMPILE_CUTOFF {
            return Action::MakeNotCompilable;
        }
        if *site >= PER_BCI_TRAP_LIMIT || self.total >= PER_METHOD_TRAP_LIMIT {
            self.recompiles += 1;
            return Action::MakeNotEntrant;
        }
        Action::MaybeRecompile
    }

    /// Whether the parser should stop speculating at this site and emit the
    /// explicit slow path instead of a trap.
    pub fn too_many_traps(&self, bci: u32, reason: Reason) -> bool {
        self.per_site
            .get(&(bci, reason))
            .is_some_and(|&c| c >= PER_BCI_TRAP_LIMIT)
            || self.total >= PER_METHOD_TRAP_LIMIT
    }

    /// Whether *any* site of this method hit its trap limit for `reason`.
    pub fn trapped_for(&self, reason: Reason) -> bool {
        self.per_site.keys().any(|&(_, r)| r == reason)
    }

    pub fn trap_count(&self, bci: u32, reason: Reason) -> u32 {
        self.per_site.get(&(bci, reason)).copied().unwrap_or(0)
    }

    pub fn total_traps(&self) -> u32 {
        self.total
    }

    pub fn recompile_count(&self) -> u32 {
        self.recompiles
    }

    /// Fingerprint of the speculation-relevant state, for the disk cache:
    /// the set of sites that crossed the per-bci limit.
    pub fn shape_fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut sites: Vec<(u32, Reason)> = self
            .per_site
            .iter()
            .filter(|(_, &c)| c >= PER_BCI_TRAP_LIMIT)
            .map(|(&k, _)| k)
            .collect();
        sites.sort_unstable();
        let mut h = rustc_hash::FxHasher::default();
        sites.hash(&mut h);
        h.finish()
    }
}
