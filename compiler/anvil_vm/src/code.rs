//! The code cache: installed artifacts, their entrant state, method body
//! versions and the dependency registry.
//!
//! Everything lives behind one lock. Compiler workers install from their
//! own threads; the executing thread polls entrant state at safepoints
//! and flips it on deoptimization, so the states a method moves through
//! are: interpreted, queued (`in_flight`), entrant, not entrant, and
//! finally not compilable once it has burned its recompile budget.

use std::sync::Arc;

use anvil_bc::MethodId;
use anvil_codegen::Artifact;
use anvil_deopt::{Dependency, DependencyRegistry};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

struct CodeEntry {
    artifact: Arc<Artifact>,
    entrant: bool,
    /// Installation epoch, for observability.
    #[allow(dead_code)]
    epoch: u64,
}

#[derive(Default)]
struct Inner {
    entries: FxHashMap<MethodId, CodeEntry>,
    in_flight: FxHashSet<MethodId>,
    not_compilable: FxHashSet<MethodId>,
    versions: FxHashMap<MethodId, u32>,
    deps: DependencyRegistry,
    epoch: u64,
}

/// Shared store of compiled code.
#[derive(Default)]
pub struct CodeCache {
    inner: Mutex<Inner>,
}

impl CodeCache {
    pub fn new() -> CodeCache {
        CodeCache::default()
    }

    /// The artifact to run for `mid`, if an entrant one is installed.
    pub fn entrant(&self, mid: MethodId) -> Option<Arc<Artifact>> {
        let inner = self.inner.lock();
        let e = inner.entries.get(&mid)?;
        e.entrant.then(|| Arc::clone(&e.artifact))
    }

    /// Safepoint poll: is the installed code for `mid` still entrant?
    pub fn is_entrant(&self, mid: MethodId) -> bool {
        self.inner
            .lock()
            .entries
            .get(&mid)
            .is_some_and(|e| e.entrant)
    }

    /// Claim the right to compile `mid`. Returns false when the method
    /// already has entrant code, is being compiled, or has been marked
    /// not compilable.
    pub fn begin_compile(&self, mid: MethodId) -> bool {
        let mut inner = self.inner.lock();
        if inner.not_compilable.contains(&mid)
            || inner.in_flight.contains(&mid)
            || inner.entries.get(&mid).is_some_and(|e| e.entrant)
        {
            return false;
        }
        inner.in_flight.insert(mid);
        true
    }

    /// Give up a claim taken by [`CodeCache::begin_compile`].
    pub fn abandon(&self, mid: MethodId) {
        self.inner.lock().in_flight.remove(&mid);
    }

    /// Install a freshly compiled artifact. Fails when the method body
    /// (or any body the artifact depends on) was redefined while the
    /// compile was running; the stale artifact is dropped.
    pub fn install(&self, mid: MethodId, artifact: Artifact, version: u32) -> bool {
        let mut inner = self.inner.lock();
        inner.in_flight.remove(&mid);

        let current = inner.versions.get(&mid).copied().unwrap_or(0);
        if current != version {
            debug!(mid = mid.raw(), "dropping stale artifact: method was redefined");
            return false;
        }
        for dep in &artifact.deps {
            let Dependency::MethodBody { mid: subject, version: assumed } = dep;
            if inner.versions.get(subject).copied().unwrap_or(0) != *assumed {
                debug!(
                    mid = mid.raw(),
                    subject = subject.raw(),
                    "dropping stale artifact: dependency was redefined"
                );
                return false;
            }
        }

        inner.deps.unregister(mid);
        let deps = artifact.deps.clone();
        inner.deps.register(mid, &deps);
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.entries.insert(
            mid,
            CodeEntry {
                artifact: Arc::new(artifact),
                entrant: true,
                epoch,
            },
        );
        true
    }

    /// Future executions fall back to the interpreter; in-progress ones
    /// notice at their next safepoint.
    pub fn make_not_entrant(&self, mid: MethodId) {
        let mut inner = self.inner.lock();
        if let Some(e) = inner.entries.get_mut(&mid) {
            e.entrant = false;
        }
        inner.deps.unregister(mid);
    }

    /// The method has burned its recompile budget; it stays interpreted.
    pub fn make_not_compilable(&self, mid: MethodId) {
        let mut inner = self.inner.lock();
        if let Some(e) = inner.entries.get_mut(&mid) {
            e.entrant = false;
        }
        inner.deps.unregister(mid);
        inner.not_compilable.insert(mid);
    }

    #[allow(dead_code)]
    pub fn is_compilable(&self, mid: MethodId) -> bool {
        !self.inner.lock().not_compilable.contains(&mid)
    }

    pub fn version(&self, mid: MethodId) -> u32 {
        self.inner.lock().versions.get(&mid).copied().unwrap_or(0)
    }

    pub fn versions_snapshot(&self, n_methods: usize) -> Vec<u32> {
        let inner = self.inner.lock();
        (0..n_methods)
            .map(|i| {
                let mid = MethodId(u16::try_from(i).unwrap_or(u16::MAX));
                inner.versions.get(&mid).copied().unwrap_or(0)
            })
            .collect()
    }

    /// Installation epoch of the entrant artifact, for stats output.
    #[allow(dead_code)]
    pub fn epoch_of(&self, mid: MethodId) -> Option<u64> {
        self.inner.lock().entries.get(&mid).map(|e| e.epoch)
    }

    /// A method body was replaced: bump its version and invalidate its
    /// own code plus every artifact that assumed the old body. The method
    /// becomes compilable again.
    pub fn redefine(&self, mid: MethodId) {
        let mut inner = self.inner.lock();
        *inner.versions.entry(mid).or_insert(0) += 1;
        inner.not_compilable.remove(&mid);

        let mut invalid: Vec<MethodId> = inner.deps.dependents_of(mid).to_vec();
        invalid.push(mid);
        for holder in invalid {
            if let Some(e) = inner.entries.get_mut(&holder) {
                e.entrant = false;
            }
            inner.deps.unregister(holder);
            debug!(mid = holder.raw(), "invalidated by redefinition");
        }
    }
}
