//! The iterative value-numbering fixpoint.

use anvil_ir::{Graph, NodeId};
use tracing::trace;

use crate::error::OptError;
use crate::gvn::Gvn;
use crate::ideal::ideal;

/// Worklist driver: re-runs value/identity/ideal until nothing changes.
///
/// The worklist is a plain stack; a node may sit on it more than once,
/// dead entries are skipped on pop. A per-run iteration ceiling turns a
/// pathological graph into an error instead of an endless compile.
pub struct IterGvn {
    pub gvn: Gvn,
    work: Vec<NodeId>,
}

impl Default for IterGvn {
    fn default() -> Self {
        Self::new()
    }
}

impl IterGvn {
    pub fn new() -> IterGvn {
        IterGvn { gvn: Gvn::new(), work: Vec::new() }
    }

    pub fn with_gvn(gvn: Gvn) -> IterGvn {
        IterGvn { gvn, work: Vec::new() }
    }

    /// Queue a node for (re)processing.
    pub fn push(&mut self, n: NodeId) {
        self.work.push(n);
    }

    /// Seed with every live node and run to the fixpoint.
    pub fn optimize(&mut self, g: &mut Graph) -> Result<(), OptError> {
        let seed: Vec<NodeId> = g.live_ids().collect();
        self.work.extend(seed);
        self.run(g)
    }

    /// Run only what is already queued.
    pub fn run(&mut self, g: &mut Graph) -> Result<(), OptError> {
        let mut iters: usize = 0;
        while let Some(n) = self.work.pop() {
            let limit = g.len() * 64 + 4096;
            iters += 1;
            if iters > limit {
                return Err(OptError::IterationGuard { limit });
            }
            if g.is_dead(n) || n == g.start() || n == g.stop() {
                continue;
            }
            if g.outputs(n).is_empty() && !g.op(n).is_always_live() {
                g.kill_rec(n);
                continue;
            }

            if let Some(rep) = ideal(g, n, &mut self.work) {
                if rep == n {
                    // Edited in place: retype it and revisit its users.
                    let users: Vec<NodeId> = g.outputs(n).to_vec();
                    self.work.extend(users);
                    self.work.push(n);
                } else {
                    trace!(old = ?n, new = ?rep, "ideal rewrite");
                    let touched = g.subsume(n, rep);
                    self.work.extend(touched);
                    self.work.push(rep);
                }
                continue;
            }

            let old_ty = g.ty(n);
            let m = self.gvn.transform(g, n);
            if m != n {
                trace!(old = ?n, new = ?m, "value-number replace");
                let touched = g.subsume(n, m);
                self.work.extend(touched);
                self.work.push(m);
                continue;
            }
            if g.ty(n) != old_ty {
                let users: Vec<NodeId> = g.outputs(n).to_vec();
                self.work.extend(users);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "igvn/tests.rs"]
mod tests;
