//! Optimistic (conditional) constant propagation.
//!
//! Every recomputable type is reset to `Top`, then transfer functions run
//! to a fixpoint with widening on ranges that keep growing. Because branch
//! successor types start dead, constants feed through merges that the
//! pessimistic pass can never see past. The sharpened graph is handed back
//! to [`IterGvn`] to fold the newly constant branches and values.

use anvil_ir::{Graph, NodeId, NodeOp, TyId};
use tracing::debug;

use crate::error::OptError;
use crate::igvn::IterGvn;
use crate::value::value;

pub struct Ccp;

impl Ccp {
    pub fn analyze_and_apply(g: &mut Graph, igvn: &mut IterGvn) -> Result<(), OptError> {
        let live: Vec<NodeId> = g.live_ids().collect();
        for &n in &live {
            if !Self::keeps_type(g.op(n)) {
                g.set_ty(n, TyId::TOP);
            }
        }

        let mut work: Vec<NodeId> = live.clone();
        let mut iters: usize = 0;
        while let Some(n) = work.pop() {
            let limit = g.len() * 64 + 4096;
            iters += 1;
            if iters > limit {
                return Err(OptError::IterationGuard { limit });
            }
            if g.is_dead(n) || Self::keeps_type(g.op(n)) {
                continue;
            }
            let old = g.ty(n);
            let fresh = value(g, n);
            if fresh == old {
                continue;
            }
            // Widening keeps ascending loop-phi ranges from stepping one
            // value at a time.
            let t = g.tys.widen(fresh, old);
            if t != old {
                g.set_ty(n, t);
                work.extend(g.outputs(n).iter().copied());
            }
        }
        debug!(nodes = g.live_count(), "ccp fixpoint reached");

        let all: Vec<NodeId> = g.live_ids().collect();
        for n in all {
            igvn.push(n);
        }
        igvn.run(g)
    }

    /// Nodes whose types are external facts, not recomputable from inputs.
    fn keeps_type(op: &NodeOp) -> bool {
        matches!(
            op,
            NodeOp::Start
                | NodeOp::Param(_)
                | NodeOp::InitMem(_)
                | NodeOp::ConI(_)
                | NodeOp::ConL(_)
                | NodeOp::ConD(_)
                | NodeOp::ConNull
                | NodeOp::CallStatic { .. }
                | NodeOp::LoadGlobal(_)
        )
    }
}
