//! Control-flow view of a graph: reverse postorder and dominators.
//!
//! The CFG is implicit in the sea of nodes; this module materializes just
//! enough of it for scheduling and loop analysis. Dominators use the
//! Cooper-Harvey-Kennedy iterative algorithm over reverse postorder.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::graph::{Graph, NodeId};
use crate::node::NodeOp;

/// A call's control continues through its `Proj(0)`; resolve a control
/// edge back to the CFG node behind it.
fn through_ctrl_proj(g: &Graph, c: NodeId) -> NodeId {
    if matches!(g.op(c), NodeOp::Proj(0)) {
        let of = g.input(c, 0);
        if matches!(g.op(of), NodeOp::CallStatic { .. }) {
            return of;
        }
    }
    c
}

/// Control predecessors of a CFG node.
pub fn preds(g: &Graph, n: NodeId) -> SmallVec<[NodeId; 2]> {
    match g.op(n) {
        NodeOp::Start => SmallVec::new(),
        NodeOp::Region | NodeOp::LoopHead(_) | NodeOp::Stop => g
            .inputs(n)
            .iter()
            .copied()
            .filter(|p| p.is_some())
            .map(|p| through_ctrl_proj(g, p))
            .collect(),
        _ => {
            let mut out = SmallVec::new();
            if let Some(&c) = g.inputs(n).first() {
                if c.is_some() {
                    out.push(through_ctrl_proj(g, c));
                }
            }
            out
        }
    }
}

/// Control successors of a CFG node.
pub fn succs(g: &Graph, n: NodeId) -> SmallVec<[NodeId; 2]> {
    // Successors of a call hang off its control projection.
    let src = if matches!(g.op(n), NodeOp::CallStatic { .. }) {
        match g.proj(n, 0) {
            Some(p) => p,
            None => return SmallVec::new(),
        }
    } else {
        n
    };
    let mut out = SmallVec::new();
    for &o in g.outputs(src) {
        if g.is_dead(o) || !g.op(o).is_cfg() {
            continue;
        }
        let is_succ = match g.op(o) {
            NodeOp::Region | NodeOp::LoopHead(_) | NodeOp::Stop => {
                g.inputs(o).contains(&src)
            }
            _ => g.inputs(o).first() == Some(&src),
        };
        if is_succ && !out.contains(&o) {
            out.push(o);
        }
    }
    out
}

/// Dominator tree and block ordering for one graph.
pub struct Cfg {
    /// CFG nodes reachable from `Start`, in reverse postorder.
    pub rpo: Vec<NodeId>,
    rpo_index: FxHashMap<NodeId, u32>,
    idom: FxHashMap<NodeId, NodeId>,
    dom_depth: FxHashMap<NodeId, u32>,
}

impl Cfg {
    pub fn compute(g: &Graph) -> Cfg {
        let rpo = Self::reverse_postorder(g);
        let mut rpo_index = FxHashMap::default();
        for (i, &n) in rpo.iter().enumerate() {
            rpo_index.insert(n, u32::try_from(i).unwrap_or(u32::MAX));
        }

        let mut cfg = Cfg {
            rpo,
            rpo_index,
            idom: FxHashMap::default(),
            dom_depth: FxHashMap::default(),
        };
        cfg.compute_idoms(g);
        cfg.compute_depths(g);
        cfg
    }

    fn reverse_postorder(g: &Graph) -> Vec<NodeId> {
        let mut post = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack: Vec<(NodeId, usize)> = vec![(g.start(), 0)];
        seen.insert(g.start());
        while let Some(&mut (n, next)) = stack.last_mut() {
            let ss = succs(g, n);
            if next < ss.len() {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let s = ss[next];
                if seen.insert(s) {
                    stack.push((s, 0));
                }
            } else {
                post.push(n);
                stack.pop();
            }
        }
        post.reverse();
        post
    }

    fn compute_idoms(&mut self, g: &Graph) {
        let start = g.start();
        self.idom.insert(start, start);
        let mut changed = true;
        while changed {
            changed = false;
            for &b in &self.rpo {
                if b == start {
                    continue;
                }
                let mut new_idom = NodeId::NONE;
                for p in preds(g, b) {
                    if !self.idom.contains_key(&p) {
                        continue; // not yet processed, or unreachable
                    }
                    new_idom = if new_idom.is_none() {
                        p
                    } else {
                        self.intersect(p, new_idom)
                    };
                }
                if new_idom.is_some() && self.idom.get(&b) != Some(&new_idom) {
                    self.idom.insert(b, new_idom);
                    changed = true;
                }
            }
        }
    }

    fn intersect(&self, mut a: NodeId, mut b: NodeId) -> NodeId {
        while a != b {
            let (ia, ib) = (self.rpo_index[&a], self.rpo_index[&b]);
            if ia > ib {
                a = self.idom[&a];
            } else {
                b = self.idom[&b];
            }
        }
        a
    }

    fn compute_depths(&mut self, g: &Graph) {
        // rpo guarantees a node's idom is ordered before it, so one pass
        // suffices.
        for &n in &self.rpo {
            let d = if n == g.start() {
                0
            } else {
                self.dom_depth.get(&self.idom[&n]).copied().unwrap_or(0) + 1
            };
            self.dom_depth.insert(n, d);
        }
    }

    /// Immediate dominator; `Start` is its own idom.
    pub fn idom(&self, n: NodeId) -> Option<NodeId> {
        self.idom.get(&n).copied()
    }

    pub fn dom_depth(&self, n: NodeId) -> u32 {
        self.dom_depth.get(&n).copied().unwrap_or(0)
    }

    pub fn rpo_index(&self, n: NodeId) -> Option<u32> {
        self.rpo_index.get(&n).copied()
    }

    pub fn is_reachable(&self, n: NodeId) -> bool {
        self.rpo_index.contains_key(&n)
    }

    /// Does `a` dominate `b`?
    pub fn dominates(&self, a: NodeId, mut b: NodeId) -> bool {
        let da = self.dom_depth(a);
        while self.dom_depth(b) > da {
            b = match self.idom(b) {
                Some(i) => i,
                None => return false,
            };
        }
        a == b
    }
}

#[cfg(test)]
#[path = "cfg/tests.rs"]
mod tests;
