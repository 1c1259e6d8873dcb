//! The loop tree: natural loops over the control skeleton.

use anvil_ir::cfg::{preds, Cfg};
use anvil_ir::{Graph, NodeId, NodeOp};
use rustc_hash::FxHashSet;

/// One natural loop, keyed by its `LoopHead`.
pub struct LoopInfo {
    pub head: NodeId,
    /// Control node feeding the backedge slot, `NONE` when the backedge
    /// is already dead.
    pub backedge: NodeId,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// CFG nodes of the loop body, head included.
    pub members: FxHashSet<NodeId>,
    /// Nesting depth; outermost loops are depth 1.
    pub depth: u32,
}

/// All loops of a graph, nested.
pub struct LoopTree {
    pub loops: Vec<LoopInfo>,
}

impl LoopTree {
    pub fn compute(g: &Graph) -> LoopTree {
        let cfg = Cfg::compute(g);
        let mut loops = Vec::new();
        for &n in &cfg.rpo {
            if !matches!(g.op(n), NodeOp::LoopHead(_)) {
                continue;
            }
            let backedge = g.input(n, 1);
            let members = natural_loop(g, n, backedge);
            loops.push(LoopInfo {
                head: n,
                backedge,
                parent: None,
                children: Vec::new(),
                members,
                depth: 1,
            });
        }

        // Nest: a loop's parent is the smallest other loop containing its
        // head.
        let mut parent_of: Vec<Option<usize>> = vec![None; loops.len()];
        for i in 0..loops.len() {
            let mut best: Option<usize> = None;
            for j in 0..loops.len() {
                if i == j || !loops[j].members.contains(&loops[i].head) {
                    continue;
                }
                if best.is_none_or(|b| loops[j].members.len() < loops[b].members.len()) {
                    best = Some(j);
                }
            }
            parent_of[i] = best;
        }
        for i in 0..loops.len() {
            loops[i].parent = parent_of[i];
            if let Some(p) = parent_of[i] {
                loops[p].children.push(i);
            }
        }
        for i in 0..loops.len() {
            let mut d = 1;
            let mut cur = parent_of[i];
            while let Some(p) = cur {
                d += 1;
                cur = parent_of[p];
            }
            loops[i].depth = d;
        }
        LoopTree { loops }
    }

    /// Loop indices ordered innermost first.
    pub fn innermost_first(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.loops.len()).collect();
        order.sort_by(|&a, &b| self.loops[b].depth.cmp(&self.loops[a].depth));
        order
    }

    /// Nesting depth of a CFG node (0 outside all loops).
    pub fn loop_depth(&self, n: NodeId) -> u32 {
        self.loops
            .iter()
            .filter(|l| l.members.contains(&n))
            .map(|l| l.depth)
            .max()
            .unwrap_or(0)
    }
}

/// CFG nodes of the natural loop of `head` with backedge source `backedge`:
/// everything that reaches the backedge without passing through the head.
pub(crate) fn natural_loop(g: &Graph, head: NodeId, backedge: NodeId) -> FxHashSet<NodeId> {
    let mut members = FxHashSet::default();
    members.insert(head);
    if backedge.is_none() || g.is_dead(backedge) {
        return members;
    }
    let mut work = vec![backedge];
    while let Some(n) = work.pop() {
        if !members.insert(n) {
            continue;
        }
        for p in preds(g, n) {
            if !members.contains(&p) {
                work.push(p);
            }
        }
    }
    members
}

#[cfg(test)]
#[path = "tree/tests.rs"]
mod tests;
