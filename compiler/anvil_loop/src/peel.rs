//! Loop peeling: run the first iteration ahead of the loop.
//!
//! The body is cloned with the head seeded to the loop entry and each head
//! phi seeded to its init value, so the copy executes once on the way in.
//! The loop itself then restarts from the copy's backedge with the copy's
//! per-iteration values as the new inits. Values escaping through the loop
//! exit grow a two-way phi choosing between the peeled copy and the loop.

use anvil_ir::{Graph, NodeId, NodeOp};
use anvil_opt::IterGvn;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::body::{clone_set, exit_phi_op, merge_exits, LoopBody};
use crate::counted::typed;

pub(crate) fn peel(g: &mut Graph, igvn: &mut IterGvn, head: NodeId, body: &LoopBody) -> bool {
    let back_ctrl = g.input(head, 1);
    if back_ctrl.is_none() || g.is_dead(back_ctrl) {
        return false;
    }
    let exits = merge_exits(g, body);
    if exits.len() > 1 {
        return false;
    }

    // Values (and controls) escaping the loop, gathered before cloning so
    // the copy's own uses do not show up.
    let outside = |g: &Graph, n: NodeId, body: &LoopBody| -> Vec<NodeId> {
        g.outputs(n)
            .iter()
            .copied()
            .filter(|&u| !g.is_dead(u) && !body.contains(u))
            .collect()
    };
    let mut escaped: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
    for &n in &body.set {
        if body.members.contains(&n) || matches!(g.op(n), NodeOp::IfTrue | NodeOp::IfFalse) {
            continue;
        }
        let uses = outside(g, n, body);
        if !uses.is_empty() {
            escaped.push((n, uses));
        }
    }
    escaped.sort_unstable_by_key(|(n, _)| *n);
    if exits.is_empty() && !escaped.is_empty() {
        return false;
    }
    let exit_uses: Vec<(NodeId, Vec<NodeId>)> = exits
        .iter()
        .map(|&e| {
            let uses = g
                .outputs(e)
                .iter()
                .copied()
                .filter(|&u| !g.is_dead(u) && !body.contains(u))
                .collect();
            (e, uses)
        })
        .collect();

    let mut seed = FxHashMap::default();
    seed.insert(head, g.input(head, 0));
    for &p in &body.phis {
        seed.insert(p, g.input(p, 1));
    }
    let map = clone_set(g, &body.set, &seed);

    // The copy's backedge control becomes the loop entry; the copy's
    // per-iteration values become the new inits.
    g.set_input(head, 0, map[&back_ctrl]);
    for &p in &body.phis {
        let bv = g.input(p, 2);
        g.set_input(p, 1, map.get(&bv).copied().unwrap_or(bv));
    }

    if let Some(&(e, ref uses)) = exit_uses.first() {
        let r = typed(g, NodeOp::Region, &[map[&e], e]);
        for &u in uses {
            for i in 0..g.inputs(u).len() {
                if g.input(u, i) == e {
                    g.set_input(u, i, r);
                }
            }
            igvn.push(u);
        }
        for (n, uses) in &escaped {
            let op = exit_phi_op(g, *n);
            let ph = g.add(op, &[r, map[n], *n]);
            let ty = g.ty(*n);
            g.set_ty(ph, ty);
            for &u in uses {
                for i in 0..g.inputs(u).len() {
                    if g.input(u, i) == *n {
                        g.set_input(u, i, ph);
                    }
                }
                igvn.push(u);
            }
            igvn.push(ph);
        }
        igvn.push(r);
    }

    for &c in map.values() {
        igvn.push(c);
    }
    igvn.push(head);
    for &p in &body.phis {
        igvn.push(p);
    }
    debug!(head = ?head, body = body.size(), "peeled one iteration");
    true
}

#[cfg(test)]
#[path = "peel/tests.rs"]
mod tests;
