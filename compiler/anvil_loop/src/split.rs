//! Pre/main/post splitting and main-loop unrolling.
//!
//! A counted loop is cloned twice: a pre loop that runs the first few
//! iterations (zero until range-check elimination raises its limit) and a
//! post loop that mops up the tail. The original becomes the main loop,
//! its limit hidden behind `Opaque1` so constant folding cannot collapse
//! the lowered bound back into the original.
//!
//! All three loops keep the top-test shape, so a loop whose work is
//! already done simply fails its entry test and runs zero iterations; no
//! zero-trip guards are needed.

use anvil_ir::{Graph, LoopFlavor, NodeFlags, NodeId, NodeOp};
use anvil_opt::IterGvn;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::body::{clone_set, merge_exits, LoopBody};
use crate::counted::{typed, Counted};

/// Handles into the three loops after a split.
pub(crate) struct Split {
    pub pre_head: NodeId,
    /// The pre loop's exit compare; range-check elimination raises its
    /// limit input.
    pub pre_cmp: NodeId,
    #[allow(dead_code)]
    pub post_head: NodeId,
    /// `Opaque1` wrapping the main loop's limit.
    #[allow(dead_code)]
    pub main_opq: NodeId,
}

/// Split the counted loop at `c` into pre, main and post. The caller has
/// already checked the policy: positive stride, plain flavor, and the
/// counted exit as the only merge exit.
pub(crate) fn insert_pre_post(
    g: &mut Graph,
    igvn: &mut IterGvn,
    c: &Counted,
    body: &LoopBody,
) -> Split {
    debug_assert_eq!(merge_exits(g, body), vec![c.exit_proj]);

    // Downstream users, gathered before any clone exists. After the split
    // they must read the post loop's copies: it runs last.
    let exit_uses: Vec<NodeId> = g
        .outputs(c.exit_proj)
        .iter()
        .copied()
        .filter(|&u| !g.is_dead(u) && !body.contains(u))
        .collect();
    let mut escaped: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
    for &n in &body.set {
        if body.members.contains(&n) || matches!(g.op(n), NodeOp::IfTrue | NodeOp::IfFalse) {
            continue;
        }
        let uses: Vec<NodeId> = g
            .outputs(n)
            .iter()
            .copied()
            .filter(|&u| !g.is_dead(u) && !body.contains(u))
            .collect();
        if !uses.is_empty() {
            escaped.push((n, uses));
        }
    }
    escaped.sort_unstable_by_key(|(n, _)| *n);

    // Post first, then pre, both from the pristine loop; the main loop's
    // compare is rewired only after the last clone.
    let none = FxHashMap::default();
    let map_post = clone_set(g, &body.set, &none);
    let map_pre = clone_set(g, &body.set, &none);

    let post_head = map_post[&c.head];
    let pre_head = map_pre[&c.head];
    g.set_op(post_head, NodeOp::LoopHead(LoopFlavor::Post));
    g.set_op(pre_head, NodeOp::LoopHead(LoopFlavor::Pre));
    g.set_flag(post_head, NodeFlags::COUNTED);
    g.set_flag(pre_head, NodeFlags::COUNTED);

    // Pre runs zero iterations until a later pass raises its limit.
    let pre_cmp = map_pre[&c.cmp];
    g.set_input(pre_cmp, c.limit_slot, c.init);

    // Main: enter from the pre exit, start from the pre loop's final
    // values, and test against the opaque limit.
    g.set_input(c.head, 0, map_pre[&c.exit_proj]);
    for &p in &body.phis {
        let init = map_pre[&p];
        g.set_input(p, 1, init);
    }
    g.set_op(c.head, NodeOp::LoopHead(LoopFlavor::Main));
    g.set_flag(c.head, NodeFlags::COUNTED);
    let main_opq = typed(g, NodeOp::Opaque1, &[NodeId::NONE, c.limit]);
    g.set_input(c.cmp, c.limit_slot, main_opq);

    // Post: enter from the main exit with the main loop's final values.
    g.set_input(post_head, 0, c.exit_proj);
    for &p in &body.phis {
        let pp = map_post[&p];
        g.set_input(pp, 1, p);
    }

    for u in exit_uses {
        for i in 0..g.inputs(u).len() {
            if g.input(u, i) == c.exit_proj {
                g.set_input(u, i, map_post[&c.exit_proj]);
            }
        }
        igvn.push(u);
    }
    for (n, uses) in &escaped {
        for &u in uses {
            for i in 0..g.inputs(u).len() {
                if g.input(u, i) == *n {
                    g.set_input(u, i, map_post[n]);
                }
            }
            igvn.push(u);
        }
    }

    for &v in map_post.values().chain(map_pre.values()) {
        igvn.push(v);
    }
    igvn.push(c.head);
    igvn.push(c.cmp);
    igvn.push(main_opq);
    for &p in &body.phis {
        igvn.push(p);
    }
    debug!(head = ?c.head, body = body.size(), "split into pre/main/post");

    Split { pre_head, pre_cmp, post_head, main_opq }
}

/// Whether `limit - stride` is provably representable, the precondition
/// for the unrolled exit test.
pub(crate) fn stride_room(g: &Graph, limit: NodeId, stride: i32) -> bool {
    let r = g
        .tys
        .int_range(g.ty(limit))
        .unwrap_or(anvil_ir::IntRange::FULL);
    i64::from(r.lo) - i64::from(stride) >= i64::from(i32::MIN)
        && i64::from(r.hi) - i64::from(stride) <= i64::from(i32::MAX)
}

/// Double the main loop body. The exit test keeps its place; the limit
/// behind `Opaque1` drops by one stride so both copies of an admitted
/// double-iteration stay inside the original bound. The post loop picks
/// up the remainder.
pub(crate) fn unroll(g: &mut Graph, igvn: &mut IterGvn, c: &Counted, body: &LoopBody) -> bool {
    if !matches!(g.op(c.limit), NodeOp::Opaque1) {
        return false;
    }
    let back_ctrl = g.input(c.head, 1);
    if back_ctrl.is_none() || g.is_dead(back_ctrl) {
        return false;
    }
    let inner = g.input(c.limit, 1);
    if !stride_room(g, inner, c.stride) {
        return false;
    }

    // Clone everything between the continue projection and the backedge.
    // Seeding each phi to its backedge value chains the copy after the
    // original: the clone of `iv + stride` reads the original increment.
    let mut set = body.set.clone();
    set.remove(&c.head);
    set.remove(&c.exit_if);
    set.remove(&c.exit_proj);
    set.remove(&c.continue_proj);
    let mut seed = FxHashMap::default();
    seed.insert(c.continue_proj, back_ctrl);
    for &p in &body.phis {
        set.remove(&p);
        seed.insert(p, g.input(p, 2));
    }
    let map = clone_set(g, &set, &seed);

    g.set_input(c.head, 1, map[&back_ctrl]);
    for &p in &body.phis {
        let bv = g.input(p, 2);
        let nv = map.get(&bv).copied().unwrap_or(bv);
        g.set_input(p, 2, nv);
        igvn.push(p);
    }

    let s_con = typed(g, NodeOp::ConI(c.stride), &[]);
    let sub = typed(g, NodeOp::SubI, &[NodeId::NONE, inner, s_con]);
    g.set_input(c.limit, 1, sub);

    for &v in map.values() {
        igvn.push(v);
    }
    igvn.push(c.head);
    igvn.push(c.limit);
    igvn.push(sub);
    debug!(head = ?c.head, body = body.size(), "unrolled by two");
    true
}

#[cfg(test)]
#[path = "split/tests.rs"]
mod tests;
