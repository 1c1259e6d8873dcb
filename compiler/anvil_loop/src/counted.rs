//! Counted-loop recognition and the loop-limit-check predicate.

use anvil_ir::{BoolTest, Graph, IntRange, NodeFlags, NodeId, NodeOp};
use anvil_opt::{value, IterGvn};
use anvil_deopt::Reason;
use tracing::debug;

use crate::body::LoopBody;

/// A recognized counted loop: `for (iv = init; test(iv, limit); iv += stride)`
/// with the exit test at the loop top.
pub struct Counted {
    pub head: NodeId,
    /// The induction phi.
    pub iv: NodeId,
    /// `AddI(iv, stride)` on the backedge.
    #[allow(dead_code)]
    pub incr: NodeId,
    pub init: NodeId,
    pub stride: i32,
    pub limit: NodeId,
    /// Continue condition, oriented as `test(iv, limit)`.
    pub test: BoolTest,
    pub exit_if: NodeId,
    pub continue_proj: NodeId,
    pub exit_proj: NodeId,
    /// The `CmpI` feeding the exit test and the input slot `limit` sits in.
    pub cmp: NodeId,
    pub limit_slot: usize,
}

/// Try to recognize the loop at `head` as counted.
pub fn recognize(g: &Graph, head: NodeId, body: &LoopBody) -> Option<Counted> {
    if !matches!(g.op(head), NodeOp::LoopHead(_)) || g.input(head, 1).is_none() {
        return None;
    }

    // The exit branch hangs directly off the head (top-test form).
    let exit_if = g
        .outputs(head)
        .iter()
        .copied()
        .find(|&o| !g.is_dead(o) && matches!(g.op(o), NodeOp::If) && g.input(o, 0) == head)?;
    let t = g.if_true(exit_if)?;
    let f = g.if_false(exit_if)?;
    let (exit_proj, continue_proj) = match (body.members.contains(&t), body.members.contains(&f)) {
        (false, true) => (t, f),
        (true, false) => (f, t),
        _ => return None,
    };

    let cond = g.input(exit_if, 1);
    let NodeOp::Bool(bt) = *g.op(cond) else {
        return None;
    };
    let cmp = g.input(cond, 1);
    if !matches!(g.op(cmp), NodeOp::CmpI) {
        return None;
    }
    let (a, b) = (g.input(cmp, 1), g.input(cmp, 2));

    let iv_shape = |x: NodeId| -> Option<(NodeId, i32)> {
        if !matches!(g.op(x), NodeOp::Phi(_)) || g.inputs(x).len() != 3 || g.input(x, 0) != head {
            return None;
        }
        let incr = g.input(x, 2);
        if !matches!(g.op(incr), NodeOp::AddI) {
            return None;
        }
        for (iv_slot, con_slot) in [(1, 2), (2, 1)] {
            if g.input(incr, iv_slot) == x {
                if let NodeOp::ConI(s) = *g.op(g.input(incr, con_slot)) {
                    return Some((incr, s));
                }
            }
        }
        None
    };

    let (iv, incr, stride, limit, limit_slot, iv_left) = if let Some((incr, s)) = iv_shape(a) {
        (a, incr, s, b, 2, true)
    } else if let Some((incr, s)) = iv_shape(b) {
        (b, incr, s, a, 1, false)
    } else {
        return None;
    };
    if stride == 0 || body.contains(limit) {
        return None;
    }

    // Orient the test to iv-on-the-left, then flip it if the loop
    // continues on the false projection.
    let oriented = if iv_left { bt } else { bt.commute() };
    let test = if continue_proj == f { oriented.negate() } else { oriented };

    // Stride and test direction must agree or the loop does not count.
    let ok = match test {
        BoolTest::Lt | BoolTest::Le => stride > 0,
        BoolTest::Gt | BoolTest::Ge => stride < 0,
        BoolTest::Ne => stride == 1 || stride == -1,
        BoolTest::Eq => false,
    };
    if !ok {
        return None;
    }

    let init = g.input(iv, 1);
    Some(Counted {
        head,
        iv,
        incr,
        init,
        stride,
        limit,
        test,
        exit_if,
        continue_proj,
        exit_proj,
        cmp,
        limit_slot,
    })
}

/// Exact trip count when both bounds are compile-time constants.
pub fn exact_trip_count(g: &Graph, c: &Counted) -> Option<u64> {
    let i = i64::from(g.tys.as_int_con(g.ty(c.init))?);
    let l = i64::from(g.tys.as_int_con(g.ty(c.limit))?);
    let s = i64::from(c.stride);
    let trips = match c.test {
        BoolTest::Lt => {
            if i >= l { 0 } else { (l - i + s - 1) / s }
        }
        BoolTest::Le => {
            if i > l { 0 } else { (l - i) / s + 1 }
        }
        BoolTest::Gt => {
            if i <= l { 0 } else { (l - i + s + 1) / s }
        }
        BoolTest::Ge => {
            if i < l { 0 } else { (l - i) / s + 1 }
        }
        BoolTest::Ne => {
            let d = l - i;
            if d % s != 0 || d / s < 0 {
                return None; // steps over the limit and wraps
            }
            d / s
        }
        BoolTest::Eq => return None,
    };
    u64::try_from(trips).ok()
}

/// Induction-variable value after `trips` iterations.
pub fn final_iv(g: &Graph, c: &Counted) -> Option<i32> {
    let trips = exact_trip_count(g, c)?;
    let i = i64::from(g.tys.as_int_con(g.ty(c.init))?);
    let v = i + i64::try_from(trips).ok()? * i64::from(c.stride);
    i32::try_from(v).ok()
}

/// Largest (or, negative stride, smallest) limit for which the increment
/// provably cannot overflow. `None` when the limit's type already proves it.
pub fn overflow_bound(g: &Graph, c: &Counted) -> Option<i32> {
    let r = g
        .tys
        .int_range(g.ty(c.limit))
        .unwrap_or(IntRange::FULL);
    let s = i64::from(c.stride);
    if c.stride > 0 {
        // Last in-loop iv is limit-1 (lt) or limit (le); iv + stride must
        // stay representable.
        let bound = match c.test {
            BoolTest::Lt | BoolTest::Ne => i64::from(i32::MAX) - s + 1,
            _ => i64::from(i32::MAX) - s,
        };
        if i64::from(r.hi) <= bound {
            return None;
        }
        i32::try_from(bound).ok()
    } else {
        let bound = match c.test {
            BoolTest::Gt | BoolTest::Ne => i64::from(i32::MIN) - s - 1,
            _ => i64::from(i32::MIN) - s,
        };
        if i64::from(r.lo) >= bound {
            return None;
        }
        i32::try_from(bound).ok()
    }
}

/// Insert a loop-limit-check predicate above the loop entry: trap (and
/// reinterpret) unless the limit respects `bound`. An `upper` predicate
/// admits `limit <= bound`, a lower one `limit >= bound`. Requires the
/// builder's entry safepoint to borrow its frame state from.
pub fn insert_limit_predicate(
    g: &mut Graph,
    igvn: &mut IterGvn,
    c: &Counted,
    bound: i32,
    upper: bool,
) -> bool {
    let entry = g.input(c.head, 0);
    if !matches!(g.op(entry), NodeOp::Safepoint) {
        return false;
    }
    let desc = match g.frames.get(&entry) {
        Some(d) => d.clone(),
        None => return false,
    };
    let state: Vec<NodeId> = g.inputs(entry).iter().skip(1).copied().collect();

    let con = typed(g, NodeOp::ConI(bound), &[]);
    let cmp = typed(g, NodeOp::CmpI, &[NodeId::NONE, c.limit, con]);
    let bt = if upper { BoolTest::Le } else { BoolTest::Ge };
    let cond = typed(g, NodeOp::Bool(bt), &[NodeId::NONE, cmp]);
    let iff = typed(g, NodeOp::If, &[entry, cond]);
    let ok = typed(g, NodeOp::IfTrue, &[iff]);
    let fail = typed(g, NodeOp::IfFalse, &[iff]);

    let trap = g.add(NodeOp::Trap(Reason::LoopLimitCheck), &[fail]);
    for s in state {
        g.add_input(trap, s);
    }
    g.set_ty(trap, anvil_ir::TyId::CTRL);
    g.frames.insert(trap, desc);
    g.add_exit(trap);

    g.set_input(c.head, 0, ok);
    g.set_flag(c.head, NodeFlags::COUNTED);

    // Below the predicate the limit is known in bounds; pin that on the
    // exit compare so recognition stops asking for a predicate.
    let bound_ty = if upper {
        g.tys.int(i32::MIN, bound)
    } else {
        g.tys.int(bound, i32::MAX)
    };
    let cast = typed(g, NodeOp::CastII(bound_ty), &[ok, c.limit]);
    g.set_input(c.cmp, c.limit_slot, cast);

    for n in [con, cmp, cond, iff, ok, fail, trap, cast, c.cmp, c.head] {
        igvn.push(n);
    }
    debug!(head = ?c.head, bound, "inserted loop-limit-check predicate");
    true
}

/// Add a node and type it immediately, keeping the graph's types sound.
pub(crate) fn typed(g: &mut Graph, op: NodeOp, inputs: &[NodeId]) -> NodeId {
    let n = g.add(op, inputs);
    let t = value(g, n);
    g.set_ty(n, t);
    n
}

#[cfg(test)]
#[path = "counted/tests.rs"]
mod tests;
