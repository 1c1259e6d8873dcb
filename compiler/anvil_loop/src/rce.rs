//! Range-check elimination over a split counted loop.
//!
//! Each eliminable check constrains the induction variable: the access
//! `a[scale*iv + off]` is in bounds when `scale*iv + off >= 0` and
//! `scale*iv + off < len`. The lower constraints raise the pre loop's
//! limit, the upper ones lower the main loop's limit (behind its
//! `Opaque1`), and the checks themselves are then constant-false in the
//! main body. Pre and post keep their own copies of every check.
//!
//! Only positive strides and positive scales are handled, and every
//! emitted expression must be provably overflow-free from the operand
//! type ranges; anything else leaves the check alone.

use anvil_deopt::Reason;
use anvil_ir::{BoolTest, Graph, IntRange, NodeId, NodeOp};
use anvil_opt::IterGvn;
use tracing::debug;

use crate::body::LoopBody;
use crate::counted::{typed, Counted};
use crate::split::Split;

/// Loop-invariant offset of an index expression.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Off {
    Zero,
    Con(i32),
    Node(NodeId),
}

/// One eliminable check: `RangeCheck` on `a[scale*iv + off]` against an
/// invariant length.
pub(crate) struct Check {
    pub rc: NodeId,
    pub scale: i32,
    pub off: Off,
    pub len: NodeId,
}

/// Find the checks in `body` that constrain the induction variable of `c`.
pub(crate) fn find(g: &Graph, c: &Counted, body: &LoopBody) -> Vec<Check> {
    let mut out = Vec::new();
    for &n in &body.set {
        if !matches!(g.op(n), NodeOp::RangeCheck) || !body.members.contains(&n) {
            continue;
        }
        // Skip checks already demoted to a raising slow path.
        let Some(fail) = g.if_true(n) else { continue };
        let traps = g
            .outputs(fail)
            .iter()
            .any(|&u| !g.is_dead(u) && matches!(g.op(u), NodeOp::Trap(Reason::RangeCheck)));
        if !traps {
            continue;
        }
        // The guard fails on `idx >= len`, either as built or with the
        // compare commuted by canonicalization.
        let cond = g.input(n, 1);
        let NodeOp::Bool(bt) = *g.op(cond) else { continue };
        let cmp = g.input(cond, 1);
        if !matches!(g.op(cmp), NodeOp::CmpU) {
            continue;
        }
        let (idx, len) = match bt {
            BoolTest::Ge => (g.input(cmp, 1), g.input(cmp, 2)),
            BoolTest::Le => (g.input(cmp, 2), g.input(cmp, 1)),
            _ => continue,
        };
        if body.contains(len) {
            continue;
        }
        if let Some((scale, off)) = decompose(g, c.iv, idx, body) {
            out.push(Check { rc: n, scale, off, len });
        }
    }
    out.sort_unstable_by_key(|ch| ch.rc);
    out
}

/// Match `idx` as `scale*iv + off` with positive constant scale and
/// invariant offset.
fn decompose(g: &Graph, iv: NodeId, idx: NodeId, body: &LoopBody) -> Option<(i32, Off)> {
    let scaled = |x: NodeId| -> Option<i32> {
        if x == iv {
            return Some(1);
        }
        if matches!(g.op(x), NodeOp::MulI) {
            for (iv_slot, con_slot) in [(1, 2), (2, 1)] {
                if g.input(x, iv_slot) == iv {
                    if let NodeOp::ConI(s) = *g.op(g.input(x, con_slot)) {
                        if s > 0 {
                            return Some(s);
                        }
                    }
                }
            }
        }
        None
    };
    if let Some(s) = scaled(idx) {
        return Some((s, Off::Zero));
    }
    if matches!(g.op(idx), NodeOp::AddI) {
        let (a, b) = (g.input(idx, 1), g.input(idx, 2));
        for (v, o) in [(a, b), (b, a)] {
            let Some(s) = scaled(v) else { continue };
            if body.contains(o) {
                continue;
            }
            return Some(match *g.op(o) {
                NodeOp::ConI(k) => (s, Off::Con(k)),
                _ => (s, Off::Node(o)),
            });
        }
    }
    None
}

fn range(g: &Graph, n: NodeId) -> IntRange {
    g.tys.int_range(g.ty(n)).unwrap_or(IntRange::FULL)
}

fn fits(v: i64) -> bool {
    i32::try_from(v).is_ok()
}

/// Lowest main-loop iv admitting the check, or `None` when no
/// overflow-free expression exists.
fn lower_candidate(g: &mut Graph, ch: &Check) -> Option<NodeId> {
    match ch.off {
        Off::Zero => Some(typed(g, NodeOp::ConI(0), &[])),
        Off::Con(k) => {
            // ceil(-k / scale)
            let s = i64::from(ch.scale);
            let v = (-i64::from(k)).div_euclid(s) + i64::from((-i64::from(k)).rem_euclid(s) != 0);
            Some(typed(g, NodeOp::ConI(i32::try_from(v).ok()?), &[]))
        }
        Off::Node(x) => {
            if ch.scale != 1 || range(g, x).lo == i32::MIN {
                return None;
            }
            let zero = typed(g, NodeOp::ConI(0), &[]);
            Some(typed(g, NodeOp::SubI, &[NodeId::NONE, zero, x]))
        }
    }
}

/// Lowest main-loop limit keeping the check in bounds through the last
/// iteration, or `None` when it cannot be built overflow-free. `test` is
/// the loop's continue test (`Lt` or `Le`).
fn upper_candidate(
    g: &mut Graph,
    ch: &Check,
    test: BoolTest,
    div_ctrl: NodeId,
) -> Option<NodeId> {
    let len_r = range(g, ch.len);
    let le_adj = i64::from(test == BoolTest::Le);
    if ch.scale == 1 {
        // limit <= len - off (lt) or len - off - 1 (le)
        let k = match ch.off {
            Off::Zero => 0,
            Off::Con(k) => i64::from(k),
            Off::Node(x) => {
                let xr = range(g, x);
                if i64::from(len_r.hi) - i64::from(xr.lo) > i64::from(i32::MAX)
                    || i64::from(len_r.lo) - i64::from(xr.hi) - le_adj < i64::from(i32::MIN)
                {
                    return None;
                }
                let mut cand = typed(g, NodeOp::SubI, &[NodeId::NONE, ch.len, x]);
                if le_adj != 0 {
                    let one = typed(g, NodeOp::ConI(1), &[]);
                    cand = typed(g, NodeOp::SubI, &[NodeId::NONE, cand, one]);
                }
                return Some(cand);
            }
        };
        let k = k + le_adj;
        if !fits(k)
            || i64::from(len_r.hi) - k > i64::from(i32::MAX)
            || i64::from(len_r.lo) - k < i64::from(i32::MIN)
        {
            return None;
        }
        let kc = typed(g, NodeOp::ConI(i32::try_from(k).ok()?), &[]);
        Some(typed(g, NodeOp::SubI, &[NodeId::NONE, ch.len, kc]))
    } else {
        // limit <= (len - off - scale) / scale + 1 (lt; le drops the +1).
        // The extra scale-1 in the numerator keeps truncating division
        // conservative for negative numerators.
        let k = match ch.off {
            Off::Zero => 0,
            Off::Con(k) => i64::from(k),
            Off::Node(_) => return None,
        };
        let d = k + i64::from(ch.scale);
        if !fits(d)
            || i64::from(len_r.hi) - d > i64::from(i32::MAX)
            || i64::from(len_r.lo) - d < i64::from(i32::MIN)
        {
            return None;
        }
        let dc = typed(g, NodeOp::ConI(i32::try_from(d).ok()?), &[]);
        let num = typed(g, NodeOp::SubI, &[NodeId::NONE, ch.len, dc]);
        let sc = typed(g, NodeOp::ConI(ch.scale), &[]);
        let q = typed(g, NodeOp::DivI, &[div_ctrl, num, sc]);
        if le_adj != 0 {
            return Some(q);
        }
        let one = typed(g, NodeOp::ConI(1), &[]);
        Some(typed(g, NodeOp::AddI, &[NodeId::NONE, q, one]))
    }
}

/// Apply the checks to a freshly split loop: raise the pre limit, lower
/// the main limit, and kill the eliminated checks in the main body.
/// Returns how many checks were eliminated.
pub(crate) fn apply(
    g: &mut Graph,
    igvn: &mut IterGvn,
    c: &Counted,
    split: &Split,
    checks: &[Check],
) -> usize {
    debug_assert!(matches!(g.op(c.limit), NodeOp::Opaque1));
    debug_assert!(matches!(c.test, BoolTest::Lt | BoolTest::Le));
    let inner = g.input(c.limit, 1);
    let div_ctrl = g.input(split.pre_head, 0);

    let mut raised = c.init;
    let mut lowered = inner;
    let mut applied = Vec::new();
    for ch in checks {
        let Some(lo) = lower_candidate(g, ch) else { continue };
        let Some(hi) = upper_candidate(g, ch, c.test, div_ctrl) else {
            continue;
        };
        raised = typed(g, NodeOp::MaxI, &[NodeId::NONE, raised, lo]);
        lowered = typed(g, NodeOp::MinI, &[NodeId::NONE, lowered, hi]);
        applied.push(ch.rc);
    }
    if applied.is_empty() {
        return 0;
    }

    // Pre must still stop at the real limit.
    let pre_limit = typed(g, NodeOp::MinI, &[NodeId::NONE, raised, inner]);
    g.set_input(split.pre_cmp, c.limit_slot, pre_limit);

    // The lowered limit never exceeds the original; when that says
    // anything, pin it so the main loop's iv keeps a bounded type.
    let hi = range(g, inner).hi;
    let new_limit = if hi < i32::MAX {
        let bound = g.tys.int(i32::MIN, hi);
        typed(g, NodeOp::CastII(bound), &[g.input(c.head, 0), lowered])
    } else {
        lowered
    };
    g.set_input(c.limit, 1, new_limit);

    let dead = typed(g, NodeOp::ConI(0), &[]);
    for &rc in &applied {
        g.set_input(rc, 1, dead);
        igvn.push(rc);
    }
    igvn.push(split.pre_cmp);
    igvn.push(c.limit);
    igvn.push(pre_limit);
    igvn.push(new_limit);
    debug!(head = ?c.head, eliminated = applied.len(), "range checks hoisted out of main loop");
    applied.len()
}

#[cfg(test)]
#[path = "rce/tests.rs"]
mod tests;
