//! Algebraic no-op detection: a node that computes the same value as an
//! existing node returns that node instead of itself.

use anvil_ir::{Graph, NodeId, NodeOp, TyId};

/// Returns an existing node equal to `n`, or `n` itself.
#[allow(clippy::too_many_lines)]
pub fn identity(g: &mut Graph, n: NodeId) -> NodeId {
    let op = *g.op(n);
    match op {
        NodeOp::AddI | NodeOp::OrI | NodeOp::XorI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if int_con_is(g, b, 0) {
                return a;
            }
            if int_con_is(g, a, 0) {
                return b;
            }
            n
        }
        NodeOp::SubI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if int_con_is(g, b, 0) { a } else { n }
        }
        NodeOp::MulI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if int_con_is(g, b, 1) {
                return a;
            }
            if int_con_is(g, a, 1) {
                return b;
            }
            n
        }
        NodeOp::DivI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if int_con_is(g, b, 1) { a } else { n }
        }
        NodeOp::AndI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if int_con_is(g, b, -1) {
                return a;
            }
            if int_con_is(g, a, -1) {
                return b;
            }
            // x & m is x when x already fits under a low-bit mask.
            if let Some(m) = int_con(g, b) {
                if m >= 0 && (i64::from(m) + 1).count_ones() == 1 {
                    if let Some(r) = {
                        let t = g.ty(a);
                        g.tys.int_range(t)
                    } {
                        if r.lo >= 0 && r.hi <= m {
                            return a;
                        }
                    }
                }
            }
            n
        }
        NodeOp::ShlI | NodeOp::ShrI | NodeOp::UShrI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            match int_con(g, b) {
                Some(c) if c & 31 == 0 => a,
                _ => n,
            }
        }

        NodeOp::AddL | NodeOp::OrL | NodeOp::XorL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if long_con_is(g, b, 0) {
                return a;
            }
            if long_con_is(g, a, 0) {
                return b;
            }
            n
        }
        NodeOp::SubL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if long_con_is(g, b, 0) { a } else { n }
        }
        NodeOp::MulL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if long_con_is(g, b, 1) {
                return a;
            }
            if long_con_is(g, a, 1) {
                return b;
            }
            n
        }
        NodeOp::DivL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if long_con_is(g, b, 1) { a } else { n }
        }
        NodeOp::AndL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if long_con_is(g, b, -1) {
                return a;
            }
            if long_con_is(g, a, -1) {
                return b;
            }
            n
        }
        NodeOp::ShlL | NodeOp::ShrL | NodeOp::UShrL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            match int_con(g, b) {
                Some(c) if c & 63 == 0 => a,
                _ => n,
            }
        }

        // i2l(l2i(x)) truncates, never an identity; the inverse round trip
        // is exact.
        NodeOp::ConvL2I => {
            let x = g.input(n, 1);
            if matches!(g.op(x), NodeOp::ConvI2L) {
                g.input(x, 1)
            } else {
                n
            }
        }
        NodeOp::Phi(_) | NodeOp::MemPhi(_) => phi_identity(g, n),

        NodeOp::CastII(bound) => {
            // The cast is a no-op once its input's type already proves the
            // bound.
            let t = g.ty(g.input(n, 1));
            if t != TyId::TOP && g.tys.higher_equal(t, bound) {
                g.input(n, 1)
            } else {
                n
            }
        }

        NodeOp::MinI | NodeOp::MaxI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if a == b {
                return a;
            }
            let (ta, tb) = (g.ty(a), g.ty(b));
            if let (Some(ra), Some(rb)) = (g.tys.int_range(ta), g.tys.int_range(tb)) {
                match op {
                    NodeOp::MinI if ra.hi <= rb.lo => return a,
                    NodeOp::MinI if rb.hi <= ra.lo => return b,
                    NodeOp::MaxI if ra.lo >= rb.hi => return a,
                    NodeOp::MaxI if rb.lo >= ra.hi => return b,
                    _ => {}
                }
            }
            n
        }

        _ => n,
    }
}

/// A phi whose live inputs all agree collapses to that input.
fn phi_identity(g: &mut Graph, n: NodeId) -> NodeId {
    let region = g.input(n, 0);
    if region.is_none() || g.is_dead(region) {
        return n;
    }
    let mut unique = NodeId::NONE;
    for i in 1..g.inputs(n).len() {
        let pred = g.input(region, i - 1);
        if pred.is_none() || g.is_dead(pred) || g.ty(pred) == TyId::CTRL_TOP {
            continue;
        }
        let v = g.input(n, i);
        if v.is_none() || v == n {
            continue;
        }
        if unique.is_none() {
            unique = v;
        } else if unique != v {
            return n;
        }
    }
    if unique.is_some() { unique } else { n }
}

fn int_con(g: &Graph, n: NodeId) -> Option<i32> {
    match g.op(n) {
        NodeOp::ConI(v) => Some(*v),
        _ => None,
    }
}

fn int_con_is(g: &Graph, n: NodeId, v: i32) -> bool {
    int_con(g, n) == Some(v)
}

fn long_con_is(g: &Graph, n: NodeId, v: i64) -> bool {
    matches!(g.op(n), NodeOp::ConL(c) if *c == v)
}
