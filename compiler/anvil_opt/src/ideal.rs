//! Shape rewrites: turn a node into a cheaper or more canonical form.
//!
//! Returns `Some(replacement)` when the node should be subsumed by a new
//! (or existing) node, `Some(n)` when the node was edited in place, `None`
//! when nothing applies. Nodes created here are appended to `work` so the
//! driver types and hash-conses them.

use anvil_ir::{BoolTest, Graph, NodeId, NodeOp, TyId};

#[allow(clippy::too_many_lines)]
pub fn ideal(g: &mut Graph, n: NodeId, work: &mut Vec<NodeId>) -> Option<NodeId> {
    let op = *g.op(n);

    // Canonical operand order: constants to the right.
    if op.is_commutative() {
        let (a, b) = (g.input(n, 1), g.input(n, 2));
        if g.op(a).is_con() && !g.op(b).is_con() {
            g.set_input(n, 1, b);
            g.set_input(n, 2, a);
            return Some(n);
        }
    }

    match op {
        NodeOp::AddI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            // (x + c1) + c2 => x + (c1 + c2), wrapping.
            if let (NodeOp::AddI, Some(c2)) = (*g.op(a), con_i(g, b)) {
                if let Some(c1) = con_i(g, g.input(a, 2)) {
                    let x = g.input(a, 1);
                    let c = c1.wrapping_add(c2);
                    if c == 0 {
                        return Some(x);
                    }
                    let cn = g.add(NodeOp::ConI(c), &[]);
                    let add = g.add(NodeOp::AddI, &[NodeId::NONE, x, cn]);
                    work.push(cn);
                    work.push(add);
                    return Some(add);
                }
            }
            None
        }
        NodeOp::XorI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if a == b {
                let z = g.add(NodeOp::ConI(0), &[]);
                work.push(z);
                return Some(z);
            }
            None
        }
        NodeOp::XorL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if a == b {
                let z = g.add(NodeOp::ConL(0), &[]);
                work.push(z);
                return Some(z);
            }
            None
        }
        NodeOp::SubI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if a == b {
                let z = g.add(NodeOp::ConI(0), &[]);
                work.push(z);
                return Some(z);
            }
            // x - c => x + (-c), except c == MIN which has no negation.
            if let Some(c) = con_i(g, b) {
                if c != 0 && c != i32::MIN {
                    let cn = g.add(NodeOp::ConI(c.wrapping_neg()), &[]);
                    let add = g.add(NodeOp::AddI, &[NodeId::NONE, a, cn]);
                    work.push(cn);
                    work.push(add);
                    return Some(add);
                }
            }
            None
        }
        NodeOp::MulI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if let Some(c) = con_i(g, b) {
                if c > 1 && (c as u32).is_power_of_two() {
                    let k = c.trailing_zeros() as i32;
                    let kn = g.add(NodeOp::ConI(k), &[]);
                    let shl = g.add(NodeOp::ShlI, &[NodeId::NONE, a, kn]);
                    work.push(kn);
                    work.push(shl);
                    return Some(shl);
                }
            }
            None
        }
        NodeOp::DivI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if let Some(c) = con_i(g, b) {
                if c == -1 {
                    let z = g.add(NodeOp::ConI(0), &[]);
                    let sub = g.add(NodeOp::SubI, &[NodeId::NONE, z, a]);
                    work.push(z);
                    work.push(sub);
                    return Some(sub);
                }
                if c > 1 && (c as u32).is_power_of_two() {
                    let k = c.trailing_zeros();
                    let div = build_sdiv_pow2(g, a, k, work);
                    return Some(div);
                }
            }
            None
        }
        NodeOp::RemI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if let Some(c) = con_i(g, b) {
                if c > 1 && (c as u32).is_power_of_two() {
                    // x % 2^k  =  x - (x / 2^k) << k
                    let k = c.trailing_zeros();
                    let div = build_sdiv_pow2(g, a, k, work);
                    let kn = g.add(NodeOp::ConI(k as i32), &[]);
                    let shl = g.add(NodeOp::ShlI, &[NodeId::NONE, div, kn]);
                    let sub = g.add(NodeOp::SubI, &[NodeId::NONE, a, shl]);
                    work.push(kn);
                    work.push(shl);
                    work.push(sub);
                    return Some(sub);
                }
            }
            None
        }

        NodeOp::AddL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if let (NodeOp::AddL, Some(c2)) = (*g.op(a), con_l(g, b)) {
                if let Some(c1) = con_l(g, g.input(a, 2)) {
                    let x = g.input(a, 1);
                    let c = c1.wrapping_add(c2);
                    if c == 0 {
                        return Some(x);
                    }
                    let cn = g.add(NodeOp::ConL(c), &[]);
                    let add = g.add(NodeOp::AddL, &[NodeId::NONE, x, cn]);
                    work.push(cn);
                    work.push(add);
                    return Some(add);
                }
            }
            None
        }
        NodeOp::SubL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if a == b {
                let z = g.add(NodeOp::ConL(0), &[]);
                work.push(z);
                return Some(z);
            }
            if let Some(c) = con_l(g, b) {
                if c != 0 && c != i64::MIN {
                    let cn = g.add(NodeOp::ConL(c.wrapping_neg()), &[]);
                    let add = g.add(NodeOp::AddL, &[NodeId::NONE, a, cn]);
                    work.push(cn);
                    work.push(add);
                    return Some(add);
                }
            }
            None
        }
        NodeOp::MulL => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if let Some(c) = con_l(g, b) {
                if c > 1 && (c as u64).is_power_of_two() {
                    let k = c.trailing_zeros() as i32;
                    let kn = g.add(NodeOp::ConI(k), &[]);
                    let shl = g.add(NodeOp::ShlL, &[NodeId::NONE, a, kn]);
                    work.push(kn);
                    work.push(shl);
                    return Some(shl);
                }
            }
            None
        }

        // Branch on a three-way long compare against zero is just a long
        // compare.
        NodeOp::CmpI => {
            let (a, b) = (g.input(n, 1), g.input(n, 2));
            if matches!(g.op(a), NodeOp::LCmpV) && con_i(g, b) == Some(0) {
                let (x, y) = (g.input(a, 1), g.input(a, 2));
                let cmp = g.add(NodeOp::CmpL, &[NodeId::NONE, x, y]);
                work.push(cmp);
                return Some(cmp);
            }
            None
        }

        // Canonicalize gt/ge away by swapping compare operands.
        NodeOp::Bool(test @ (BoolTest::Gt | BoolTest::Ge)) => {
            let cmp = g.input(n, 1);
            let cop = *g.op(cmp);
            if matches!(cop, NodeOp::CmpI | NodeOp::CmpL | NodeOp::CmpU) {
                let (x, y) = (g.input(cmp, 1), g.input(cmp, 2));
                let swapped = g.add(cop, &[NodeId::NONE, y, x]);
                let b = g.add(NodeOp::Bool(test.commute()), &[NodeId::NONE, swapped]);
                work.push(swapped);
                work.push(b);
                return Some(b);
            }
            None
        }

        NodeOp::Region => region_ideal(g, n, work),
        NodeOp::LoopHead(_) => loop_head_ideal(g, n, work),

        NodeOp::LoadArr(ak) => {
            let mem = g.input(n, 1);
            if let NodeOp::StoreArr(sak) = *g.op(mem) {
                if sak == ak {
                    let (sb, si) = (g.input(mem, 2), g.input(mem, 3));
                    let (lb, li) = (g.input(n, 2), g.input(n, 3));
                    if sb == lb && si == li {
                        // Read of the value just written.
                        return Some(g.input(mem, 4));
                    }
                    if sb == lb {
                        if let (Some(c1), Some(c2)) = (con_i(g, si), con_i(g, li)) {
                            if c1 != c2 {
                                // Distinct constant indexes cannot alias.
                                let prior = g.input(mem, 1);
                                g.set_input(n, 1, prior);
                                return Some(n);
                            }
                        }
                    }
                }
            }
            None
        }
        NodeOp::LoadGlobal(idx) => {
            let mem = g.input(n, 1);
            if matches!(g.op(mem), NodeOp::StoreGlobal(s) if *s == idx) {
                return Some(g.input(mem, 2));
            }
            None
        }
        NodeOp::StoreArr(ak) => {
            let prior = g.input(n, 1);
            if let NodeOp::StoreArr(pak) = *g.op(prior) {
                if pak == ak
                    && g.input(prior, 2) == g.input(n, 2)
                    && g.input(prior, 3) == g.input(n, 3)
                    && g.outputs(prior) == [n]
                {
                    // The prior store is fully overwritten before anyone
                    // observes it.
                    let before = g.input(prior, 1);
                    g.set_input(n, 1, before);
                    return Some(n);
                }
            }
            None
        }
        NodeOp::StoreGlobal(idx) => {
            let prior = g.input(n, 1);
            if matches!(g.op(prior), NodeOp::StoreGlobal(s) if *s == idx)
                && g.outputs(prior) == [n]
            {
                let before = g.input(prior, 1);
                g.set_input(n, 1, before);
                return Some(n);
            }
            None
        }

        _ => None,
    }
}

/// Signed division by `2^k` without a divide: add `(2^k - 1)` to negative
/// dividends, then shift.
fn build_sdiv_pow2(g: &mut Graph, x: NodeId, k: u32, work: &mut Vec<NodeId>) -> NodeId {
    let c31 = g.add(NodeOp::ConI(31), &[]);
    let sign = g.add(NodeOp::ShrI, &[NodeId::NONE, x, c31]);
    let cs = g.add(NodeOp::ConI(32 - k as i32), &[]);
    let corr = g.add(NodeOp::UShrI, &[NodeId::NONE, sign, cs]);
    let sum = g.add(NodeOp::AddI, &[NodeId::NONE, x, corr]);
    let ck = g.add(NodeOp::ConI(k as i32), &[]);
    let div = g.add(NodeOp::ShrI, &[NodeId::NONE, sum, ck]);
    work.extend([c31, sign, cs, corr, sum, ck, div]);
    div
}

/// Drop dead predecessors (and the matching phi operands); collapse a
/// single-predecessor region into that predecessor.
fn region_ideal(g: &mut Graph, n: NodeId, work: &mut Vec<NodeId>) -> Option<NodeId> {
    let mut changed = false;
    let mut i = 0;
    while i < g.inputs(n).len() {
        let p = g.input(n, i);
        let dead = p.is_none() || g.is_dead(p) || g.ty(p) == TyId::CTRL_TOP;
        if dead {
            for phi in phis_of(g, n) {
                g.remove_input(phi, i + 1);
                work.push(phi);
            }
            g.remove_input(n, i);
            changed = true;
        } else {
            i += 1;
        }
    }
    if g.inputs(n).len() == 1 {
        let pred = g.input(n, 0);
        for phi in phis_of(g, n) {
            let v = g.input(phi, 1);
            let touched = g.subsume(phi, v);
            work.extend(touched);
            work.push(v);
        }
        return Some(pred);
    }
    if changed { Some(n) } else { None }
}

/// A loop whose backedge died is a straight line: phis take their entry
/// value and the head dissolves into its entry control.
fn loop_head_ideal(g: &mut Graph, n: NodeId, work: &mut Vec<NodeId>) -> Option<NodeId> {
    let back = g.input(n, 1);
    let back_dead = back.is_none() || g.is_dead(back) || g.ty(back) == TyId::CTRL_TOP;
    if !back_dead {
        return None;
    }
    let entry = g.input(n, 0);
    for phi in phis_of(g, n) {
        let v = g.input(phi, 1);
        let touched = g.subsume(phi, v);
        work.extend(touched);
        work.push(v);
    }
    Some(entry)
}

fn phis_of(g: &Graph, region: NodeId) -> Vec<NodeId> {
    let mut phis: Vec<NodeId> = g
        .outputs(region)
        .iter()
        .copied()
        .filter(|&o| {
            matches!(g.op(o), NodeOp::Phi(_) | NodeOp::MemPhi(_)) && g.input(o, 0) == region
        })
        .collect();
    phis.sort_unstable();
    phis.dedup();
    phis
}

fn con_i(g: &Graph, n: NodeId) -> Option<i32> {
    match g.op(n) {
        NodeOp::ConI(v) => Some(*v),
        _ => None,
    }
}

fn con_l(g: &Graph, n: NodeId) -> Option<i64> {
    match g.op(n) {
        NodeOp::ConL(v) => Some(*v),
        _ => None,
    }
}
