//! Per-op lattice transfer functions.
//!
//! Arithmetic follows 32/64-bit two's-complement semantics: constants fold
//! with wrapping, ranges propagate only when the bounds provably cannot
//! wrap, shift counts are masked, and `MIN / -1` wraps. Double folding is
//! strict IEEE: no reassociation, `NaN` compares unordered.

use anvil_bc::ArrayKind;
use anvil_ir::{Graph, IntRange, LongRange, NodeId, NodeOp, TyData, TyId};

/// Compute the type of `n` from its inputs. Pure in the graph shape; only
/// the type pool is touched.
#[allow(clippy::too_many_lines)]
pub fn value(g: &mut Graph, n: NodeId) -> TyId {
    let op = *g.op(n);
    match op {
        NodeOp::Start | NodeOp::Stop => TyId::CTRL,
        NodeOp::Region | NodeOp::LoopHead(_) => {
            let any_live = g
                .inputs(n)
                .iter()
                .any(|&p| p.is_some() && !g.is_dead(p) && ctrl_live(g.ty(p)));
            if any_live { TyId::CTRL } else { TyId::CTRL_TOP }
        }
        NodeOp::If | NodeOp::RangeCheck => {
            let c = g.ty(g.input(n, 0));
            let cond = g.ty(g.input(n, 1));
            if !ctrl_live(c) || cond == TyId::TOP {
                return g.tys.tuple(&[TyId::CTRL_TOP, TyId::CTRL_TOP]);
            }
            match g.tys.as_int_con(cond) {
                Some(0) => g.tys.tuple(&[TyId::CTRL_TOP, TyId::CTRL]),
                Some(_) => g.tys.tuple(&[TyId::CTRL, TyId::CTRL_TOP]),
                None => g.tys.tuple(&[TyId::CTRL, TyId::CTRL]),
            }
        }
        NodeOp::IfTrue => branch_proj(g, n, 0),
        NodeOp::IfFalse => branch_proj(g, n, 1),
        NodeOp::Return | NodeOp::Safepoint | NodeOp::Trap(_) | NodeOp::Raise(_) => {
            let c = g.ty(g.input(n, 0));
            if ctrl_live(c) { TyId::CTRL } else { TyId::CTRL_TOP }
        }

        // Roots keep the type the builder gave them.
        NodeOp::Param(_) | NodeOp::CallStatic { .. } | NodeOp::LoadGlobal(_) => g.ty(n),
        NodeOp::InitMem(_) => TyId::MEM,
        NodeOp::ConI(v) => g.tys.int_con(v),
        NodeOp::ConL(v) => g.tys.long_con(v),
        NodeOp::ConD(bits) => g.tys.double_con_bits(bits),
        NodeOp::ConNull => TyId::NULL,

        NodeOp::AddI => int_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_int_con(p, a.lo.wrapping_add(b.lo));
            }
            make_int(p, i64::from(a.lo) + i64::from(b.lo), i64::from(a.hi) + i64::from(b.hi), wmax(a, b))
        }),
        NodeOp::SubI => int_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_int_con(p, a.lo.wrapping_sub(b.lo));
            }
            make_int(p, i64::from(a.lo) - i64::from(b.hi), i64::from(a.hi) - i64::from(b.lo), wmax(a, b))
        }),
        NodeOp::MulI => int_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_int_con(p, a.lo.wrapping_mul(b.lo));
            }
            let c = [
                i64::from(a.lo) * i64::from(b.lo),
                i64::from(a.lo) * i64::from(b.hi),
                i64::from(a.hi) * i64::from(b.lo),
                i64::from(a.hi) * i64::from(b.hi),
            ];
            let (lo, hi) = min_max(&c);
            make_int(p, lo, hi, wmax(a, b))
        }),
        NodeOp::DivI => int_bin(g, n, |p, a, b| {
            if b.contains(0) {
                return TyId::INT; // division is guarded; assume nothing
            }
            if a.lo == i32::MIN && b.contains(-1) {
                return TyId::INT; // MIN / -1 wraps
            }
            let c = [
                i64::from(java_div_i(a.lo, b.lo)),
                i64::from(java_div_i(a.lo, b.hi)),
                i64::from(java_div_i(a.hi, b.lo)),
                i64::from(java_div_i(a.hi, b.hi)),
            ];
            let (lo, hi) = min_max(&c);
            make_int(p, lo, hi, wmax(a, b))
        }),
        NodeOp::RemI => int_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() && b.lo != 0 {
                return p_int_con(p, a.lo.wrapping_rem(b.lo));
            }
            if b.contains(0) {
                return TyId::INT;
            }
            // |a % b| < max|b|, sign follows the dividend.
            let m = i64::from(b.lo.unsigned_abs().max(b.hi.unsigned_abs())) - 1;
            let lo = if a.lo >= 0 { 0 } else { (-m).max(i64::from(a.lo)) };
            let hi = if a.hi <= 0 { 0 } else { m.min(i64::from(a.hi)) };
            make_int(p, lo, hi, wmax(a, b))
        }),
        NodeOp::AndI => int_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_int_con(p, a.lo & b.lo);
            }
            if a.lo >= 0 || b.lo >= 0 {
                let ah = if a.lo >= 0 { a.hi } else { i32::MAX };
                let bh = if b.lo >= 0 { b.hi } else { i32::MAX };
                return make_int(p, 0, i64::from(ah.min(bh)), wmax(a, b));
            }
            TyId::INT
        }),
        NodeOp::OrI => int_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_int_con(p, a.lo | b.lo);
            }
            nonneg_mask(p, a, b)
        }),
        NodeOp::XorI => int_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_int_con(p, a.lo ^ b.lo);
            }
            nonneg_mask(p, a, b)
        }),
        NodeOp::ShlI => int_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_int_con(p, a.lo.wrapping_shl(b.lo as u32));
            }
            TyId::INT
        }),
        NodeOp::ShrI => int_bin(g, n, |p, a, b| {
            if b.is_con() {
                let s = (b.lo & 31) as u32;
                // Arithmetic shift is monotone.
                return make_int(p, i64::from(a.lo >> s), i64::from(a.hi >> s), a.widen);
            }
            let lo = if a.lo <= 0 { a.lo } else { 0 };
            let hi = if a.hi >= 0 { a.hi } else { -1 };
            make_int(p, i64::from(lo), i64::from(hi), a.widen)
        }),
        NodeOp::UShrI => int_bin(g, n, |p, a, b| {
            if b.is_con() {
                let s = (b.lo & 31) as u32;
                if s == 0 {
                    return p.intern(TyData::Int(a));
                }
                if a.lo >= 0 {
                    return make_int(
                        p,
                        i64::from((a.lo as u32) >> s),
                        i64::from((a.hi as u32) >> s),
                        a.widen,
                    );
                }
                return make_int(p, 0, i64::from((u32::MAX >> s) as i32), a.widen);
            }
            if a.lo >= 0 {
                return make_int(p, 0, i64::from(a.hi), a.widen);
            }
            TyId::INT
        }),

        NodeOp::AddL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_long_con(p, a.lo.wrapping_add(b.lo));
            }
            make_long(
                p,
                i128::from(a.lo) + i128::from(b.lo),
                i128::from(a.hi) + i128::from(b.hi),
                lwmax(a, b),
            )
        }),
        NodeOp::SubL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_long_con(p, a.lo.wrapping_sub(b.lo));
            }
            make_long(
                p,
                i128::from(a.lo) - i128::from(b.hi),
                i128::from(a.hi) - i128::from(b.lo),
                lwmax(a, b),
            )
        }),
        NodeOp::MulL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_long_con(p, a.lo.wrapping_mul(b.lo));
            }
            let c = [
                i128::from(a.lo) * i128::from(b.lo),
                i128::from(a.lo) * i128::from(b.hi),
                i128::from(a.hi) * i128::from(b.lo),
                i128::from(a.hi) * i128::from(b.hi),
            ];
            let (lo, hi) = min_max_l(&c);
            make_long(p, lo, hi, lwmax(a, b))
        }),
        NodeOp::DivL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() && b.lo != 0 {
                return p_long_con(p, java_div_l(a.lo, b.lo));
            }
            TyId::LONG
        }),
        NodeOp::RemL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() && b.lo != 0 {
                return p_long_con(p, a.lo.wrapping_rem(b.lo));
            }
            TyId::LONG
        }),
        NodeOp::AndL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                return p_long_con(p, a.lo & b.lo);
            }
            if a.lo >= 0 || b.lo >= 0 {
                let ah = if a.lo >= 0 { a.hi } else { i64::MAX };
                let bh = if b.lo >= 0 { b.hi } else { i64::MAX };
                return make_long(p, 0, i128::from(ah.min(bh)), lwmax(a, b));
            }
            TyId::LONG
        }),
        NodeOp::OrL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() { p_long_con(p, a.lo | b.lo) } else { TyId::LONG }
        }),
        NodeOp::XorL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() { p_long_con(p, a.lo ^ b.lo) } else { TyId::LONG }
        }),
        NodeOp::ShlL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                p_long_con(p, a.lo.wrapping_shl(b.lo as u32))
            } else {
                TyId::LONG
            }
        }),
        NodeOp::ShrL => long_bin(g, n, |p, a, b| {
            if b.is_con() {
                let s = (b.lo & 63) as u32;
                return make_long(p, i128::from(a.lo >> s), i128::from(a.hi >> s), a.widen);
            }
            TyId::LONG
        }),
        NodeOp::UShrL => long_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                let s = (b.lo & 63) as u32;
                p_long_con(p, ((a.lo as u64) >> s) as i64)
            } else {
                TyId::LONG
            }
        }),

        NodeOp::AddD => double_bin(g, n, |x, y| x + y),
        NodeOp::SubD => double_bin(g, n, |x, y| x - y),
        NodeOp::MulD => double_bin(g, n, |x, y| x * y),
        NodeOp::DivD => double_bin(g, n, |x, y| x / y),
        NodeOp::RemD => double_bin(g, n, |x, y| x % y),
        NodeOp::NegD => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP {
                TyId::TOP
            } else if let Some(bits) = g.tys.as_double_con_bits(t) {
                g.tys.double_con(-f64::from_bits(bits))
            } else {
                TyId::DOUBLE
            }
        }

        NodeOp::LCmpV | NodeOp::CmpL => {
            let (ta, tb) = (g.ty(g.input(n, 1)), g.ty(g.input(n, 2)));
            if ta == TyId::TOP || tb == TyId::TOP {
                return TyId::TOP;
            }
            let a = g.tys.long_range(ta).unwrap_or(LongRange::FULL);
            let b = g.tys.long_range(tb).unwrap_or(LongRange::FULL);
            if a.hi < b.lo {
                g.tys.int_con(-1)
            } else if a.lo > b.hi {
                g.tys.int_con(1)
            } else if a.is_con() && b.is_con() {
                g.tys.int_con(0)
            } else {
                TyId::INT_CC
            }
        }
        NodeOp::DCmpL | NodeOp::DCmpG => {
            let (ta, tb) = (g.ty(g.input(n, 1)), g.ty(g.input(n, 2)));
            if ta == TyId::TOP || tb == TyId::TOP {
                return TyId::TOP;
            }
            match (g.tys.as_double_con_bits(ta), g.tys.as_double_con_bits(tb)) {
                (Some(xb), Some(yb)) => {
                    let (x, y) = (f64::from_bits(xb), f64::from_bits(yb));
                    let cc = if x.is_nan() || y.is_nan() {
                        if matches!(op, NodeOp::DCmpL) { -1 } else { 1 }
                    } else if x < y {
                        -1
                    } else if x > y {
                        1
                    } else {
                        0
                    };
                    g.tys.int_con(cc)
                }
                _ => TyId::INT_CC,
            }
        }

        NodeOp::ConvI2L => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP {
                return TyId::TOP;
            }
            let r = g.tys.int_range(t).unwrap_or(IntRange::FULL);
            g.tys.intern(TyData::Long(LongRange {
                lo: i64::from(r.lo),
                hi: i64::from(r.hi),
                widen: r.widen,
            }))
        }
        NodeOp::ConvL2I => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP {
                return TyId::TOP;
            }
            let r = g.tys.long_range(t).unwrap_or(LongRange::FULL);
            if let Some(v) = g.tys.as_long_con(t) {
                return g.tys.int_con(v as i32);
            }
            if r.lo >= i64::from(i32::MIN) && r.hi <= i64::from(i32::MAX) {
                return g.tys.intern(TyData::Int(IntRange {
                    lo: r.lo as i32,
                    hi: r.hi as i32,
                    widen: r.widen,
                }));
            }
            TyId::INT
        }
        NodeOp::ConvI2D => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP {
                TyId::TOP
            } else if let Some(v) = g.tys.as_int_con(t) {
                g.tys.double_con(f64::from(v))
            } else {
                TyId::DOUBLE
            }
        }
        NodeOp::ConvL2D => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP {
                TyId::TOP
            } else if let Some(v) = g.tys.as_long_con(t) {
                g.tys.double_con(v as f64)
            } else {
                TyId::DOUBLE
            }
        }
        NodeOp::ConvD2I => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP {
                TyId::TOP
            } else if let Some(bits) = g.tys.as_double_con_bits(t) {
                // `as` saturates and maps NaN to zero, matching the
                // bytecode's d2i.
                g.tys.int_con(f64::from_bits(bits) as i32)
            } else {
                TyId::INT
            }
        }
        NodeOp::ConvD2L => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP {
                TyId::TOP
            } else if let Some(bits) = g.tys.as_double_con_bits(t) {
                g.tys.long_con(f64::from_bits(bits) as i64)
            } else {
                TyId::LONG
            }
        }

        NodeOp::CmpI => int_bin(g, n, |p, a, b| {
            if a.hi < b.lo {
                p_int_con(p, -1)
            } else if a.lo > b.hi {
                p_int_con(p, 1)
            } else if a.is_con() && b.is_con() {
                p_int_con(p, 0)
            } else {
                TyId::INT_CC
            }
        }),
        NodeOp::CmpU => int_bin(g, n, |p, a, b| {
            if a.is_con() && b.is_con() {
                let (x, y) = (a.lo as u32, b.lo as u32);
                return p_int_con(p, if x < y { -1 } else { i32::from(x > y) });
            }
            if a.lo >= 0 && b.lo >= 0 {
                if a.hi < b.lo {
                    return p_int_con(p, -1);
                }
                if a.lo > b.hi {
                    return p_int_con(p, 1);
                }
            }
            TyId::INT_CC
        }),
        NodeOp::CmpP => {
            let (ta, tb) = (g.ty(g.input(n, 1)), g.ty(g.input(n, 2)));
            if ta == TyId::TOP || tb == TyId::TOP {
                return TyId::TOP;
            }
            let a_null = ta == TyId::NULL;
            let b_null = tb == TyId::NULL;
            if a_null && b_null {
                return g.tys.int_con(0);
            }
            let a_ref = g.tys.ref_data(ta);
            let b_ref = g.tys.ref_data(tb);
            if (a_null && matches!(b_ref, Some(r) if !r.may_null))
                || (b_null && matches!(a_ref, Some(r) if !r.may_null))
            {
                return g.tys.int_con(1);
            }
            TyId::INT_BOOL
        }
        NodeOp::Bool(test) => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP {
                return TyId::TOP;
            }
            let r = g.tys.int_range(t).unwrap_or(IntRange { lo: -1, hi: 1, widen: 0 });
            let (mut can_t, mut can_f) = (false, false);
            for cc in r.lo.max(-1)..=r.hi.min(1) {
                if test.eval(cc) {
                    can_t = true;
                } else {
                    can_f = true;
                }
            }
            match (can_t, can_f) {
                (true, false) => g.tys.int_con(1),
                (false, true) => g.tys.int_con(0),
                _ => TyId::INT_BOOL,
            }
        }

        NodeOp::Phi(_) => {
            let region = g.input(n, 0);
            if region.is_none() || !ctrl_live(g.ty(region)) {
                return TyId::TOP;
            }
            let mut acc = TyId::TOP;
            for i in 1..g.inputs(n).len() {
                let pred = g.input(region, i - 1);
                if pred.is_none() || g.is_dead(pred) || !ctrl_live(g.ty(pred)) {
                    continue;
                }
                let v = g.input(n, i);
                if v.is_none() {
                    continue;
                }
                let vt = g.ty(v);
                acc = g.tys.meet(acc, vt);
            }
            acc
        }
        NodeOp::MemPhi(_) => {
            let region = g.input(n, 0);
            if region.is_none() || !ctrl_live(g.ty(region)) {
                TyId::MEM_TOP
            } else {
                TyId::MEM
            }
        }
        NodeOp::MinI => int_bin(g, n, |p, a, b| {
            make_int(p, i64::from(a.lo.min(b.lo)), i64::from(a.hi.min(b.hi)), wmax(a, b))
        }),
        NodeOp::MaxI => int_bin(g, n, |p, a, b| {
            make_int(p, i64::from(a.lo.max(b.lo)), i64::from(a.hi.max(b.hi)), wmax(a, b))
        }),
        NodeOp::CastII(bound) => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP {
                TyId::TOP
            } else {
                g.tys.join(t, bound)
            }
        }
        // Opaque hides its input from every pass until it is stripped.
        NodeOp::Opaque1 => TyId::INT,

        NodeOp::StoreArr(_) | NodeOp::StoreGlobal(_) => {
            let c = g.input(n, 0);
            if c.is_some() && !ctrl_live(g.ty(c)) {
                TyId::MEM_TOP
            } else {
                TyId::MEM
            }
        }
        NodeOp::LoadArr(ak) => {
            let mem = g.ty(g.input(n, 1));
            if mem == TyId::TOP || mem == TyId::MEM_TOP {
                return TyId::TOP;
            }
            elem_bottom(ak)
        }
        NodeOp::ArrayLen => {
            let t = g.ty(g.input(n, 1));
            if t == TyId::TOP || t == TyId::NULL {
                return TyId::TOP;
            }
            match g.tys.ref_data(t) {
                Some(r) => g.tys.intern(TyData::Int(r.len)),
                None => g.tys.int(0, i32::MAX),
            }
        }
        NodeOp::NewArr(ak) => {
            let c = g.input(n, 0);
            if c.is_some() && !ctrl_live(g.ty(c)) {
                return TyId::TOP;
            }
            let lt = g.ty(g.input(n, 2));
            if lt == TyId::TOP {
                return TyId::TOP;
            }
            let lr = g.tys.int_range(lt).unwrap_or(IntRange::FULL);
            let lo = lr.lo.max(0);
            let hi = lr.hi.max(lo);
            let rt = g.tys.array_ref(ak, IntRange { lo, hi, widen: lr.widen }, false);
            g.tys.tuple(&[rt, TyId::MEM])
        }
        NodeOp::Proj(i) => {
            let t = g.ty(g.input(n, 0));
            if t == TyId::TOP {
                TyId::TOP
            } else {
                g.tys.tuple_elem(t, i as usize)
            }
        }
    }
}

fn ctrl_live(t: TyId) -> bool {
    t != TyId::CTRL_TOP && t != TyId::TOP
}

fn branch_proj(g: &mut Graph, n: NodeId, elem: usize) -> TyId {
    let t = g.ty(g.input(n, 0));
    if t == TyId::TOP || t == TyId::CTRL_TOP {
        return TyId::CTRL_TOP;
    }
    match g.tys.get(t) {
        TyData::Tuple(_) => g.tys.tuple_elem(t, elem),
        _ => TyId::CTRL,
    }
}

fn elem_bottom(ak: ArrayKind) -> TyId {
    match ak {
        ArrayKind::I32 => TyId::INT,
        ArrayKind::I64 => TyId::LONG,
        ArrayKind::F64 => TyId::DOUBLE,
    }
}

fn int_bin(
    g: &mut Graph,
    n: NodeId,
    f: impl Fn(&mut anvil_ir::TyPool, IntRange, IntRange) -> TyId,
) -> TyId {
    let (ta, tb) = (g.ty(g.input(n, 1)), g.ty(g.input(n, 2)));
    if ta == TyId::TOP || tb == TyId::TOP {
        return TyId::TOP;
    }
    let a = g.tys.int_range(ta).unwrap_or(IntRange::FULL);
    let b = g.tys.int_range(tb).unwrap_or(IntRange::FULL);
    f(&mut g.tys, a, b)
}

fn long_bin(
    g: &mut Graph,
    n: NodeId,
    f: impl Fn(&mut anvil_ir::TyPool, LongRange, LongRange) -> TyId,
) -> TyId {
    let (ta, tb) = (g.ty(g.input(n, 1)), g.ty(g.input(n, 2)));
    if ta == TyId::TOP || tb == TyId::TOP {
        return TyId::TOP;
    }
    let a = g.tys.long_range(ta).unwrap_or(LongRange::FULL);
    let b = g.tys.long_range(tb).unwrap_or(LongRange::FULL);
    f(&mut g.tys, a, b)
}

fn double_bin(g: &mut Graph, n: NodeId, f: impl Fn(f64, f64) -> f64) -> TyId {
    let (ta, tb) = (g.ty(g.input(n, 1)), g.ty(g.input(n, 2)));
    if ta == TyId::TOP || tb == TyId::TOP {
        return TyId::TOP;
    }
    match (g.tys.as_double_con_bits(ta), g.tys.as_double_con_bits(tb)) {
        (Some(xb), Some(yb)) => {
            let r = f(f64::from_bits(xb), f64::from_bits(yb));
            g.tys.double_con(r)
        }
        _ => TyId::DOUBLE,
    }
}

fn p_int_con(p: &mut anvil_ir::TyPool, v: i32) -> TyId {
    p.int_con(v)
}

fn p_long_con(p: &mut anvil_ir::TyPool, v: i64) -> TyId {
    p.long_con(v)
}

fn make_int(p: &mut anvil_ir::TyPool, lo: i64, hi: i64, widen: u8) -> TyId {
    if lo >= i64::from(i32::MIN) && hi <= i64::from(i32::MAX) {
        p.intern(TyData::Int(IntRange { lo: lo as i32, hi: hi as i32, widen }))
    } else {
        TyId::INT
    }
}

fn make_long(p: &mut anvil_ir::TyPool, lo: i128, hi: i128, widen: u8) -> TyId {
    if lo >= i128::from(i64::MIN) && hi <= i128::from(i64::MAX) {
        p.intern(TyData::Long(LongRange { lo: lo as i64, hi: hi as i64, widen }))
    } else {
        TyId::LONG
    }
}

/// Bitwise or/xor of two nonnegative ranges stays under the covering mask.
fn nonneg_mask(p: &mut anvil_ir::TyPool, a: IntRange, b: IntRange) -> TyId {
    if a.lo >= 0 && b.lo >= 0 {
        let m = fill_bits(a.hi.max(b.hi));
        return make_int(p, 0, i64::from(m), wmax(a, b));
    }
    TyId::INT
}

/// Smallest all-ones mask covering `v` (`v >= 0`).
fn fill_bits(v: i32) -> i32 {
    let mut x = v as u32;
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    x as i32
}

fn wmax(a: IntRange, b: IntRange) -> u8 {
    a.widen.max(b.widen)
}

fn lwmax(a: LongRange, b: LongRange) -> u8 {
    a.widen.max(b.widen)
}

fn min_max(c: &[i64; 4]) -> (i64, i64) {
    let mut lo = c[0];
    let mut hi = c[0];
    for &v in &c[1..] {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (lo, hi)
}

fn min_max_l(c: &[i128; 4]) -> (i128, i128) {
    let mut lo = c[0];
    let mut hi = c[0];
    for &v in &c[1..] {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (lo, hi)
}

/// Truncating division with the two's-complement wrap at `MIN / -1`.
fn java_div_i(a: i32, b: i32) -> i32 {
    if b == 0 {
        return 0; // caller excludes zero divisors
    }
    a.wrapping_div(b)
}

fn java_div_l(a: i64, b: i64) -> i64 {
    if b == 0 {
        return 0;
    }
    a.wrapping_div(b)
}
