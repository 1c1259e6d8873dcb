use pretty_assertions::assert_eq;

use anvil_bc::ArrayKind;
use anvil_ir::{BoolTest, Graph, NodeId, NodeOp, PhiKind, Slice, TyId};

use crate::value::value;

use super::IterGvn;

/// Type every node in construction order, the way the parser's GVN would
/// have; the iterative pass assumes sound starting types.
fn type_all(g: &mut Graph) {
    let ids: Vec<NodeId> = g.live_ids().collect();
    for id in ids {
        let t = value(g, id);
        g.set_ty(id, t);
    }
}

fn ret_value(g: &Graph) -> NodeId {
    let ret = g.inputs(g.stop())[0];
    g.input(ret, 1)
}

fn optimized(mut g: Graph) -> Graph {
    type_all(&mut g);
    let mut igvn = IterGvn::new();
    igvn.optimize(&mut g).unwrap();
    g
}

#[test]
fn folds_constant_arithmetic() {
    let mut g = Graph::new(0);
    let a = g.add(NodeOp::ConI(2), &[]);
    let b = g.add(NodeOp::ConI(3), &[]);
    let add = g.add(NodeOp::AddI, &[NodeId::NONE, a, b]);
    let ret = g.add(NodeOp::Return, &[g.start(), add]);
    g.add_exit(ret);

    let g = optimized(g);
    assert_eq!(*g.op(ret_value(&g)), NodeOp::ConI(5));
}

#[test]
fn add_zero_is_identity() {
    let mut g = Graph::new(0);
    let p = g.add(NodeOp::Param(0), &[g.start()]);
    g.set_ty(p, TyId::INT);
    let z = g.add(NodeOp::ConI(0), &[]);
    let add = g.add(NodeOp::AddI, &[NodeId::NONE, p, z]);
    let ret = g.add(NodeOp::Return, &[g.start(), add]);
    g.add_exit(ret);

    let g = optimized(g);
    assert_eq!(ret_value(&g), p);
}

#[test]
fn commutative_operands_value_number_together() {
    let mut g = Graph::new(0);
    let p = g.add(NodeOp::Param(0), &[g.start()]);
    g.set_ty(p, TyId::INT);
    let q = g.add(NodeOp::Param(1), &[g.start()]);
    g.set_ty(q, TyId::INT);
    let r1 = g.add(NodeOp::AddI, &[NodeId::NONE, p, q]);
    let r2 = g.add(NodeOp::AddI, &[NodeId::NONE, q, p]);
    let sum = g.add(NodeOp::XorI, &[NodeId::NONE, r1, r2]);
    let ret = g.add(NodeOp::Return, &[g.start(), sum]);
    g.add_exit(ret);

    let g = optimized(g);
    // x ^ x over the merged adds folds all the way to zero.
    assert_eq!(*g.op(ret_value(&g)), NodeOp::ConI(0));
}

#[test]
fn reassociates_constant_adds() {
    let mut g = Graph::new(0);
    let p = g.add(NodeOp::Param(0), &[g.start()]);
    g.set_ty(p, TyId::INT);
    let one = g.add(NodeOp::ConI(1), &[]);
    let two = g.add(NodeOp::ConI(2), &[]);
    let a1 = g.add(NodeOp::AddI, &[NodeId::NONE, p, one]);
    let a2 = g.add(NodeOp::AddI, &[NodeId::NONE, a1, two]);
    let ret = g.add(NodeOp::Return, &[g.start(), a2]);
    g.add_exit(ret);

    let g = optimized(g);
    let v = ret_value(&g);
    assert_eq!(*g.op(v), NodeOp::AddI);
    assert_eq!(g.input(v, 1), p);
    assert_eq!(*g.op(g.input(v, 2)), NodeOp::ConI(3));
}

#[test]
fn multiply_by_power_of_two_becomes_shift() {
    let mut g = Graph::new(0);
    let p = g.add(NodeOp::Param(0), &[g.start()]);
    g.set_ty(p, TyId::INT);
    let eight = g.add(NodeOp::ConI(8), &[]);
    let mul = g.add(NodeOp::MulI, &[NodeId::NONE, p, eight]);
    let ret = g.add(NodeOp::Return, &[g.start(), mul]);
    g.add_exit(ret);

    let g = optimized(g);
    let v = ret_value(&g);
    assert_eq!(*g.op(v), NodeOp::ShlI);
    assert_eq!(*g.op(g.input(v, 2)), NodeOp::ConI(3));
}

#[test]
fn subtracting_self_is_zero() {
    let mut g = Graph::new(0);
    let p = g.add(NodeOp::Param(0), &[g.start()]);
    g.set_ty(p, TyId::INT);
    let sub = g.add(NodeOp::SubI, &[NodeId::NONE, p, p]);
    let ret = g.add(NodeOp::Return, &[g.start(), sub]);
    g.add_exit(ret);

    let g = optimized(g);
    assert_eq!(*g.op(ret_value(&g)), NodeOp::ConI(0));
}

#[test]
fn long_compare_against_zero_fuses() {
    let mut g = Graph::new(0);
    let p = g.add(NodeOp::Param(0), &[g.start()]);
    g.set_ty(p, TyId::LONG);
    let q = g.add(NodeOp::Param(1), &[g.start()]);
    g.set_ty(q, TyId::LONG);
    let lcmp = g.add(NodeOp::LCmpV, &[NodeId::NONE, p, q]);
    let z = g.add(NodeOp::ConI(0), &[]);
    let cmp = g.add(NodeOp::CmpI, &[NodeId::NONE, lcmp, z]);
    let b = g.add(NodeOp::Bool(BoolTest::Lt), &[NodeId::NONE, cmp]);
    let ret = g.add(NodeOp::Return, &[g.start(), b]);
    g.add_exit(ret);

    let g = optimized(g);
    let v = ret_value(&g);
    assert_eq!(*g.op(v), NodeOp::Bool(BoolTest::Lt));
    assert_eq!(*g.op(g.input(v, 1)), NodeOp::CmpL);
}

#[test]
fn forwards_store_to_load() {
    let mut g = Graph::new(0);
    let arr = g.add(NodeOp::Param(0), &[g.start()]);
    let at = g.tys.array_ref(
        ArrayKind::I32,
        anvil_ir::IntRange { lo: 0, hi: i32::MAX, widen: 0 },
        false,
    );
    g.set_ty(arr, at);
    let idx = g.add(NodeOp::Param(1), &[g.start()]);
    g.set_ty(idx, TyId::INT);
    let val = g.add(NodeOp::Param(2), &[g.start()]);
    g.set_ty(val, TyId::INT);
    let mem0 = g.add(NodeOp::InitMem(Slice::Elem(ArrayKind::I32)), &[g.start()]);
    let store = g.add(NodeOp::StoreArr(ArrayKind::I32), &[g.start(), mem0, arr, idx, val]);
    let load = g.add(NodeOp::LoadArr(ArrayKind::I32), &[g.start(), store, arr, idx]);
    let ret = g.add(NodeOp::Return, &[g.start(), load, store]);
    g.add_exit(ret);

    let g = optimized(g);
    assert_eq!(ret_value(&g), val, "load reads the just-stored value");
}

#[test]
fn eliminates_overwritten_store() {
    let mut g = Graph::new(0);
    let arr = g.add(NodeOp::Param(0), &[g.start()]);
    let at = g.tys.array_ref(
        ArrayKind::I32,
        anvil_ir::IntRange { lo: 0, hi: i32::MAX, widen: 0 },
        false,
    );
    g.set_ty(arr, at);
    let idx = g.add(NodeOp::Param(1), &[g.start()]);
    g.set_ty(idx, TyId::INT);
    let v1 = g.add(NodeOp::ConI(1), &[]);
    let v2 = g.add(NodeOp::ConI(2), &[]);
    let mem0 = g.add(NodeOp::InitMem(Slice::Elem(ArrayKind::I32)), &[g.start()]);
    let s1 = g.add(NodeOp::StoreArr(ArrayKind::I32), &[g.start(), mem0, arr, idx, v1]);
    let s2 = g.add(NodeOp::StoreArr(ArrayKind::I32), &[g.start(), s1, arr, idx, v2]);
    let z = g.add(NodeOp::ConI(0), &[]);
    let ret = g.add(NodeOp::Return, &[g.start(), z, s2]);
    g.add_exit(ret);

    let g = optimized(g);
    assert_eq!(g.input(s2, 1), mem0, "surviving store bypasses the dead one");
    assert!(g.is_dead(s1));
}

#[test]
fn constant_branch_collapses_merge() {
    let mut g = Graph::new(0);
    let one = g.add(NodeOp::ConI(1), &[]);
    let iff = g.add(NodeOp::If, &[g.start(), one]);
    let t = g.add(NodeOp::IfTrue, &[iff]);
    let f = g.add(NodeOp::IfFalse, &[iff]);
    let merge = g.add(NodeOp::Region, &[t, f]);
    let ten = g.add(NodeOp::ConI(10), &[]);
    let twenty = g.add(NodeOp::ConI(20), &[]);
    let phi = g.add(NodeOp::Phi(PhiKind::I32), &[merge, ten, twenty]);
    let ret = g.add(NodeOp::Return, &[merge, phi]);
    g.add_exit(ret);

    let g = optimized(g);
    assert_eq!(*g.op(ret_value(&g)), NodeOp::ConI(10), "true path wins");
    assert!(g.is_dead(merge) || !matches!(g.op(g.input(ret, 0)), NodeOp::Region));
}
