use anvil_bc::{ArrayKind, Insn, Kind, Method, MethodId, MethodProfile, Module};
use anvil_deopt::{Dependency, Reason};
use anvil_ir::{Graph, NodeId, NodeOp, PhiKind, RaiseKind};
use pretty_assertions::assert_eq;

use super::{build, BuildOpts};
use crate::profile_source::{NoProfile, ProfileSource};

fn method(name: &str, params: Vec<Kind>, ret: Option<Kind>, max_locals: u16, code: Vec<Insn>) -> Method {
    Method {
        name: name.into(),
        params,
        ret,
        max_locals,
        code,
    }
}

fn one_method(m: Method) -> (Module, MethodId) {
    let mut module = Module::new("t");
    let mid = module.push_method(m);
    (module, mid)
}

fn find(g: &Graph, pred: impl Fn(&NodeOp) -> bool) -> Option<NodeId> {
    g.live_ids().find(|&n| pred(g.op(n)))
}

fn count(g: &Graph, pred: impl Fn(&NodeOp) -> bool) -> usize {
    g.live_ids().filter(|&n| pred(g.op(n))).count()
}

fn returns(g: &Graph) -> Vec<NodeId> {
    g.inputs(g.stop())
        .iter()
        .copied()
        .filter(|&e| matches!(g.op(e), NodeOp::Return))
        .collect()
}

#[test]
fn straight_line_arithmetic_folds_while_parsing() {
    let (module, mid) = one_method(method(
        "f",
        vec![],
        Some(Kind::I32),
        0,
        vec![Insn::IConst(2), Insn::IConst(3), Insn::IAdd, Insn::IRet],
    ));
    let g = build(&module, mid, &NoProfile, BuildOpts::default()).unwrap();

    let rets = returns(&g);
    assert_eq!(rets.len(), 1);
    let v = g.input(rets[0], 1);
    assert_eq!(*g.op(v), NodeOp::ConI(5));
    assert_eq!(count(&g, |op| matches!(op, NodeOp::AddI)), 0);
}

#[test]
fn diamond_merges_stack_values_with_a_phi() {
    let (module, mid) = one_method(method(
        "f",
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![
            Insn::ILoad(0),
            Insn::IfGt(4),
            Insn::IConst(10),
            Insn::Goto(5),
            Insn::IConst(20),
            Insn::IRet,
        ],
    ));
    let g = build(&module, mid, &NoProfile, BuildOpts::default()).unwrap();

    let rets = returns(&g);
    assert_eq!(rets.len(), 1);
    let v = g.input(rets[0], 1);
    assert_eq!(*g.op(v), NodeOp::Phi(PhiKind::I32));
    assert!(matches!(g.op(g.input(v, 0)), NodeOp::Region));
    assert_eq!(g.inputs(v).len(), 3);
}

#[test]
fn loop_builds_head_phi_and_backedge_safepoint() {
    // i = 0; while (i < 10) i += 1; return i;
    let (module, mid) = one_method(method(
        "f",
        vec![],
        Some(Kind::I32),
        1,
        vec![
            Insn::IConst(0),
            Insn::IStore(0),
            Insn::ILoad(0),
            Insn::IConst(10),
            Insn::IfICmpGe(10),
            Insn::ILoad(0),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(0),
            Insn::Goto(2),
            Insn::ILoad(0),
            Insn::IRet,
        ],
    ));
    let g = build(&module, mid, &NoProfile, BuildOpts::default()).unwrap();

    let head = find(&g, |op| matches!(op, NodeOp::LoopHead(_))).unwrap();
    assert!(g.input(head, 1).is_some(), "backedge must be wired");

    let phi = find(&g, |op| matches!(op, NodeOp::Phi(PhiKind::I32))).unwrap();
    assert_eq!(g.input(phi, 0), head);
    assert_eq!(g.inputs(phi).len(), 3);
    assert_eq!(*g.op(g.input(phi, 1)), NodeOp::ConI(0));
    assert_eq!(*g.op(g.input(phi, 2)), NodeOp::AddI);

    // One safepoint above the loop, one on the backedge.
    assert_eq!(count(&g, |op| matches!(op, NodeOp::Safepoint)), 2);
    assert!(g.frames.len() >= 2);
}

#[test]
fn array_load_guards_null_then_range() {
    let (module, mid) = one_method(method(
        "f",
        vec![Kind::Ref(ArrayKind::I32)],
        Some(Kind::I32),
        1,
        vec![Insn::ALoad(0), Insn::IConst(3), Insn::IALoad, Insn::IRet],
    ));
    let g = build(&module, mid, &NoProfile, BuildOpts::default()).unwrap();

    assert!(find(&g, |op| matches!(op, NodeOp::Trap(Reason::NullCheck))).is_some());
    assert!(find(&g, |op| matches!(op, NodeOp::Trap(Reason::RangeCheck))).is_some());
    assert!(find(&g, |op| matches!(op, NodeOp::RangeCheck)).is_some());

    let load = find(&g, |op| matches!(op, NodeOp::LoadArr(ArrayKind::I32))).unwrap();
    assert!(g.input(load, 0).is_some(), "load is pinned below its checks");
}

#[test]
fn division_is_guarded_and_pinned() {
    let (module, mid) = one_method(method(
        "f",
        vec![Kind::I32, Kind::I32],
        Some(Kind::I32),
        2,
        vec![Insn::ILoad(0), Insn::ILoad(1), Insn::IDiv, Insn::IRet],
    ));
    let g = build(&module, mid, &NoProfile, BuildOpts::default()).unwrap();

    assert!(find(&g, |op| matches!(op, NodeOp::Trap(Reason::DivZeroCheck))).is_some());
    let div = find(&g, |op| matches!(op, NodeOp::DivI)).unwrap();
    assert!(g.input(div, 0).is_some());
}

struct AlwaysRaise;

impl ProfileSource for AlwaysRaise {
    fn profile(&self, _mid: MethodId) -> Option<&MethodProfile> {
        None
    }
    fn too_many_traps(&self, _mid: MethodId, _bci: u32, _reason: Reason) -> bool {
        true
    }
    fn method_version(&self, _mid: MethodId) -> u32 {
        0
    }
}

#[test]
fn trap_hysteresis_switches_to_explicit_slow_path() {
    let (module, mid) = one_method(method(
        "f",
        vec![Kind::I32, Kind::I32],
        Some(Kind::I32),
        2,
        vec![Insn::ILoad(0), Insn::ILoad(1), Insn::IDiv, Insn::IRet],
    ));
    let g = build(&module, mid, &AlwaysRaise, BuildOpts::default()).unwrap();

    assert!(find(&g, |op| matches!(op, NodeOp::Raise(RaiseKind::DivByZero))).is_some());
    assert!(find(&g, |op| matches!(op, NodeOp::Trap(Reason::DivZeroCheck))).is_none());
}

struct OneProfile {
    mid: MethodId,
    profile: MethodProfile,
}

impl ProfileSource for OneProfile {
    fn profile(&self, mid: MethodId) -> Option<&MethodProfile> {
        (mid == self.mid).then_some(&self.profile)
    }
    fn too_many_traps(&self, _mid: MethodId, _bci: u32, _reason: Reason) -> bool {
        false
    }
    fn method_version(&self, _mid: MethodId) -> u32 {
        0
    }
}

#[test]
fn never_taken_branch_parses_into_uncommon_trap() {
    let (module, mid) = one_method(method(
        "f",
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![
            Insn::ILoad(0),
            Insn::IfGt(4),
            Insn::IConst(1),
            Insn::IRet,
            Insn::IConst(2),
            Insn::IRet,
        ],
    ));
    let mut profile = MethodProfile::default();
    for _ in 0..200 {
        profile.record_branch(1, false);
    }
    let g = build(&module, mid, &OneProfile { mid, profile }, BuildOpts::default()).unwrap();

    assert!(find(&g, |op| matches!(op, NodeOp::Trap(Reason::Unreached))).is_some());
    assert_eq!(returns(&g).len(), 1, "pruned side emits no return");
}

#[test]
fn small_callee_is_inlined() {
    let mut module = Module::new("t");
    let callee = module.push_method(method(
        "add1",
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![Insn::ILoad(0), Insn::IConst(1), Insn::IAdd, Insn::IRet],
    ));
    let caller = module.push_method(method(
        "f",
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![Insn::ILoad(0), Insn::Call(callee.raw()), Insn::IRet],
    ));
    let g = build(&module, caller, &NoProfile, BuildOpts::default()).unwrap();

    assert_eq!(count(&g, |op| matches!(op, NodeOp::CallStatic { .. })), 0);
    let rets = returns(&g);
    assert_eq!(rets.len(), 1);
    assert_eq!(*g.op(g.input(rets[0], 1)), NodeOp::AddI);
    assert!(g
        .deps
        .iter()
        .any(|d| matches!(d, Dependency::MethodBody { mid, .. } if *mid == callee)));
}

#[test]
fn oversized_callee_stays_a_call() {
    let mut module = Module::new("t");
    let mut big = Vec::new();
    for _ in 0..20 {
        big.push(Insn::IConst(1));
        big.push(Insn::Pop);
    }
    big.push(Insn::IConst(7));
    big.push(Insn::IRet);
    let callee = module.push_method(method("big", vec![], Some(Kind::I32), 0, big));
    let caller = module.push_method(method(
        "f",
        vec![],
        Some(Kind::I32),
        0,
        vec![Insn::Call(callee.raw()), Insn::IRet],
    ));
    let g = build(&module, caller, &NoProfile, BuildOpts::default()).unwrap();

    let call = find(&g, |op| matches!(op, NodeOp::CallStatic { .. })).unwrap();
    assert!(g.proj(call, 0).is_some(), "control projection");
    assert!(g.proj(call, 1).is_some(), "result projection");
    assert!(g.frames.contains_key(&call));
}

#[test]
fn recursive_callee_is_not_inlined() {
    let mut module = Module::new("t");
    // fib-shaped self call; must parse as a CallStatic, not recurse forever.
    let m = module.push_method(method(
        "r",
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![Insn::ILoad(0), Insn::Call(0), Insn::IRet],
    ));
    let g = build(&module, m, &NoProfile, BuildOpts::default()).unwrap();
    assert_eq!(count(&g, |op| matches!(op, NodeOp::CallStatic { .. })), 1);
}

#[test]
fn node_budget_is_enforced() {
    let (module, mid) = one_method(method(
        "f",
        vec![Kind::I32, Kind::I32],
        Some(Kind::I32),
        2,
        vec![
            Insn::ILoad(0),
            Insn::ILoad(1),
            Insn::IAdd,
            Insn::ILoad(0),
            Insn::IMul,
            Insn::ILoad(1),
            Insn::ISub,
            Insn::IRet,
        ],
    ));
    let opts = BuildOpts {
        node_budget: 4,
        ..BuildOpts::default()
    };
    let err = build(&module, mid, &NoProfile, opts).unwrap_err();
    assert_eq!(err, crate::BuildError::NodeBudget { limit: 4 });
}

#[test]
fn empty_body_is_rejected() {
    let (module, mid) = one_method(method("f", vec![], None, 0, vec![]));
    let err = build(&module, mid, &NoProfile, BuildOpts::default()).unwrap_err();
    assert_eq!(err, crate::BuildError::MalformedBody { mid: mid.raw() });
}

#[test]
fn globals_flow_through_their_own_memory_slice() {
    let mut module = Module::new("t");
    let gi = module.push_global(anvil_bc::Global {
        name: "g".into(),
        kind: Kind::I32,
        init: anvil_bc::Value::I32(0),
    });
    let mid = module.push_method(method(
        "f",
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![
            Insn::ILoad(0),
            Insn::SetGlobal(gi),
            Insn::GetGlobal(gi),
            Insn::IRet,
        ],
    ));
    let g = build(&module, mid, &NoProfile, BuildOpts::default()).unwrap();

    // The read sits directly on the write's memory state (the fixpoint
    // pass forwards it later).
    let rets = returns(&g);
    assert_eq!(rets.len(), 1);
    let v = g.input(rets[0], 1);
    assert!(matches!(g.op(v), NodeOp::LoadGlobal(i) if *i == gi));
    let store = find(&g, |op| matches!(op, NodeOp::StoreGlobal(i) if *i == gi)).unwrap();
    assert_eq!(g.input(v, 1), store);
    // The store stays: the return consumes its memory slice.
    assert!(g.inputs(rets[0]).contains(&store));
}
