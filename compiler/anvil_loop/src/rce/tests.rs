use anvil_bc::{ArrayKind, Insn, Kind, Method, Module};
use anvil_deopt::Reason;
use anvil_ir::{Graph, NodeId, NodeOp};
use anvil_opt::IterGvn;
use anvil_parse::{build, BuildOpts, NoProfile};
use pretty_assertions::assert_eq;

use super::{apply, find, Off};
use crate::body::LoopBody;
use crate::counted::recognize;
use crate::split::insert_pre_post;
use crate::tree::{natural_loop, LoopTree};

fn graph(params: Vec<Kind>, ret: Option<Kind>, max_locals: u16, code: Vec<Insn>) -> Graph {
    let mut module = Module::new("t");
    let mid = module.push_method(Method {
        name: "f".into(),
        params,
        ret,
        max_locals,
        code,
    });
    let mut g = build(&module, mid, &NoProfile, BuildOpts::default()).unwrap();
    let mut igvn = IterGvn::new();
    igvn.optimize(&mut g).unwrap();
    g
}

// s = 0; for (i = 0; i < n; i++) s += a[i]; return s;
// a sits in local 0, n in 1, i in 2, s in 3.
fn sum_array() -> Graph {
    graph(
        vec![Kind::Ref(ArrayKind::I32), Kind::I32],
        Some(Kind::I32),
        4,
        vec![
            Insn::IConst(0),
            Insn::IStore(2),
            Insn::IConst(0),
            Insn::IStore(3),
            Insn::ILoad(2), // 4: head
            Insn::ILoad(1),
            Insn::IfICmpGe(18),
            Insn::ILoad(3),
            Insn::ALoad(0),
            Insn::ILoad(2),
            Insn::IALoad,
            Insn::IAdd,
            Insn::IStore(3),
            Insn::ILoad(2),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(2),
            Insn::Goto(4),
            Insn::ILoad(3), // 18
            Insn::IRet,
        ],
    )
}

fn one_loop(g: &Graph) -> (NodeId, LoopBody) {
    let tree = LoopTree::compute(g);
    assert_eq!(tree.loops.len(), 1);
    let l = &tree.loops[0];
    let body = LoopBody::collect(g, l.head, &l.members);
    (l.head, body)
}

fn count(g: &Graph, pred: impl Fn(&NodeOp) -> bool) -> usize {
    g.live_ids().filter(|&n| pred(g.op(n))).count()
}

#[test]
fn plain_index_matches_with_no_offset() {
    let g = sum_array();
    let (head, body) = one_loop(&g);
    let c = recognize(&g, head, &body).unwrap();

    let checks = find(&g, &c, &body);
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].scale, 1);
    assert_eq!(checks[0].off, Off::Zero);
    assert_eq!(*g.op(checks[0].len), NodeOp::ArrayLen);
    assert!(!body.contains(checks[0].len), "length is loop invariant");
}

#[test]
fn applied_checks_leave_the_main_loop() {
    let mut g = sum_array();
    let (head, body) = one_loop(&g);
    let c = recognize(&g, head, &body).unwrap();
    let checks = find(&g, &c, &body);
    assert_eq!(checks.len(), 1);

    let mut igvn = IterGvn::new();
    let split = insert_pre_post(&mut g, &mut igvn, &c, &body);
    let members = natural_loop(&g, head, g.input(head, 1));
    let body = LoopBody::collect(&g, head, &members);
    let c = recognize(&g, head, &body).unwrap();

    assert_eq!(apply(&mut g, &mut igvn, &c, &split, &checks), 1);
    igvn.run(&mut g).unwrap();

    // The pre and post copies keep their traps; the main one is gone.
    assert_eq!(
        count(&g, |op| matches!(op, NodeOp::Trap(Reason::RangeCheck))),
        2
    );
    assert_eq!(count(&g, |op| matches!(op, NodeOp::LoopHead(_))), 3);

    // Pre stops at the clamped raise, main at the lowered limit.
    let pre_limit = g.input(split.pre_cmp, c.limit_slot);
    assert_eq!(*g.op(pre_limit), NodeOp::MinI);
    assert_eq!(*g.op(g.input(split.main_opq, 1)), NodeOp::MinI);
}

#[test]
fn unknown_offset_is_left_alone() {
    // for (i = 0; i < n; i++) s += a[i + j]; -- j unbounded.
    let mut g = graph(
        vec![Kind::Ref(ArrayKind::I32), Kind::I32, Kind::I32],
        Some(Kind::I32),
        5,
        vec![
            Insn::IConst(0),
            Insn::IStore(3),
            Insn::IConst(0),
            Insn::IStore(4),
            Insn::ILoad(3), // 4: head
            Insn::ILoad(1),
            Insn::IfICmpGe(20),
            Insn::ILoad(4),
            Insn::ALoad(0),
            Insn::ILoad(3),
            Insn::ILoad(2),
            Insn::IAdd,
            Insn::IALoad,
            Insn::IAdd,
            Insn::IStore(4),
            Insn::ILoad(3),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(3),
            Insn::Goto(4),
            Insn::ILoad(4), // 20
            Insn::IRet,
        ],
    );
    let (head, body) = one_loop(&g);
    let c = recognize(&g, head, &body).unwrap();
    let checks = find(&g, &c, &body);
    assert_eq!(checks.len(), 1);
    assert!(matches!(checks[0].off, Off::Node(_)));

    let mut igvn = IterGvn::new();
    let split = insert_pre_post(&mut g, &mut igvn, &c, &body);
    let members = natural_loop(&g, head, g.input(head, 1));
    let body = LoopBody::collect(&g, head, &members);
    let c = recognize(&g, head, &body).unwrap();

    // Neither bound is provable from a full-range offset.
    assert_eq!(apply(&mut g, &mut igvn, &c, &split, &checks), 0);
    igvn.run(&mut g).unwrap();
    assert_eq!(
        count(&g, |op| matches!(op, NodeOp::Trap(Reason::RangeCheck))),
        3
    );
}
