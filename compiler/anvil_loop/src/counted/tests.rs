use anvil_bc::{Insn, Kind, Method, Module};
use anvil_deopt::Reason;
use anvil_ir::{BoolTest, Graph, NodeOp};
use anvil_opt::IterGvn;
use anvil_parse::{build, BuildOpts, NoProfile};
use pretty_assertions::assert_eq;

use super::{exact_trip_count, final_iv, insert_limit_predicate, overflow_bound, recognize};
use crate::body::LoopBody;
use crate::tree::LoopTree;

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

fn one_loop(g: &Graph) -> (anvil_ir::NodeId, LoopBody) {
    let tree = LoopTree::compute(g);
    assert_eq!(tree.loops.len(), 1);
    let l = &tree.loops[0];
    let body = LoopBody::collect(g, l.head, &l.members);
    (l.head, body)
}

// i = 0; while (i < limit) i += stride; return i;
fn count_up(limit: Insn, stride: i32) -> Vec<Insn> {
    vec![
        Insn::IConst(0),
        Insn::IStore(0),
        Insn::ILoad(0),
        limit,
        Insn::IfICmpGe(10),
        Insn::ILoad(0),
        Insn::IConst(stride),
        Insn::IAdd,
        Insn::IStore(0),
        Insn::Goto(2),
        Insn::ILoad(0),
        Insn::IRet,
    ]
}

#[test]
fn upward_constant_loop_is_recognized() {
    let g = graph(vec![], Some(Kind::I32), 1, count_up(Insn::IConst(10), 1));
    let (head, body) = one_loop(&g);
    let c = recognize(&g, head, &body).unwrap();

    assert_eq!(c.head, head);
    assert_eq!(c.stride, 1);
    assert_eq!(c.test, BoolTest::Lt);
    assert_eq!(*g.op(c.init), NodeOp::ConI(0));
    assert_eq!(exact_trip_count(&g, &c), Some(10));
    assert_eq!(final_iv(&g, &c), Some(10));
    assert!(overflow_bound(&g, &c).is_none(), "constant limit cannot overflow");
}

#[test]
fn downward_loop_counts_its_trips() {
    // i = 10; while (i > 0) i -= 1;
    let g = graph(
        vec![],
        Some(Kind::I32),
        1,
        vec![
            Insn::IConst(10),
            Insn::IStore(0),
            Insn::ILoad(0),
            Insn::IConst(0),
            Insn::IfICmpLe(10),
            Insn::ILoad(0),
            Insn::IConst(-1),
            Insn::IAdd,
            Insn::IStore(0),
            Insn::Goto(2),
            Insn::ILoad(0),
            Insn::IRet,
        ],
    );
    let (head, body) = one_loop(&g);
    let c = recognize(&g, head, &body).unwrap();

    assert_eq!(c.stride, -1);
    assert_eq!(c.test, BoolTest::Gt);
    assert_eq!(exact_trip_count(&g, &c), Some(10));
    assert_eq!(final_iv(&g, &c), Some(0));
}

#[test]
fn varying_limit_is_not_counted() {
    // while (i != j) { i += 1; j -= 1 } -- both sides vary.
    let g = graph(
        vec![Kind::I32, Kind::I32],
        Some(Kind::I32),
        2,
        vec![
            Insn::ILoad(0),
            Insn::ILoad(1),
            Insn::IfICmpEq(12),
            Insn::ILoad(0),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(0),
            Insn::ILoad(1),
            Insn::IConst(-1),
            Insn::IAdd,
            Insn::IStore(1),
            Insn::Goto(0),
            Insn::ILoad(0),
            Insn::IRet,
        ],
    );
    let (head, body) = one_loop(&g);
    assert!(recognize(&g, head, &body).is_none());
}

#[test]
fn unknown_trip_count_stays_unknown() {
    let g = graph(vec![Kind::I32], Some(Kind::I32), 2, {
        // i = 0; while (i < n) i += 1;
        vec![
            Insn::IConst(0),
            Insn::IStore(1),
            Insn::ILoad(1),
            Insn::ILoad(0),
            Insn::IfICmpGe(10),
            Insn::ILoad(1),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(1),
            Insn::Goto(2),
            Insn::ILoad(1),
            Insn::IRet,
        ]
    });
    let (head, body) = one_loop(&g);
    let c = recognize(&g, head, &body).unwrap();

    assert_eq!(exact_trip_count(&g, &c), None);
    // Stride one with a strict bound never overflows.
    assert!(overflow_bound(&g, &c).is_none());
}

#[test]
fn inclusive_bound_needs_a_limit_predicate() {
    // i = 0; while (i <= n) i += 1; -- n == MAX would wrap i.
    let mut g = graph(vec![Kind::I32], Some(Kind::I32), 2, {
        vec![
            Insn::IConst(0),
            Insn::IStore(1),
            Insn::ILoad(1),
            Insn::ILoad(0),
            Insn::IfICmpGt(10),
            Insn::ILoad(1),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(1),
            Insn::Goto(2),
            Insn::ILoad(1),
            Insn::IRet,
        ]
    });
    let (head, body) = one_loop(&g);
    let c = recognize(&g, head, &body).unwrap();
    assert_eq!(c.test, BoolTest::Le);
    assert_eq!(overflow_bound(&g, &c), Some(i32::MAX - 1));

    let mut igvn = IterGvn::new();
    assert!(insert_limit_predicate(&mut g, &mut igvn, &c, i32::MAX - 1, true));
    igvn.run(&mut g).unwrap();

    let trap = g
        .live_ids()
        .find(|&n| matches!(g.op(n), NodeOp::Trap(Reason::LoopLimitCheck)))
        .unwrap();
    assert!(g.frames.contains_key(&trap), "predicate trap can rebuild a frame");
    // The loop now sits under the predicate's in-bounds projection.
    assert_eq!(*g.op(g.input(head, 0)), NodeOp::IfTrue);

    // The narrowed limit makes a second predicate unnecessary.
    let members = crate::tree::natural_loop(&g, head, g.input(head, 1));
    let body = LoopBody::collect(&g, head, &members);
    let c = recognize(&g, head, &body).unwrap();
    assert!(overflow_bound(&g, &c).is_none());
}
