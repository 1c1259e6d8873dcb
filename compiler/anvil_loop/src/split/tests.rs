use anvil_bc::{Insn, Kind, Method, Module};
use anvil_ir::{Graph, LoopFlavor, NodeId, NodeOp};
use anvil_opt::IterGvn;
use anvil_parse::{build, BuildOpts, NoProfile};
use pretty_assertions::assert_eq;

use super::{insert_pre_post, unroll};
use crate::body::LoopBody;
use crate::counted::recognize;
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

// i = 0; s = 0; while (i < 100) { s += i; i += 1 } return s;
fn sum_loop() -> Graph {
    graph(
        vec![],
        Some(Kind::I32),
        2,
        vec![
            Insn::IConst(0),
            Insn::IStore(0),
            Insn::IConst(0),
            Insn::IStore(1),
            Insn::ILoad(0), // 4: head
            Insn::IConst(100),
            Insn::IfICmpGe(16),
            Insn::ILoad(1),
            Insn::ILoad(0),
            Insn::IAdd,
            Insn::IStore(1),
            Insn::ILoad(0),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(0),
            Insn::Goto(4),
            Insn::ILoad(1), // 16
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

fn return_value(g: &Graph) -> NodeId {
    let ret = g
        .inputs(g.stop())
        .iter()
        .copied()
        .find(|&e| matches!(g.op(e), NodeOp::Return))
        .unwrap();
    g.input(ret, 1)
}

#[test]
fn splitting_yields_pre_main_and_post() {
    let mut g = sum_loop();
    let (head, body) = one_loop(&g);
    let c = recognize(&g, head, &body).unwrap();
    let exit_proj = c.exit_proj;
    let cmp = c.cmp;
    let limit_slot = c.limit_slot;

    let mut igvn = IterGvn::new();
    let split = insert_pre_post(&mut g, &mut igvn, &c, &body);

    assert_eq!(*g.op(split.pre_head), NodeOp::LoopHead(LoopFlavor::Pre));
    assert_eq!(*g.op(head), NodeOp::LoopHead(LoopFlavor::Main));
    assert_eq!(*g.op(split.post_head), NodeOp::LoopHead(LoopFlavor::Post));

    // Main enters through the pre loop's exit and tests an opaque limit.
    let entry = g.input(head, 0);
    assert_eq!(g.input(g.input(entry, 0), 0), split.pre_head);
    assert_eq!(g.input(cmp, limit_slot), split.main_opq);
    assert_eq!(*g.op(split.main_opq), NodeOp::Opaque1);

    // Post enters through the main exit and starts from the main phis.
    assert_eq!(g.input(split.post_head, 0), exit_proj);
    let post_phi = g
        .outputs(split.post_head)
        .iter()
        .copied()
        .find(|&p| matches!(g.op(p), NodeOp::Phi(_)))
        .unwrap();
    assert!(body.phis.contains(&g.input(post_phi, 1)));

    // The returned sum now flows out of the post loop.
    assert_eq!(g.input(return_value(&g), 0), split.post_head);

    igvn.run(&mut g).unwrap();
    assert_eq!(count(&g, |op| matches!(op, NodeOp::LoopHead(_))), 3);
}

#[test]
fn unrolling_doubles_the_main_body() {
    let mut g = sum_loop();
    let (head, body) = one_loop(&g);
    let c = recognize(&g, head, &body).unwrap();

    let mut igvn = IterGvn::new();
    let split = insert_pre_post(&mut g, &mut igvn, &c, &body);

    let members = natural_loop(&g, head, g.input(head, 1));
    let body = LoopBody::collect(&g, head, &members);
    let c = recognize(&g, head, &body).unwrap();
    assert_eq!(c.limit, split.main_opq);
    assert!(unroll(&mut g, &mut igvn, &c, &body));

    // Two increments chained per trip, one stride less headroom.
    let bv = g.input(c.iv, 2);
    assert_eq!(*g.op(bv), NodeOp::AddI);
    assert_eq!(*g.op(g.input(bv, 1)), NodeOp::AddI);
    assert_eq!(*g.op(g.input(split.main_opq, 1)), NodeOp::SubI);

    // Entry, pre backedge, two main backedges, post backedge.
    assert_eq!(count(&g, |op| matches!(op, NodeOp::Safepoint)), 5);

    igvn.run(&mut g).unwrap();
    assert_eq!(count(&g, |op| matches!(op, NodeOp::LoopHead(_))), 3);
}
