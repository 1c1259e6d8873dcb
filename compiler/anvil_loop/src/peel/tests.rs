use anvil_bc::{Insn, Kind, Method, Module};
use anvil_ir::{Graph, NodeOp, PhiKind};
use anvil_opt::IterGvn;
use anvil_parse::{build, BuildOpts, NoProfile};
use pretty_assertions::assert_eq;

use super::peel;
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

fn count(g: &Graph, pred: impl Fn(&NodeOp) -> bool) -> usize {
    g.live_ids().filter(|&n| pred(g.op(n))).count()
}

#[test]
fn peeling_runs_the_first_iteration_ahead() {
    // i = 0; while (i < n) i += 1; return i;
    let mut g = graph(
        vec![Kind::I32],
        Some(Kind::I32),
        2,
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
        ],
    );
    let (head, body) = one_loop(&g);
    let iv = body.phis[0];

    let mut igvn = IterGvn::new();
    assert!(peel(&mut g, &mut igvn, head, &body));
    igvn.run(&mut g).unwrap();

    // The loop restarts after one executed iteration.
    assert_eq!(*g.op(g.input(iv, 1)), NodeOp::ConI(1));
    // Entry, loop backedge, and the peeled copy's backedge.
    assert_eq!(count(&g, |op| matches!(op, NodeOp::Safepoint)), 3);

    // The exit merges the peeled test with the loop's; the returned value
    // picks zero when the loop never runs at all.
    let ret = g
        .inputs(g.stop())
        .iter()
        .copied()
        .find(|&e| matches!(g.op(e), NodeOp::Return))
        .unwrap();
    let v = g.input(ret, 1);
    assert_eq!(*g.op(v), NodeOp::Phi(PhiKind::I32));
    assert!(matches!(g.op(g.input(v, 0)), NodeOp::Region));
    assert_eq!(*g.op(g.input(v, 1)), NodeOp::ConI(0));
    assert_eq!(g.input(v, 2), iv);
}

#[test]
fn two_merge_exits_block_peeling() {
    // while (i < n) { if (q != 0) break; i += 1 }
    let mut g = graph(
        vec![Kind::I32, Kind::I32],
        Some(Kind::I32),
        3,
        vec![
            Insn::IConst(0),
            Insn::IStore(2),
            Insn::ILoad(2),
            Insn::ILoad(0),
            Insn::IfICmpGe(12),
            Insn::ILoad(1),
            Insn::IfNe(12),
            Insn::ILoad(2),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(2),
            Insn::Goto(2),
            Insn::ILoad(2),
            Insn::IRet,
        ],
    );
    let (head, body) = one_loop(&g);

    let mut igvn = IterGvn::new();
    assert!(!peel(&mut g, &mut igvn, head, &body));
    assert_eq!(count(&g, |op| matches!(op, NodeOp::LoopHead(_))), 1);
    assert_eq!(count(&g, |op| matches!(op, NodeOp::Safepoint)), 2);
}
