use pretty_assertions::assert_eq;

use crate::graph::{Graph, NodeId};
use crate::node::{BoolTest, LoopFlavor, NodeOp};

use super::{preds, succs, Cfg};

/// start -> if -> (then | else) -> merge -> return
fn diamond() -> (Graph, NodeId, NodeId, NodeId, NodeId) {
    let mut g = Graph::new(0);
    let p = g.add(NodeOp::Param(0), &[g.start()]);
    let zero = g.add(NodeOp::ConI(0), &[]);
    let cmp = g.add(NodeOp::CmpI, &[NodeId::NONE, p, zero]);
    let cond = g.add(NodeOp::Bool(BoolTest::Lt), &[NodeId::NONE, cmp]);
    let iff = g.add(NodeOp::If, &[g.start(), cond]);
    let t = g.add(NodeOp::IfTrue, &[iff]);
    let f = g.add(NodeOp::IfFalse, &[iff]);
    let merge = g.add(NodeOp::Region, &[t, f]);
    let ret = g.add(NodeOp::Return, &[merge, p]);
    g.add_exit(ret);
    (g, iff, t, f, merge)
}

#[test]
fn diamond_edges() {
    let (g, iff, t, f, merge) = diamond();
    assert_eq!(succs(&g, g.start()), [iff].into());
    let mut branch_succs = succs(&g, iff).to_vec();
    branch_succs.sort();
    let mut expect = vec![t, f];
    expect.sort();
    assert_eq!(branch_succs, expect);
    assert_eq!(preds(&g, merge).to_vec(), vec![t, f]);
}

#[test]
fn diamond_dominators() {
    let (g, iff, t, f, merge) = diamond();
    let cfg = Cfg::compute(&g);
    assert_eq!(cfg.idom(t), Some(iff));
    assert_eq!(cfg.idom(f), Some(iff));
    assert_eq!(cfg.idom(merge), Some(iff), "merge is dominated by the branch");
    assert!(cfg.dominates(g.start(), merge));
    assert!(!cfg.dominates(t, merge));
    assert!(cfg.dom_depth(merge) > cfg.dom_depth(iff));
}

#[test]
fn rpo_orders_idom_first() {
    let (g, _, _, _, _) = diamond();
    let cfg = Cfg::compute(&g);
    for &n in &cfg.rpo {
        if n == g.start() {
            continue;
        }
        let idom = cfg.idom(n).unwrap();
        assert!(cfg.rpo_index(idom).unwrap() < cfg.rpo_index(n).unwrap());
    }
}

#[test]
fn control_flows_through_a_call_projection() {
    use anvil_bc::MethodId;

    let mut g = Graph::new(0);
    let p = g.add(NodeOp::Param(0), &[g.start()]);
    let call = g.add(
        NodeOp::CallStatic { mid: MethodId(1), argc: 1 },
        &[g.start(), p],
    );
    let cproj = g.add(NodeOp::Proj(0), &[call]);
    let rproj = g.add(NodeOp::Proj(1), &[call]);
    let ret = g.add(NodeOp::Return, &[cproj, rproj]);
    g.add_exit(ret);

    assert_eq!(succs(&g, g.start()), [call].into());
    assert_eq!(succs(&g, call), [ret].into());
    assert_eq!(preds(&g, ret).to_vec(), vec![call]);

    let cfg = Cfg::compute(&g);
    assert!(cfg.is_reachable(ret));
    assert_eq!(cfg.idom(ret), Some(call));
}

#[test]
fn loop_head_dominates_body() {
    let mut g = Graph::new(0);
    // start -> head <-> body, head -> exit
    let head = g.add(NodeOp::LoopHead(LoopFlavor::Plain), &[g.start(), NodeId::NONE]);
    let ten = g.add(NodeOp::ConI(10), &[]);
    let zero = g.add(NodeOp::ConI(0), &[]);
    let i = g.add(NodeOp::Phi(crate::node::PhiKind::I32), &[head, zero, NodeId::NONE]);
    let cmp = g.add(NodeOp::CmpI, &[NodeId::NONE, i, ten]);
    let cond = g.add(NodeOp::Bool(BoolTest::Lt), &[NodeId::NONE, cmp]);
    let iff = g.add(NodeOp::If, &[head, cond]);
    let body = g.add(NodeOp::IfTrue, &[iff]);
    let exit = g.add(NodeOp::IfFalse, &[iff]);
    let one = g.add(NodeOp::ConI(1), &[]);
    let next = g.add(NodeOp::AddI, &[NodeId::NONE, i, one]);
    g.set_input(i, 2, next);
    g.set_input(head, 1, body);
    let ret = g.add(NodeOp::Return, &[exit, i]);
    g.add_exit(ret);

    let cfg = Cfg::compute(&g);
    assert!(cfg.is_reachable(body));
    assert_eq!(cfg.idom(body), Some(iff));
    assert_eq!(cfg.idom(head), Some(g.start()), "backedge does not disturb idom");
    assert!(cfg.dominates(head, exit));
}
