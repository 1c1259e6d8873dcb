use anvil_bc::{Insn, Kind, Method, Module};
use anvil_ir::{Graph, NodeOp};
use anvil_parse::{build, BuildOpts, NoProfile};
use pretty_assertions::assert_eq;

use super::LoopTree;

fn graph(params: Vec<Kind>, ret: Option<Kind>, max_locals: u16, code: Vec<Insn>) -> Graph {
    let mut module = Module::new("t");
    let mid = module.push_method(Method {
        name: "f".into(),
        params,
        ret,
        max_locals,
        code,
    });
    build(&module, mid, &NoProfile, BuildOpts::default()).unwrap()
}

#[test]
fn straight_line_code_has_no_loops() {
    let g = graph(
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![Insn::ILoad(0), Insn::IConst(1), Insn::IAdd, Insn::IRet],
    );
    let tree = LoopTree::compute(&g);
    assert!(tree.loops.is_empty());
}

#[test]
fn single_loop_collects_its_members() {
    // i = 0; while (i < 10) i += 1; return i;
    let g = graph(
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
    );
    let tree = LoopTree::compute(&g);
    assert_eq!(tree.loops.len(), 1);

    let l = &tree.loops[0];
    assert_eq!(*g.op(l.head), NodeOp::LoopHead(anvil_ir::LoopFlavor::Plain));
    assert_eq!(l.depth, 1);
    assert!(l.parent.is_none());
    assert!(l.backedge.is_some());
    assert!(l.members.contains(&l.head));
    assert!(l.members.contains(&l.backedge), "backedge safepoint is a member");
    assert_eq!(tree.loop_depth(l.head), 1);
}

#[test]
fn nested_loops_nest_in_the_tree() {
    // for (i = 0; i < 3; i++) for (j = 0; j < 3; j++) {}
    let g = graph(
        vec![],
        Some(Kind::I32),
        2,
        vec![
            Insn::IConst(0),
            Insn::IStore(0),
            Insn::ILoad(0), // 2: outer head
            Insn::IConst(3),
            Insn::IfICmpGe(20),
            Insn::IConst(0),
            Insn::IStore(1),
            Insn::ILoad(1), // 7: inner head
            Insn::IConst(3),
            Insn::IfICmpGe(15),
            Insn::ILoad(1),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(1),
            Insn::Goto(7),
            Insn::ILoad(0), // 15
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(0),
            Insn::Goto(2),
            Insn::ILoad(0), // 20
            Insn::IRet,
        ],
    );
    let tree = LoopTree::compute(&g);
    assert_eq!(tree.loops.len(), 2);

    let inner = tree.loops.iter().position(|l| l.depth == 2).unwrap();
    let outer = tree.loops.iter().position(|l| l.depth == 1).unwrap();
    assert_eq!(tree.loops[inner].parent, Some(outer));
    assert_eq!(tree.loops[outer].children, vec![inner]);
    assert!(tree.loops[outer].members.contains(&tree.loops[inner].head));
    assert_eq!(tree.innermost_first()[0], inner);
    assert_eq!(tree.loop_depth(tree.loops[inner].head), 2);
}
