//! Loop body collection and cloning.
//!
//! Cloning works on a node set plus a seed map: seeded nodes are replaced
//! by existing nodes instead of copied, everything else in the set is
//! duplicated with inputs remapped through the combined mapping. Inputs
//! outside the set are shared (loop invariants).

use anvil_ir::{Graph, NodeId, NodeOp, PhiKind, TyData, TyId};
use rustc_hash::{FxHashMap, FxHashSet};

/// Everything a transform needs to know about one loop's body.
pub(crate) struct LoopBody {
    /// CFG members, head included.
    pub members: FxHashSet<NodeId>,
    /// Full clone set: members, their branch projections, the head phis,
    /// and every per-iteration data node.
    pub set: FxHashSet<NodeId>,
    /// Phis (and memory phis) sitting on the head.
    pub phis: Vec<NodeId>,
}

impl LoopBody {
    /// Collect the body of the loop at `head`. Per-iteration data is the
    /// forward closure of the members and head phis through data edges;
    /// phis of merges outside the loop stop the walk.
    pub(crate) fn collect(g: &Graph, head: NodeId, members: &FxHashSet<NodeId>) -> LoopBody {
        let mut set: FxHashSet<NodeId> = members.clone();
        let phis: Vec<NodeId> = g
            .outputs(head)
            .iter()
            .copied()
            .filter(|&p| {
                !g.is_dead(p)
                    && matches!(g.op(p), NodeOp::Phi(_) | NodeOp::MemPhi(_))
                    && g.input(p, 0) == head
            })
            .collect();
        set.extend(phis.iter().copied());

        // Branch projections, including ones that leave the loop. A
        // projection feeding a trap or raise drags that exit along so a
        // clone of the projection has somewhere to go.
        let mut projs = Vec::new();
        for &m in members {
            if g.op(m).is_branch() {
                for &o in g.outputs(m) {
                    if matches!(g.op(o), NodeOp::IfTrue | NodeOp::IfFalse) {
                        set.insert(o);
                        projs.push(o);
                    }
                }
            }
        }
        for p in projs {
            if members.contains(&p) {
                continue;
            }
            for &o in g.outputs(p) {
                if !g.is_dead(o) && g.op(o).is_exit() {
                    set.insert(o);
                }
            }
        }

        let mut work: Vec<NodeId> = set.iter().copied().collect();
        while let Some(n) = work.pop() {
            for &u in g.outputs(n) {
                if set.contains(&u) || g.is_dead(u) || g.op(u).is_cfg() {
                    continue;
                }
                if matches!(g.op(u), NodeOp::Phi(_) | NodeOp::MemPhi(_))
                    && !set.contains(&g.input(u, 0))
                {
                    continue; // merge outside the loop
                }
                set.insert(u);
                work.push(u);
            }
        }

        LoopBody { members: members.clone(), set, phis }
    }

    pub(crate) fn size(&self) -> usize {
        self.set.len()
    }

    pub(crate) fn contains(&self, n: NodeId) -> bool {
        self.set.contains(&n)
    }
}

/// Exit projections whose control continues past the loop, as opposed to
/// ones that end in a trap, raise or return. Transforms that duplicate the
/// body must merge these with a region.
pub(crate) fn merge_exits(g: &Graph, body: &LoopBody) -> Vec<NodeId> {
    let mut out = Vec::new();
    for &p in &body.set {
        if !matches!(g.op(p), NodeOp::IfTrue | NodeOp::IfFalse) || body.members.contains(&p) {
            continue;
        }
        let continues = g
            .outputs(p)
            .iter()
            .any(|&u| !g.is_dead(u) && g.op(u).is_cfg() && !g.op(u).is_exit());
        if continues {
            out.push(p);
        }
    }
    out.sort_unstable();
    out
}

/// Clone every node of `set` not covered by `seed`, remapping inputs
/// through seed-then-clone. Frame descriptors follow their nodes; cloned
/// exits are registered on `Stop`. Returns the full old-to-new mapping
/// (seed entries included).
pub(crate) fn clone_set(
    g: &mut Graph,
    set: &FxHashSet<NodeId>,
    seed: &FxHashMap<NodeId, NodeId>,
) -> FxHashMap<NodeId, NodeId> {
    let mut map = seed.clone();
    let originals: Vec<NodeId> = set
        .iter()
        .copied()
        .filter(|n| !seed.contains_key(n))
        .collect();
    for &n in &originals {
        let c = g.add(*g.op(n), &[]);
        let ty = g.ty(n);
        g.set_ty(c, ty);
        map.insert(n, c);
    }
    for &n in &originals {
        let c = map[&n];
        let inputs: Vec<NodeId> = g.inputs(n).to_vec();
        for inp in inputs {
            let mapped = if inp.is_some() {
                map.get(&inp).copied().unwrap_or(inp)
            } else {
                inp
            };
            g.add_input(c, mapped);
        }
        if let Some(desc) = g.frames.get(&n).cloned() {
            g.frames.insert(c, desc);
        }
        if g.op(n).is_exit() {
            g.add_exit(c);
        }
    }
    map
}

/// The merge-phi op for a loop value escaping through an exit region.
pub(crate) fn exit_phi_op(g: &Graph, d: NodeId) -> NodeOp {
    if let Some(s) = g.op(d).mem_slice(g.n_globals()) {
        if g.ty(d) == TyId::MEM {
            return NodeOp::MemPhi(s);
        }
    }
    let kind = match g.tys.get(g.ty(d)) {
        TyData::Long(_) => PhiKind::I64,
        TyData::DoubleCon(_) | TyData::Double | TyData::DoubleTop => PhiKind::F64,
        TyData::Null | TyData::Ref(_) | TyData::Bot => PhiKind::Ref,
        _ => PhiKind::I32,
    };
    NodeOp::Phi(kind)
}
