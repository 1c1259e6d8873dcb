//! Hash-consing value numbering, used both at parse time and inside the
//! iterative fixpoint.

use anvil_ir::{Graph, NodeId, NodeOp, TyData, TyId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::identity::identity;
use crate::value::value;

type Key = (NodeOp, SmallVec<[NodeId; 4]>);

/// Value-numbering table keyed by (op, canonicalized inputs).
#[derive(Default)]
pub struct Gvn {
    table: FxHashMap<Key, NodeId>,
}

impl Gvn {
    pub fn new() -> Gvn {
        Gvn::default()
    }

    /// Type the node, then try to replace it: a materialized constant, an
    /// algebraic identity, or a hash-cons hit. Returns the surviving node.
    pub fn transform(&mut self, g: &mut Graph, n: NodeId) -> NodeId {
        let t = value(g, n);
        g.set_ty(n, t);

        if !g.op(n).is_con() {
            if let Some(c) = self.con_node(g, t) {
                if c != n {
                    return c;
                }
            }
        }

        let i = identity(g, n);
        if i != n {
            return i;
        }

        if Self::hashable(g.op(n)) {
            let key = Self::key(g, n);
            if let Some(&m) = self.table.get(&key) {
                // Entries go stale when a node's inputs are rewritten;
                // verify before trusting a hit.
                if m != n && !g.is_dead(m) && Self::key(g, m) == key {
                    return m;
                }
            }
            self.table.insert(key, n);
        }
        n
    }

    /// An existing (or fresh) constant node for a constant type.
    pub fn con_node(&mut self, g: &mut Graph, t: TyId) -> Option<NodeId> {
        let op = match g.tys.get(t) {
            TyData::Int(r) if r.is_con() => NodeOp::ConI(r.lo),
            TyData::Long(r) if r.is_con() => NodeOp::ConL(r.lo),
            TyData::DoubleCon(bits) => NodeOp::ConD(*bits),
            TyData::Null => NodeOp::ConNull,
            _ => return None,
        };
        let key: Key = (op, SmallVec::new());
        if let Some(&c) = self.table.get(&key) {
            if !g.is_dead(c) {
                return Some(c);
            }
        }
        let c = g.add(op, &[]);
        g.set_ty(c, t);
        self.table.insert(key, c);
        Some(c)
    }

    fn key(g: &Graph, n: NodeId) -> Key {
        let op = *g.op(n);
        let mut inputs: SmallVec<[NodeId; 4]> = SmallVec::from_slice(g.inputs(n));
        if op.is_commutative() && inputs.len() == 3 && inputs[1] > inputs[2] {
            inputs.swap(1, 2);
        }
        (op, inputs)
    }

    /// Projections may merge; other control stays distinct, as do
    /// allocations (two `NewArr` are different arrays) and opaques.
    fn hashable(op: &NodeOp) -> bool {
        if matches!(op, NodeOp::IfTrue | NodeOp::IfFalse | NodeOp::Proj(_)) {
            return true;
        }
        !op.is_cfg() && !matches!(op, NodeOp::NewArr(_) | NodeOp::Opaque1)
    }
}
