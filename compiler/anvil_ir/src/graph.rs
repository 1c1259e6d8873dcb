//! The node arena and its edge bookkeeping.

use std::fmt;

use anvil_deopt::{Dependency, FrameDesc};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::node::{NodeFlags, NodeOp, Slice};
use crate::ty::{TyId, TyPool};

/// Index of a node in its [`Graph`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Sentinel for an absent edge (an unpinned control slot).
    pub const NONE: NodeId = NodeId(u32::MAX);

    #[inline]
    pub fn from_raw(raw: u32) -> NodeId {
        NodeId(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == NodeId::NONE
    }

    #[inline]
    pub fn is_some(self) -> bool {
        self != NodeId::NONE
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "n_")
        } else {
            write!(f, "n{}", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One node: operation, ordered inputs, unordered uses, lattice type.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub op: NodeOp,
    pub inputs: SmallVec<[NodeId; 4]>,
    /// Uses, as a multiset; order is not meaningful.
    pub outputs: SmallVec<[NodeId; 4]>,
    pub ty: TyId,
    pub flags: NodeFlags,
}

/// A whole-method sea-of-nodes graph.
///
/// Nodes are append-only; killed nodes stay in the arena with the `DEAD`
/// flag set and empty edge lists. Side tables carry the frame states of
/// safepoint-class nodes and the dependencies the graph was built under.
pub struct Graph {
    nodes: Vec<NodeInfo>,
    pub tys: TyPool,
    /// Frame state for `Safepoint`, `Trap` and `CallStatic` nodes.
    pub frames: FxHashMap<NodeId, FrameDesc>,
    /// Assumptions baked into this graph (inlined bodies, pruned paths).
    pub deps: Vec<Dependency>,
    start: NodeId,
    stop: NodeId,
    n_globals: u16,
}

impl Graph {
    pub fn new(n_globals: u16) -> Graph {
        let mut g = Graph {
            nodes: Vec::with_capacity(64),
            tys: TyPool::new(),
            frames: FxHashMap::default(),
            deps: Vec::new(),
            start: NodeId::NONE,
            stop: NodeId::NONE,
            n_globals,
        };
        g.start = g.add(NodeOp::Start, &[]);
        g.set_ty(g.start, TyId::CTRL);
        g.stop = g.add(NodeOp::Stop, &[]);
        g.set_ty(g.stop, TyId::CTRL);
        g
    }

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    #[inline]
    pub fn stop(&self) -> NodeId {
        self.stop
    }

    #[inline]
    pub fn n_globals(&self) -> u16 {
        self.n_globals
    }

    /// Number of memory slices in this graph.
    #[inline]
    pub fn n_slices(&self) -> usize {
        Slice::count(self.n_globals)
    }

    /// Arena size, dead nodes included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Count of live nodes.
    pub fn live_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.flags.contains(NodeFlags::DEAD))
            .count()
    }

    /// All live node ids, in arena order.
    pub fn live_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, n)| {
            if n.flags.contains(NodeFlags::DEAD) {
                None
            } else {
                Some(NodeId::from_raw(u32::try_from(i).unwrap_or(u32::MAX)))
            }
        })
    }

    /// Append a node. `NodeId::NONE` inputs are recorded but not linked.
    pub fn add(&mut self, op: NodeOp, inputs: &[NodeId]) -> NodeId {
        let id = NodeId::from_raw(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(NodeInfo {
            op,
            inputs: SmallVec::from_slice(inputs),
            outputs: SmallVec::new(),
            ty: TyId::TOP,
            flags: NodeFlags::empty(),
        });
        for &inp in inputs {
            if inp.is_some() {
                self.nodes[inp.index()].outputs.push(id);
            }
        }
        id
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> &NodeOp {
        &self.nodes[id.index()].op
    }

    pub fn set_op(&mut self, id: NodeId, op: NodeOp) {
        self.nodes[id.index()].op = op;
    }

    #[inline]
    pub fn ty(&self, id: NodeId) -> TyId {
        self.nodes[id.index()].ty
    }

    #[inline]
    pub fn set_ty(&mut self, id: NodeId, ty: TyId) {
        self.nodes[id.index()].ty = ty;
    }

    #[inline]
    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].inputs
    }

    #[inline]
    pub fn input(&self, id: NodeId, i: usize) -> NodeId {
        self.nodes[id.index()].inputs[i]
    }

    #[inline]
    pub fn outputs(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].outputs
    }

    #[inline]
    pub fn is_dead(&self, id: NodeId) -> bool {
        self.nodes[id.index()].flags.contains(NodeFlags::DEAD)
    }

    #[inline]
    pub fn flags(&self, id: NodeId) -> NodeFlags {
        self.nodes[id.index()].flags
    }

    pub fn set_flag(&mut self, id: NodeId, flag: NodeFlags) {
        self.nodes[id.index()].flags.insert(flag);
    }

    pub fn clear_flag(&mut self, id: NodeId, flag: NodeFlags) {
        self.nodes[id.index()].flags.remove(flag);
    }

    /// Rewrite input slot `i` of `id`, keeping use lists consistent.
    pub fn set_input(&mut self, id: NodeId, i: usize, new: NodeId) {
        let old = self.nodes[id.index()].inputs[i];
        if old == new {
            return;
        }
        if old.is_some() {
            Self::remove_one_output(&mut self.nodes[old.index()].outputs, id);
        }
        self.nodes[id.index()].inputs[i] = new;
        if new.is_some() {
            self.nodes[new.index()].outputs.push(id);
        }
    }

    /// Append an input slot (region predecessors, phi operands).
    pub fn add_input(&mut self, id: NodeId, new: NodeId) {
        self.nodes[id.index()].inputs.push(new);
        if new.is_some() {
            self.nodes[new.index()].outputs.push(id);
        }
    }

    /// Remove input slot `i`, shifting later slots down.
    pub fn remove_input(&mut self, id: NodeId, i: usize) {
        let old = self.nodes[id.index()].inputs.remove(i);
        if old.is_some() {
            Self::remove_one_output(&mut self.nodes[old.index()].outputs, id);
        }
    }

    /// Redirect every use of `old` to `new` and kill `old`. Returns the
    /// affected users so the caller can requeue them.
    pub fn subsume(&mut self, old: NodeId, new: NodeId) -> Vec<NodeId> {
        debug_assert_ne!(old, new);
        let mut touched = Vec::new();
        while let Some(user) = self.nodes[old.index()].outputs.pop() {
            let mut replaced = 0;
            for slot in self.nodes[user.index()].inputs.iter_mut() {
                if *slot == old {
                    *slot = new;
                    replaced += 1;
                }
            }
            for _ in 0..replaced {
                self.nodes[new.index()].outputs.push(user);
            }
            touched.push(user);
        }
        self.kill(old);
        touched
    }

    /// Mark a node dead and unlink it from its inputs. The node must have
    /// no remaining uses.
    pub fn kill(&mut self, id: NodeId) {
        debug_assert!(self.nodes[id.index()].outputs.is_empty(), "killing a used node");
        let inputs = std::mem::take(&mut self.nodes[id.index()].inputs);
        for inp in inputs {
            if inp.is_some() {
                Self::remove_one_output(&mut self.nodes[inp.index()].outputs, id);
            }
        }
        self.nodes[id.index()].flags.insert(NodeFlags::DEAD);
        self.nodes[id.index()].ty = TyId::TOP;
        self.frames.remove(&id);
    }

    /// Kill `id` and transitively any input left useless by that.
    pub fn kill_rec(&mut self, id: NodeId) {
        let mut work = vec![id];
        while let Some(n) = work.pop() {
            if self.is_dead(n) || !self.nodes[n.index()].outputs.is_empty() {
                continue;
            }
            let inputs: Vec<NodeId> = self.nodes[n.index()].inputs.to_vec();
            self.kill(n);
            for inp in inputs {
                if inp.is_some()
                    && !self.is_dead(inp)
                    && self.nodes[inp.index()].outputs.is_empty()
                    && !self.op(inp).is_always_live()
                {
                    work.push(inp);
                }
            }
        }
    }

    fn remove_one_output(outputs: &mut SmallVec<[NodeId; 4]>, user: NodeId) {
        if let Some(pos) = outputs.iter().position(|&o| o == user) {
            outputs.swap_remove(pos);
        }
    }

    /// The single use of `id` matching `pred`, if any.
    pub fn find_out(&self, id: NodeId, pred: impl Fn(&NodeOp) -> bool) -> Option<NodeId> {
        self.outputs(id).iter().copied().find(|&o| pred(self.op(o)))
    }

    /// The `IfTrue` projection of a branch.
    pub fn if_true(&self, iff: NodeId) -> Option<NodeId> {
        self.find_out(iff, |op| matches!(op, NodeOp::IfTrue))
    }

    /// The `IfFalse` projection of a branch.
    pub fn if_false(&self, iff: NodeId) -> Option<NodeId> {
        self.find_out(iff, |op| matches!(op, NodeOp::IfFalse))
    }

    /// Projection `idx` of a multi-value node.
    pub fn proj(&self, of: NodeId, idx: u32) -> Option<NodeId> {
        self.find_out(of, |op| matches!(op, NodeOp::Proj(i) if *i == idx))
    }

    /// Record an exit (`Return`, `Trap`, `Raise`) as a `Stop` input.
    pub fn add_exit(&mut self, exit: NodeId) {
        let stop = self.stop;
        self.add_input(stop, exit);
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("live", &self.live_count())
            .field("n_globals", &self.n_globals)
            .finish()
    }
}
