//! Global code motion: carve blocks out of the control skeleton, then give
//! every floating node a block and every block an instruction order.
//!
//! Placement is the classic two-pass scheme: `schedule_early` finds the
//! first block where a node's inputs are available (deepest dominator),
//! the late pass finds the last block that dominates every use (LCA), and
//! the final block is the cheapest one on the dominator path between the
//! two, preferring shallow loop nesting. Loads additionally take
//! anti-dependences against stores that overwrite their memory slice:
//! an interfering store either raises the load's LCA or, within one
//! block, forces the load ahead of the store in the local order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use anvil_ir::cfg::{self, Cfg};
use anvil_ir::{Graph, NodeId, NodeOp};
use anvil_loop::LoopTree;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

/// One basic block of the schedule.
pub struct Block {
    /// The CFG node opening the block (`Start`, `Region`, `LoopHead` or a
    /// branch projection).
    pub head: NodeId,
    /// All nodes of the block in execution order: head, then phis, then
    /// the body with the block's terminator last.
    pub nodes: Vec<NodeId>,
    pub preds: SmallVec<[u32; 2]>,
    pub succs: SmallVec<[u32; 2]>,
    pub loop_depth: u32,
    /// Block whose only content is a deoptimization trap; kept free of
    /// hoisted nodes so branches into it can fuse into guards.
    pub is_trap: bool,
}

/// Blocks in reverse postorder plus the node-to-block map.
pub struct Schedule {
    pub blocks: Vec<Block>,
    block_of: FxHashMap<NodeId, u32>,
}

impl Schedule {
    /// Block index of a scheduled node.
    #[inline]
    pub fn block_of(&self, n: NodeId) -> u32 {
        self.block_of[&n]
    }

    /// Plain-text dump for debugging and the CLI.
    pub fn render(&self, g: &Graph) -> String {
        use std::fmt::Write as _;
        let printer = anvil_ir::GraphPrinter::new(g);
        let mut out = String::new();
        for (i, b) in self.blocks.iter().enumerate() {
            let succs: Vec<String> = b.succs.iter().map(|s| format!("B{s}")).collect();
            let _ = writeln!(out, "B{i} depth={} -> [{}]", b.loop_depth, succs.join(" "));
            for &n in &b.nodes {
                let _ = writeln!(out, "  {}", printer.line(n));
            }
        }
        out
    }
}

fn is_head(op: &NodeOp) -> bool {
    matches!(
        op,
        NodeOp::Start
            | NodeOp::Region
            | NodeOp::LoopHead(_)
            | NodeOp::IfTrue
            | NodeOp::IfFalse
    )
}

/// A store-like node that replaces the memory state it consumes.
fn is_mem_killer(op: &NodeOp) -> bool {
    matches!(
        op,
        NodeOp::StoreArr(_)
            | NodeOp::StoreGlobal(_)
            | NodeOp::NewArr(_)
            | NodeOp::CallStatic { .. }
    )
}

fn is_load(op: &NodeOp) -> bool {
    matches!(op, NodeOp::LoadArr(_) | NodeOp::LoadGlobal(_))
}

/// Compute the full schedule of a graph.
pub fn schedule(g: &Graph) -> Schedule {
    Scheduler::new(g).run()
}

struct Scheduler<'g> {
    g: &'g Graph,
    cfg: Cfg,
    blocks: Vec<Block>,
    /// Per-block CFG chain, in control order.
    chains: Vec<Vec<NodeId>>,
    place: FxHashMap<NodeId, u32>,
}

impl<'g> Scheduler<'g> {
    fn new(g: &'g Graph) -> Scheduler<'g> {
        Scheduler {
            g,
            cfg: Cfg::compute(g),
            blocks: Vec::new(),
            chains: Vec::new(),
            place: FxHashMap::default(),
        }
    }

    fn run(mut self) -> Schedule {
        self.form_blocks();
        self.place_pinned();
        self.place_floating();
        let prec = self.anti_dep_edges();
        for b in 0..self.blocks.len() {
            let order = self.order_block(b, &prec);
            self.blocks[b].nodes = order;
        }
        Schedule { blocks: self.blocks, block_of: self.place }
    }

    // --- skeleton -----------------------------------------------------

    fn form_blocks(&mut self) {
        let g = self.g;
        let tree = LoopTree::compute(g);
        let rpo: Vec<NodeId> = self.cfg.rpo.clone();
        for &n in &rpo {
            if matches!(g.op(n), NodeOp::Stop) {
                continue;
            }
            if is_head(g.op(n)) {
                let id = u32::try_from(self.blocks.len()).unwrap_or(u32::MAX);
                self.place.insert(n, id);
                self.blocks.push(Block {
                    head: n,
                    nodes: Vec::new(),
                    preds: SmallVec::new(),
                    succs: SmallVec::new(),
                    loop_depth: tree.loop_depth(n),
                    is_trap: false,
                });
                self.chains.push(vec![n]);
            } else {
                // Chain nodes have a single predecessor, already placed
                // thanks to reverse postorder.
                let p = cfg::preds(g, n)[0];
                let b = self.place[&p];
                self.place.insert(n, b);
                self.chains[b as usize].push(n);
                if matches!(g.op(n), NodeOp::Trap(_)) {
                    self.blocks[b as usize].is_trap = true;
                }
            }
        }

        // Block edges from the CFG edges that cross blocks.
        for &n in &rpo {
            if matches!(g.op(n), NodeOp::Stop) {
                continue;
            }
            let from = self.place[&n];
            for s in cfg::succs(g, n) {
                if matches!(g.op(s), NodeOp::Stop) {
                    continue;
                }
                let to = self.place[&s];
                if to != from && !self.blocks[from as usize].succs.contains(&to) {
                    self.blocks[from as usize].succs.push(to);
                    self.blocks[to as usize].preds.push(from);
                }
            }
        }
    }

    /// Block holding a control edge's source; a call's control projection
    /// stands in for the call.
    fn ctrl_block(&self, c: NodeId) -> u32 {
        if let Some(&b) = self.place.get(&c) {
            return b;
        }
        self.place[&self.g.input(c, 0)]
    }

    // --- pinned nodes -------------------------------------------------

    fn place_pinned(&mut self) {
        let g = self.g;
        // Projections may pin to other pinned data (`NewArr`), so resolve
        // them after everything with a direct control edge.
        let mut projs = Vec::new();
        for n in g.live_ids() {
            if self.place.contains_key(&n) || matches!(g.op(n), NodeOp::Stop) {
                continue;
            }
            match g.op(n) {
                NodeOp::Proj(_) => projs.push(n),
                NodeOp::Phi(_) | NodeOp::MemPhi(_) => {
                    let b = self.ctrl_block(g.input(n, 0));
                    self.place.insert(n, b);
                }
                _ => {
                    let ctrl = g.inputs(n).first().copied().unwrap_or(NodeId::NONE);
                    if ctrl.is_some() {
                        let b = self.ctrl_block(ctrl);
                        self.place.insert(n, b);
                    }
                }
            }
        }
        for n in projs {
            let b = self.place[&g.input(n, 0)];
            self.place.insert(n, b);
        }
    }

    // --- floating nodes -----------------------------------------------

    fn dom_depth(&self, b: u32) -> u32 {
        self.cfg.dom_depth(self.blocks[b as usize].head)
    }

    fn idom_block(&self, b: u32) -> u32 {
        let head = self.blocks[b as usize].head;
        let mut c = head;
        loop {
            c = match self.cfg.idom(c) {
                Some(i) if i != c => i,
                _ => return 0,
            };
            if let Some(&pb) = self.place.get(&c) {
                if pb != b {
                    return pb;
                }
            }
        }
    }

    fn dom_lca(&self, a: Option<u32>, b: u32) -> u32 {
        let Some(mut a) = a else { return b };
        let mut b = b;
        while a != b {
            if self.dom_depth(a) >= self.dom_depth(b) {
                a = self.idom_block(a);
            } else {
                b = self.idom_block(b);
            }
        }
        a
    }

    fn place_floating(&mut self) {
        let g = self.g;
        let floating: Vec<NodeId> = g
            .live_ids()
            .filter(|&n| !self.place.contains_key(&n) && !matches!(g.op(n), NodeOp::Stop))
            .collect();
        if floating.is_empty() {
            return;
        }

        // Early: deepest dominator of the inputs, by input-order DFS.
        let mut early: FxHashMap<NodeId, u32> = FxHashMap::default();
        for &root in &floating {
            if early.contains_key(&root) {
                continue;
            }
            let mut stack = vec![(root, 0usize)];
            while let Some(&mut (n, ref mut next)) = stack.last_mut() {
                let inputs = g.inputs(n);
                if *next < inputs.len() {
                    let i = inputs[*next];
                    *next += 1;
                    if i.is_some()
                        && !self.place.contains_key(&i)
                        && !early.contains_key(&i)
                    {
                        stack.push((i, 0));
                    }
                    continue;
                }
                stack.pop();
                let mut best = 0u32;
                for &i in g.inputs(n) {
                    if i.is_none() {
                        continue;
                    }
                    let b = self
                        .place
                        .get(&i)
                        .or_else(|| early.get(&i))
                        .copied()
                        .unwrap_or(0);
                    if self.dom_depth(b) > self.dom_depth(best) {
                        best = b;
                    }
                }
                early.insert(n, best);
            }
        }

        // Late: users first, so every use already has a final block.
        let mut pending: FxHashMap<NodeId, usize> = FxHashMap::default();
        for &n in &floating {
            let count = g
                .outputs(n)
                .iter()
                .filter(|&&u| !g.is_dead(u) && !self.place.contains_key(&u))
                .count();
            pending.insert(n, count);
        }
        let mut ready: Vec<NodeId> = floating
            .iter()
            .copied()
            .filter(|n| pending[n] == 0)
            .collect();
        while let Some(n) = ready.pop() {
            let mut lca: Option<u32> = None;
            for &u in g.outputs(n) {
                if g.is_dead(u) {
                    continue;
                }
                if matches!(g.op(u), NodeOp::Phi(_) | NodeOp::MemPhi(_)) {
                    // A phi use belongs to the predecessor feeding it.
                    let region = g.input(u, 0);
                    for j in 1..g.inputs(u).len() {
                        if g.input(u, j) == n {
                            let pred = g.input(region, j - 1);
                            lca = Some(self.dom_lca(lca, self.ctrl_block(pred)));
                        }
                    }
                } else {
                    lca = Some(self.dom_lca(lca, self.place[&u]));
                }
            }
            if is_load(g.op(n)) {
                lca = self.raise_for_anti_deps(n, lca);
            }
            let e = early[&n];
            let chosen = self.hoist_to_cheaper_block(lca.unwrap_or(e), e);
            trace!(node = ?n, block = chosen, "floating node placed");
            self.place.insert(n, chosen);

            for &i in g.inputs(n) {
                if i.is_some() {
                    if let Some(c) = pending.get_mut(&i) {
                        *c -= 1;
                        if *c == 0 {
                            ready.push(i);
                        }
                    }
                }
            }
        }
    }

    /// Keep a floating load above every store that overwrites the memory
    /// state it reads.
    fn raise_for_anti_deps(&self, load: NodeId, mut lca: Option<u32>) -> Option<u32> {
        let g = self.g;
        let mem = g.input(load, 1);
        if mem.is_none() {
            return lca;
        }
        for &s in g.outputs(mem) {
            if s == load || g.is_dead(s) {
                continue;
            }
            if matches!(g.op(s), NodeOp::MemPhi(_)) {
                let region = g.input(s, 0);
                for j in 1..g.inputs(s).len() {
                    if g.input(s, j) == mem {
                        let pred = g.input(region, j - 1);
                        lca = Some(self.dom_lca(lca, self.ctrl_block(pred)));
                    }
                }
            } else if is_mem_killer(g.op(s)) {
                lca = Some(self.dom_lca(lca, self.place[&s]));
            }
        }
        lca
    }

    /// Walk the dominator path from the LCA up to the early block and pick
    /// the shallowest loop depth, latest placement on ties. Trap blocks
    /// are never candidates.
    fn hoist_to_cheaper_block(&self, lca: u32, early: u32) -> u32 {
        let mut best: Option<u32> = None;
        let mut cur = lca;
        loop {
            if !self.blocks[cur as usize].is_trap
                && best.map_or(true, |b| {
                    self.blocks[cur as usize].loop_depth < self.blocks[b as usize].loop_depth
                })
            {
                best = Some(cur);
            }
            if cur == early || cur == 0 {
                break;
            }
            cur = self.idom_block(cur);
        }
        best.unwrap_or(early)
    }

    // --- anti-dependences, same-block half ----------------------------

    /// Precedence edges `load -> store` for loads sharing a block with a
    /// store that overwrites their memory state.
    fn anti_dep_edges(&self) -> FxHashMap<NodeId, Vec<NodeId>> {
        let g = self.g;
        let mut prec: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for n in g.live_ids() {
            if !is_load(g.op(n)) {
                continue;
            }
            let mem = g.input(n, 1);
            if mem.is_none() {
                continue;
            }
            let lb = self.place[&n];
            for &s in g.outputs(mem) {
                if s == n || g.is_dead(s) || !is_mem_killer(g.op(s)) {
                    continue;
                }
                if self.place.get(&s) == Some(&lb) {
                    prec.entry(s).or_default().push(n);
                }
            }
        }
        prec
    }

    // --- local ordering -----------------------------------------------

    fn order_block(&self, b: usize, prec: &FxHashMap<NodeId, Vec<NodeId>>) -> Vec<NodeId> {
        let g = self.g;
        let bid = u32::try_from(b).unwrap_or(u32::MAX);
        let head = self.blocks[b].head;
        let chain = &self.chains[b];
        let tail = *chain.last().unwrap_or(&head);

        let mut members: Vec<NodeId> = self
            .place
            .iter()
            .filter(|&(_, &blk)| blk == bid)
            .map(|(&n, _)| n)
            .collect();
        members.sort_unstable();

        let mut order = vec![head];
        let mut phis = Vec::new();
        let mut rest = Vec::new();
        for &n in &members {
            if n == head {
                continue;
            }
            if matches!(g.op(n), NodeOp::Phi(_) | NodeOp::MemPhi(_)) {
                phis.push(n);
            } else {
                rest.push(n);
            }
        }
        order.extend(phis.iter().copied());

        // Dependency counting over the remaining members: same-block
        // inputs, anti-dependence precedence, and the control chain.
        let in_block = |n: NodeId| -> bool {
            self.place.get(&n) == Some(&bid)
                && n != head
                && !matches!(g.op(n), NodeOp::Phi(_) | NodeOp::MemPhi(_))
        };
        let mut indeg: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut dependents: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for &n in &rest {
            indeg.entry(n).or_insert(0);
        }
        let add_edge = |from: NodeId, to: NodeId,
                            indeg: &mut FxHashMap<NodeId, usize>,
                            dependents: &mut FxHashMap<NodeId, Vec<NodeId>>| {
            *indeg.entry(to).or_insert(0) += 1;
            dependents.entry(from).or_default().push(to);
        };
        for &n in &rest {
            for &i in g.inputs(n) {
                if i.is_some() && in_block(i) {
                    add_edge(i, n, &mut indeg, &mut dependents);
                }
            }
            if let Some(loads) = prec.get(&n) {
                for &l in loads {
                    if in_block(l) {
                        add_edge(l, n, &mut indeg, &mut dependents);
                    }
                }
            }
        }
        for w in chain.windows(2) {
            if in_block(w[1]) && in_block(w[0]) {
                add_edge(w[0], w[1], &mut indeg, &mut dependents);
            }
        }

        let mut ready: BinaryHeap<Reverse<NodeId>> = rest
            .iter()
            .copied()
            .filter(|n| indeg[n] == 0 && *n != tail)
            .map(Reverse)
            .collect();
        let mut tail_ready = rest.contains(&tail) && indeg.get(&tail) == Some(&0);
        let mut emitted = order.len();
        while let Some(Reverse(n)) = ready.pop() {
            order.push(n);
            emitted += 1;
            let ds = dependents.get(&n).cloned().unwrap_or_default();
            for d in ds {
                if let Some(c) = indeg.get_mut(&d) {
                    *c -= 1;
                    if *c == 0 {
                        if d == tail {
                            tail_ready = true;
                        } else {
                            ready.push(Reverse(d));
                        }
                    }
                }
            }
        }
        if rest.contains(&tail) {
            debug_assert!(tail_ready, "terminator has unsatisfied dependencies");
            order.push(tail);
            emitted += 1;
        }
        debug_assert_eq!(emitted, members.len(), "local schedule dropped nodes");
        let _ = emitted;
        order
    }
}
