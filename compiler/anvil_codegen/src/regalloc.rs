//! Graph-coloring register allocation, eight registers per class.
//!
//! Liveness runs as a backward dataflow over the LIR blocks, the
//! interference graph is colored by simplify-and-select, and moves are
//! coalesced conservatively (only when the combined node keeps a safe
//! degree). A node that cannot be colored is assigned a frame slot and
//! drops out of the graph entirely: instructions read and write spill
//! slots directly, so a spill never needs reload temporaries.
//!
//! Deopt record values count as uses at the instruction carrying the
//! record; they must be readable when the guard fires.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::debug;

use crate::lir::{DeoptRecord, LBlock, LInsn, Loc, Operand, VReg, K_REGS};
use crate::lower::LFunc;

pub(crate) struct Allocation {
    pub assignment: Vec<Loc>,
    pub frame_size: u32,
    pub spills: u32,
}

fn insn_def(insn: &LInsn) -> Option<VReg> {
    match insn {
        LInsn::Const { dst, .. }
        | LInsn::Mov { dst, .. }
        | LInsn::AluI { dst, .. }
        | LInsn::AluL { dst, .. }
        | LInsn::AluD { dst, .. }
        | LInsn::NegD { dst, .. }
        | LInsn::Cmp3 { dst, .. }
        | LInsn::Conv { dst, .. }
        | LInsn::SetCond { dst, .. }
        | LInsn::ArrayLen { dst, .. }
        | LInsn::LoadArr { dst, .. }
        | LInsn::NewArr { dst, .. }
        | LInsn::LoadGlobal { dst, .. } => Some(*dst),
        LInsn::Call { dst, .. } => *dst,
        _ => None,
    }
}

fn push_operand(op: Operand, out: &mut Vec<VReg>) {
    if let Operand::Reg(v) = op {
        out.push(v);
    }
}

fn insn_uses(insn: &LInsn, deopts: &[DeoptRecord], out: &mut Vec<VReg>) {
    out.clear();
    match insn {
        LInsn::Const { .. } | LInsn::LoadGlobal { .. } | LInsn::Jump { .. } => {}
        LInsn::Mov { src, .. }
        | LInsn::NegD { src, .. }
        | LInsn::Conv { src, .. }
        | LInsn::StoreGlobal { src, .. } => out.push(*src),
        LInsn::AluI { a, b, .. } => {
            out.push(*a);
            push_operand(*b, out);
        }
        LInsn::AluL { a, b, .. } | LInsn::AluD { a, b, .. } | LInsn::Cmp3 { a, b, .. } => {
            out.push(*a);
            out.push(*b);
        }
        LInsn::SetCond { a, b, .. } => {
            out.push(*a);
            push_operand(*b, out);
        }
        LInsn::ArrayLen { base, .. } => out.push(*base),
        LInsn::LoadArr { base, idx, .. } => {
            out.push(*base);
            out.push(*idx);
        }
        LInsn::StoreArr { base, idx, src, .. } => {
            out.push(*base);
            out.push(*idx);
            out.push(*src);
        }
        LInsn::NewArr { len, .. } => out.push(*len),
        LInsn::Call { args, deopt_id, .. } => {
            out.extend_from_slice(args);
            out.extend_from_slice(&deopts[*deopt_id as usize].values);
        }
        LInsn::GuardTrap { a, b, deopt_id, .. } => {
            out.push(*a);
            push_operand(*b, out);
            out.extend_from_slice(&deopts[*deopt_id as usize].values);
        }
        LInsn::Safepoint { deopt_id } | LInsn::Deopt { deopt_id } => {
            out.extend_from_slice(&deopts[*deopt_id as usize].values);
        }
        LInsn::Branch { a, b, .. } => {
            out.push(*a);
            push_operand(*b, out);
        }
        LInsn::Ret { src } => {
            if let Some(s) = src {
                out.push(*s);
            }
        }
        LInsn::Raise { args, .. } => out.extend_from_slice(args),
    }
}

fn block_succs(b: &LBlock) -> SmallVec<[u32; 2]> {
    match b.insns.last() {
        Some(LInsn::Jump { target }) => SmallVec::from_slice(&[*target]),
        Some(LInsn::Branch { on_true, on_false, .. }) => {
            SmallVec::from_slice(&[*on_true, *on_false])
        }
        _ => SmallVec::new(),
    }
}

pub(crate) fn allocate(func: &LFunc) -> Allocation {
    Allocator::new(func).run()
}

struct Allocator<'f> {
    func: &'f LFunc,
    n: usize,
    /// Union-find over coalesced vregs.
    alias: Vec<u32>,
    adj: Vec<FxHashSet<u32>>,
    /// Use counts weighted by loop depth, for spill choice.
    cost: Vec<u64>,
    movs: Vec<(VReg, VReg)>,
}

impl<'f> Allocator<'f> {
    fn new(func: &'f LFunc) -> Allocator<'f> {
        let n = func.classes.len();
        Allocator {
            func,
            n,
            alias: (0..u32::try_from(n).unwrap_or(u32::MAX)).collect(),
            adj: vec![FxHashSet::default(); n],
            cost: vec![0; n],
            movs: Vec::new(),
        }
    }

    fn find(&mut self, v: u32) -> u32 {
        let mut r = v;
        while self.alias[r as usize] != r {
            r = self.alias[r as usize];
        }
        let mut c = v;
        while self.alias[c as usize] != r {
            let next = self.alias[c as usize];
            self.alias[c as usize] = r;
            c = next;
        }
        r
    }

    fn add_edge(&mut self, a: u32, b: u32) {
        if a == b || self.func.classes[a as usize] != self.func.classes[b as usize] {
            return;
        }
        self.adj[a as usize].insert(b);
        self.adj[b as usize].insert(a);
    }

    fn liveness(&self) -> Vec<FxHashSet<u32>> {
        let blocks = &self.func.blocks;
        let nb = blocks.len();
        let mut live_in: Vec<FxHashSet<u32>> = vec![FxHashSet::default(); nb];
        let mut uses = Vec::new();
        let mut changed = true;
        while changed {
            changed = false;
            for b in (0..nb).rev() {
                let mut live: FxHashSet<u32> = FxHashSet::default();
                for s in block_succs(&blocks[b]) {
                    live.extend(live_in[s as usize].iter().copied());
                }
                for insn in blocks[b].insns.iter().rev() {
                    if let Some(d) = insn_def(insn) {
                        live.remove(&d.0);
                    }
                    insn_uses(insn, &self.func.deopts, &mut uses);
                    live.extend(uses.iter().map(|v| v.0));
                }
                if live != live_in[b] {
                    live_in[b] = live;
                    changed = true;
                }
            }
        }
        live_in
    }

    fn build(&mut self, live_in: &[FxHashSet<u32>]) {
        let blocks = &self.func.blocks;
        let mut uses = Vec::new();
        for block in blocks {
            let mut live: FxHashSet<u32> = FxHashSet::default();
            for s in block_succs(block) {
                live.extend(live_in[s as usize].iter().copied());
            }
            let weight = 10u64.saturating_pow(block.loop_depth.min(4));
            for insn in block.insns.iter().rev() {
                if let Some(d) = insn_def(insn) {
                    self.cost[d.index()] = self.cost[d.index()].saturating_add(weight);
                    live.remove(&d.0);
                    let skip = match insn {
                        LInsn::Mov { src, .. } => Some(src.0),
                        _ => None,
                    };
                    let others: Vec<u32> = live
                        .iter()
                        .copied()
                        .filter(|&v| Some(v) != skip)
                        .collect();
                    for v in others {
                        self.add_edge(d.0, v);
                    }
                }
                insn_uses(insn, &self.func.deopts, &mut uses);
                for &u in &uses {
                    self.cost[u.index()] = self.cost[u.index()].saturating_add(weight);
                    live.insert(u.0);
                }
                if let LInsn::Mov { dst, src } = insn {
                    self.movs.push((*dst, *src));
                }
            }
        }

        // Parameters are all defined at entry and interfere with whatever
        // is live into the first block.
        let entry: Vec<u32> = live_in.first().map(|s| s.iter().copied().collect()).unwrap_or_default();
        for &p in &self.func.params {
            for &v in &entry {
                self.add_edge(p.0, v);
            }
            for &q in &self.func.params {
                self.add_edge(p.0, q.0);
            }
        }
    }

    /// Merge non-interfering move ends when the union stays easy to color.
    fn coalesce(&mut self) {
        let movs = self.movs.clone();
        for (dst, src) in movs {
            let a = self.find(dst.0);
            let b = self.find(src.0);
            if a == b
                || self.func.classes[a as usize] != self.func.classes[b as usize]
                || self.adj[a as usize].contains(&b)
            {
                continue;
            }
            let combined: FxHashSet<u32> = self.adj[a as usize]
                .union(&self.adj[b as usize])
                .copied()
                .map(|v| {
                    let mut r = v;
                    while self.alias[r as usize] != r {
                        r = self.alias[r as usize];
                    }
                    r
                })
                .collect();
            if combined.len() >= usize::from(K_REGS) {
                continue;
            }
            // Fold b into a, rewiring neighbors.
            self.alias[b as usize] = a;
            let b_adj: Vec<u32> = self.adj[b as usize].iter().copied().collect();
            for v in b_adj {
                self.adj[v as usize].remove(&b);
                self.adj[v as usize].insert(a);
                self.adj[a as usize].insert(v);
            }
            self.adj[b as usize].clear();
            self.cost[a as usize] =
                self.cost[a as usize].saturating_add(self.cost[b as usize]);
        }
    }

    fn run(mut self) -> Allocation {
        let live_in = self.liveness();
        self.build(&live_in);
        self.coalesce();

        // Roots only from here on.
        let n32 = u32::try_from(self.n).unwrap_or(u32::MAX);
        let roots: Vec<u32> = (0..n32).filter(|&v| self.find(v) == v).collect();
        let mut deg: Vec<usize> = vec![0; self.n];
        let mut adj_roots: Vec<Vec<u32>> = vec![Vec::new(); self.n];
        for &v in &roots {
            let neighbors: Vec<u32> = self.adj[v as usize].iter().copied().collect();
            let ns: FxHashSet<u32> = neighbors
                .into_iter()
                .map(|u| self.find(u))
                .filter(|&u| u != v)
                .collect();
            deg[v as usize] = ns.len();
            adj_roots[v as usize] = ns.into_iter().collect();
        }

        let mut removed = vec![false; self.n];
        let mut loc: Vec<Option<Loc>> = vec![None; self.n];
        let mut stack: Vec<u32> = Vec::new();
        let mut slots = 0u32;
        let mut spills = 0u32;
        let mut left = roots.len();
        while left > 0 {
            let mut progress = true;
            while progress {
                progress = false;
                for &v in &roots {
                    if !removed[v as usize] && deg[v as usize] < usize::from(K_REGS) {
                        removed[v as usize] = true;
                        stack.push(v);
                        left -= 1;
                        for &u in &adj_roots[v as usize] {
                            if !removed[u as usize] {
                                deg[u as usize] -= 1;
                            }
                        }
                        progress = true;
                    }
                }
            }
            if left == 0 {
                break;
            }
            // Everything left is high-degree: spill the cheapest.
            let victim = roots
                .iter()
                .copied()
                .filter(|&v| !removed[v as usize])
                .min_by_key(|&v| {
                    let d = u64::try_from(deg[v as usize]).unwrap_or(u64::MAX);
                    self.cost[v as usize] / (d + 1)
                });
            let Some(v) = victim else { break };
            debug!(vreg = v, cost = self.cost[v as usize], "spilling to frame slot");
            removed[v as usize] = true;
            loc[v as usize] = Some(Loc::Slot(slots));
            slots += 1;
            spills += 1;
            left -= 1;
            for &u in &adj_roots[v as usize] {
                if !removed[u as usize] {
                    deg[u as usize] -= 1;
                }
            }
        }

        // Select colors in reverse removal order.
        for &v in stack.iter().rev() {
            let mut used = 0u16;
            for &u in &adj_roots[v as usize] {
                if let Some(Loc::Reg(c)) = loc[u as usize] {
                    used |= 1 << c;
                }
            }
            let mut c = 0u8;
            while c < K_REGS && used & (1 << c) != 0 {
                c += 1;
            }
            debug_assert!(c < K_REGS, "simplify left an uncolorable node");
            loc[v as usize] = Some(Loc::Reg(c));
        }

        let assignment: Vec<Loc> = (0..n32)
            .map(|v| {
                let r = self.find(v);
                loc[r as usize].unwrap_or(Loc::Reg(0))
            })
            .collect();
        Allocation { assignment, frame_size: slots, spills }
    }
}
