//! Lowering: scheduled graph to LIR over virtual registers.
//!
//! Compares never materialize on their own. A `Bool` feeding a branch
//! fuses into the `Branch` terminator; a branch whose taken side is a
//! bare trap block fuses further into a `GuardTrap`, leaving the hot
//! path fall-through. Small int constants fold into the immediate
//! operand of int ALU ops and compares, and are only materialized when
//! some other use needs them in a register.
//!
//! Phis carry a virtual register each; SSA is destructed by placing
//! parallel copies on the incoming edges, with a temp to break cycles.

use anvil_bc::Value;
use anvil_deopt::Reason;
use anvil_ir::{BoolTest, Graph, NodeId, NodeOp, TyData};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::lir::{
    Cmp3Kind, CmpKind, ConvOp, DeoptRecord, DoubleOp, IntOp, LBlock, LInsn, LongOp, Operand,
    RegClass, VReg,
};
use crate::schedule::Schedule;

/// Lowered function, before register allocation.
pub(crate) struct LFunc {
    pub blocks: Vec<LBlock>,
    /// Argument landing pads, indexed by parameter position.
    pub params: Vec<VReg>,
    pub classes: Vec<RegClass>,
    pub deopts: Vec<DeoptRecord>,
}

pub(crate) fn lower(g: &Graph, sched: &Schedule) -> LFunc {
    Lowerer {
        g,
        sched,
        vregs: FxHashMap::default(),
        classes: Vec::new(),
        deopts: Vec::new(),
        deopt_ids: FxHashMap::default(),
        blocks: Vec::new(),
        param_map: FxHashMap::default(),
    }
    .run()
}

struct Lowerer<'a> {
    g: &'a Graph,
    sched: &'a Schedule,
    vregs: FxHashMap<NodeId, VReg>,
    classes: Vec<RegClass>,
    deopts: Vec<DeoptRecord>,
    deopt_ids: FxHashMap<NodeId, u32>,
    blocks: Vec<LBlock>,
    param_map: FxHashMap<u16, VReg>,
}

/// Int ops that accept a folded constant in their second operand.
fn folds_rhs(op: &NodeOp) -> bool {
    matches!(
        op,
        NodeOp::AddI
            | NodeOp::SubI
            | NodeOp::MulI
            | NodeOp::DivI
            | NodeOp::RemI
            | NodeOp::AndI
            | NodeOp::OrI
            | NodeOp::XorI
            | NodeOp::ShlI
            | NodeOp::ShrI
            | NodeOp::UShrI
            | NodeOp::MinI
            | NodeOp::MaxI
            | NodeOp::CmpI
            | NodeOp::CmpU
    )
}

fn int_alu(op: &NodeOp) -> Option<IntOp> {
    Some(match op {
        NodeOp::AddI => IntOp::Add,
        NodeOp::SubI => IntOp::Sub,
        NodeOp::MulI => IntOp::Mul,
        NodeOp::DivI => IntOp::Div,
        NodeOp::RemI => IntOp::Rem,
        NodeOp::AndI => IntOp::And,
        NodeOp::OrI => IntOp::Or,
        NodeOp::XorI => IntOp::Xor,
        NodeOp::ShlI => IntOp::Shl,
        NodeOp::ShrI => IntOp::Shr,
        NodeOp::UShrI => IntOp::UShr,
        NodeOp::MinI => IntOp::Min,
        NodeOp::MaxI => IntOp::Max,
        _ => return None,
    })
}

fn long_alu(op: &NodeOp) -> Option<LongOp> {
    Some(match op {
        NodeOp::AddL => LongOp::Add,
        NodeOp::SubL => LongOp::Sub,
        NodeOp::MulL => LongOp::Mul,
        NodeOp::DivL => LongOp::Div,
        NodeOp::RemL => LongOp::Rem,
        NodeOp::AndL => LongOp::And,
        NodeOp::OrL => LongOp::Or,
        NodeOp::XorL => LongOp::Xor,
        NodeOp::ShlL => LongOp::Shl,
        NodeOp::ShrL => LongOp::Shr,
        NodeOp::UShrL => LongOp::UShr,
        _ => return None,
    })
}

fn double_alu(op: &NodeOp) -> Option<DoubleOp> {
    Some(match op {
        NodeOp::AddD => DoubleOp::Add,
        NodeOp::SubD => DoubleOp::Sub,
        NodeOp::MulD => DoubleOp::Mul,
        NodeOp::DivD => DoubleOp::Div,
        NodeOp::RemD => DoubleOp::Rem,
        _ => return None,
    })
}

impl Lowerer<'_> {
    fn run(mut self) -> LFunc {
        for b in 0..self.sched.blocks.len() {
            self.blocks.push(LBlock {
                insns: Vec::new(),
                loop_depth: self.sched.blocks[b].loop_depth,
            });
        }
        for b in 0..self.sched.blocks.len() {
            self.lower_block(b);
        }
        self.place_phi_moves();

        let max = self.param_map.keys().copied().max();
        let mut params = Vec::new();
        if let Some(max) = max {
            for i in 0..=max {
                let v = match self.param_map.get(&i) {
                    Some(&v) => v,
                    None => self.fresh(RegClass::Gpr),
                };
                params.push(v);
            }
        }
        LFunc {
            blocks: self.blocks,
            params,
            classes: self.classes,
            deopts: self.deopts,
        }
    }

    // --- vregs --------------------------------------------------------

    /// Chase value aliases down to the node that actually defines the
    /// register: casts and barriers are free, a call's result projection
    /// is the call, an allocation's ref projection is the allocation.
    fn resolve(&self, mut n: NodeId) -> NodeId {
        loop {
            n = match self.g.op(n) {
                NodeOp::CastII(_) | NodeOp::Opaque1 => self.g.input(n, 1),
                NodeOp::Proj(i) => {
                    let of = self.g.input(n, 0);
                    match self.g.op(of) {
                        NodeOp::CallStatic { .. } if *i == 1 => of,
                        NodeOp::NewArr(_) if *i == 0 => of,
                        _ => return n,
                    }
                }
                _ => return n,
            };
        }
    }

    fn class_for(&self, n: NodeId) -> RegClass {
        let mut t = self.g.ty(n);
        if matches!(self.g.tys.get(t), TyData::Tuple(_)) {
            // Only a call result can be a float among multi-output nodes.
            if matches!(self.g.op(n), NodeOp::CallStatic { .. }) {
                t = self.g.tys.tuple_elem(t, 1);
            } else {
                return RegClass::Gpr;
            }
        }
        match self.g.tys.get(t) {
            TyData::Double | TyData::DoubleCon(_) | TyData::DoubleTop => RegClass::Fpr,
            _ => RegClass::Gpr,
        }
    }

    fn fresh(&mut self, class: RegClass) -> VReg {
        let v = VReg(u32::try_from(self.classes.len()).unwrap_or(u32::MAX));
        self.classes.push(class);
        v
    }

    fn vreg(&mut self, n: NodeId) -> VReg {
        let r = self.resolve(n);
        if let Some(&v) = self.vregs.get(&r) {
            return v;
        }
        let class = self.class_for(r);
        let v = self.fresh(class);
        self.vregs.insert(r, v);
        v
    }

    /// Right-hand operand with constant folding.
    fn operand(&mut self, n: NodeId) -> Operand {
        let r = self.resolve(n);
        if let NodeOp::ConI(c) = *self.g.op(r) {
            return Operand::Imm(c);
        }
        Operand::Reg(self.vreg(r))
    }

    /// An int constant needs a register when some use cannot fold it.
    fn coni_materialized(&self, n: NodeId) -> bool {
        self.g.outputs(n).iter().any(|&u| {
            if self.g.is_dead(u) {
                return false;
            }
            self.g
                .inputs(u)
                .iter()
                .enumerate()
                .any(|(i, &inp)| inp == n && !(i == 2 && folds_rhs(self.g.op(u))))
        })
    }

    // --- deopt records ------------------------------------------------

    /// Build (or reuse) the deopt record of a safepoint-class node.
    fn deopt_id(&mut self, n: NodeId) -> u32 {
        if let Some(&id) = self.deopt_ids.get(&n) {
            return id;
        }
        let (reason, state_at) = match *self.g.op(n) {
            NodeOp::Trap(r) => (r, 1 + self.g.n_slices()),
            NodeOp::Safepoint => (Reason::None, 1 + self.g.n_slices()),
            NodeOp::CallStatic { argc, .. } => {
                (Reason::None, 1 + argc as usize + self.g.n_slices())
            }
            _ => unreachable!("node without deopt state"),
        };
        let desc = match self.g.frames.get(&n) {
            Some(d) => d.clone(),
            None => unreachable!("safepoint-class node without a frame"),
        };
        let values: Vec<VReg> = self.g.inputs(n)[state_at..]
            .to_vec()
            .into_iter()
            .map(|v| self.vreg(v))
            .collect();
        debug_assert_eq!(values.len(), desc.total_slots());
        let id = u32::try_from(self.deopts.len()).unwrap_or(u32::MAX);
        self.deopts.push(DeoptRecord { reason, desc, values });
        self.deopt_ids.insert(n, id);
        id
    }

    // --- per-block lowering -------------------------------------------

    fn push(&mut self, b: usize, insn: LInsn) {
        self.blocks[b].insns.push(insn);
    }

    fn lower_block(&mut self, b: usize) {
        let nodes = self.sched.blocks[b].nodes.clone();
        for &n in &nodes {
            self.lower_node(b, n);
        }
        let done = self.blocks[b]
            .insns
            .last()
            .is_some_and(LInsn::is_terminator);
        if !done {
            // Fall-through block: a single successor by construction.
            let target = self.sched.blocks[b].succs[0];
            self.push(b, LInsn::Jump { target });
        }
    }

    fn lower_node(&mut self, b: usize, n: NodeId) {
        let g = self.g;
        match *g.op(n) {
            // Control skeleton that produces no code.
            NodeOp::Start
            | NodeOp::Stop
            | NodeOp::Region
            | NodeOp::LoopHead(_)
            | NodeOp::IfTrue
            | NodeOp::IfFalse => {}
            // Value plumbing without instructions.
            NodeOp::Phi(_)
            | NodeOp::MemPhi(_)
            | NodeOp::InitMem(_)
            | NodeOp::Proj(_)
            | NodeOp::CastII(_)
            | NodeOp::Opaque1
            | NodeOp::CmpI
            | NodeOp::CmpU
            | NodeOp::CmpL
            | NodeOp::CmpP => {}

            NodeOp::Param(i) => {
                let v = self.vreg(n);
                self.param_map.insert(i, v);
            }

            NodeOp::ConI(c) => {
                if self.coni_materialized(n) {
                    let dst = self.vreg(n);
                    self.push(b, LInsn::Const { dst, value: Value::I32(c) });
                }
            }
            NodeOp::ConL(c) => {
                let dst = self.vreg(n);
                self.push(b, LInsn::Const { dst, value: Value::I64(c) });
            }
            NodeOp::ConD(bits) => {
                let dst = self.vreg(n);
                self.push(
                    b,
                    LInsn::Const { dst, value: Value::F64(f64::from_bits(bits)) },
                );
            }
            NodeOp::ConNull => {
                let dst = self.vreg(n);
                self.push(b, LInsn::Const { dst, value: Value::Null });
            }

            ref op if int_alu(op).is_some() => {
                let alu = int_alu(op).unwrap_or(IntOp::Add);
                let a = self.vreg(g.input(n, 1));
                let rhs = self.operand(g.input(n, 2));
                let dst = self.vreg(n);
                self.push(b, LInsn::AluI { op: alu, dst, a, b: rhs });
            }
            ref op if long_alu(op).is_some() => {
                let alu = long_alu(op).unwrap_or(LongOp::Add);
                let a = self.vreg(g.input(n, 1));
                let rhs = self.vreg(g.input(n, 2));
                let dst = self.vreg(n);
                self.push(b, LInsn::AluL { op: alu, dst, a, b: rhs });
            }
            ref op if double_alu(op).is_some() => {
                let alu = double_alu(op).unwrap_or(DoubleOp::Add);
                let a = self.vreg(g.input(n, 1));
                let rhs = self.vreg(g.input(n, 2));
                let dst = self.vreg(n);
                self.push(b, LInsn::AluD { op: alu, dst, a, b: rhs });
            }
            NodeOp::NegD => {
                let src = self.vreg(g.input(n, 1));
                let dst = self.vreg(n);
                self.push(b, LInsn::NegD { dst, src });
            }

            NodeOp::LCmpV | NodeOp::DCmpL | NodeOp::DCmpG => {
                let kind = match g.op(n) {
                    NodeOp::LCmpV => Cmp3Kind::L,
                    NodeOp::DCmpL => Cmp3Kind::Dl,
                    _ => Cmp3Kind::Dg,
                };
                let a = self.vreg(g.input(n, 1));
                let rhs = self.vreg(g.input(n, 2));
                let dst = self.vreg(n);
                self.push(b, LInsn::Cmp3 { kind, dst, a, b: rhs });
            }

            NodeOp::ConvI2L
            | NodeOp::ConvL2I
            | NodeOp::ConvI2D
            | NodeOp::ConvD2I
            | NodeOp::ConvL2D
            | NodeOp::ConvD2L => {
                let op = match g.op(n) {
                    NodeOp::ConvI2L => ConvOp::I2L,
                    NodeOp::ConvL2I => ConvOp::L2I,
                    NodeOp::ConvI2D => ConvOp::I2D,
                    NodeOp::ConvD2I => ConvOp::D2I,
                    NodeOp::ConvL2D => ConvOp::L2D,
                    _ => ConvOp::D2L,
                };
                let src = self.vreg(g.input(n, 1));
                let dst = self.vreg(n);
                self.push(b, LInsn::Conv { op, dst, src });
            }

            NodeOp::Bool(test) => self.lower_bool(b, n, test),

            NodeOp::ArrayLen => {
                let base = self.vreg(g.input(n, 1));
                let dst = self.vreg(n);
                self.push(b, LInsn::ArrayLen { dst, base });
            }
            NodeOp::LoadArr(kind) => {
                let base = self.vreg(g.input(n, 2));
                let idx = self.vreg(g.input(n, 3));
                let dst = self.vreg(n);
                self.push(b, LInsn::LoadArr { kind, dst, base, idx });
            }
            NodeOp::StoreArr(kind) => {
                let base = self.vreg(g.input(n, 2));
                let idx = self.vreg(g.input(n, 3));
                let src = self.vreg(g.input(n, 4));
                self.push(b, LInsn::StoreArr { kind, base, idx, src });
            }
            NodeOp::NewArr(kind) => {
                let len = self.vreg(g.input(n, 2));
                let dst = self.vreg(n);
                self.push(b, LInsn::NewArr { kind, dst, len });
            }
            NodeOp::LoadGlobal(global) => {
                let dst = self.vreg(n);
                self.push(b, LInsn::LoadGlobal { dst, global });
            }
            NodeOp::StoreGlobal(global) => {
                let src = self.vreg(g.input(n, 2));
                self.push(b, LInsn::StoreGlobal { global, src });
            }

            NodeOp::CallStatic { mid, argc } => {
                let args: Vec<VReg> = (1..=argc as usize)
                    .map(|i| self.vreg(g.input(n, i)))
                    .collect();
                let used = g
                    .proj(n, 1)
                    .is_some_and(|p| !g.is_dead(p) && !g.outputs(p).is_empty());
                let dst = if used { Some(self.vreg(n)) } else { None };
                let deopt_id = self.deopt_id(n);
                self.push(b, LInsn::Call { mid, dst, args, deopt_id });
            }

            NodeOp::Safepoint => {
                let deopt_id = self.deopt_id(n);
                self.push(b, LInsn::Safepoint { deopt_id });
            }
            NodeOp::Trap(_) => {
                let deopt_id = self.deopt_id(n);
                self.push(b, LInsn::Deopt { deopt_id });
            }
            NodeOp::Raise(kind) => {
                let args: Vec<VReg> = g.inputs(n)[1..]
                    .to_vec()
                    .into_iter()
                    .map(|a| self.vreg(a))
                    .collect();
                self.push(b, LInsn::Raise { kind, args });
            }
            NodeOp::Return => {
                let src = if g.inputs(n).len() > 1 && g.input(n, 1).is_some() {
                    Some(self.vreg(g.input(n, 1)))
                } else {
                    None
                };
                self.push(b, LInsn::Ret { src });
            }

            NodeOp::If | NodeOp::RangeCheck => self.lower_branch(b, n),

            ref op => unreachable!("unlowerable op {op:?}"),
        }
    }

    /// A branch condition as (kind, test, lhs, rhs).
    fn branch_cond(&mut self, cond: NodeId) -> (CmpKind, BoolTest, VReg, Operand) {
        let c = self.resolve(cond);
        if let NodeOp::Bool(test) = *self.g.op(c) {
            let cmp = self.resolve(self.g.input(c, 1));
            let kind = match self.g.op(cmp) {
                NodeOp::CmpI => Some(CmpKind::I),
                NodeOp::CmpU => Some(CmpKind::U),
                NodeOp::CmpL => Some(CmpKind::L),
                NodeOp::CmpP => Some(CmpKind::P),
                _ => None,
            };
            if let Some(kind) = kind {
                let a = self.vreg(self.g.input(cmp, 1));
                let rhs = if matches!(kind, CmpKind::I | CmpKind::U) {
                    self.operand(self.g.input(cmp, 2))
                } else {
                    Operand::Reg(self.vreg(self.g.input(cmp, 2)))
                };
                return (kind, test, a, rhs);
            }
        }
        // A materialized 0/1 value: branch on it being nonzero.
        let v = self.vreg(cond);
        (CmpKind::I, BoolTest::Ne, v, Operand::Imm(0))
    }

    fn lower_bool(&mut self, b: usize, n: NodeId, test: BoolTest) {
        let g = self.g;
        let needs_value = g.outputs(n).iter().any(|&u| {
            !g.is_dead(u) && !matches!(g.op(u), NodeOp::If | NodeOp::RangeCheck)
        });
        if !needs_value {
            return;
        }
        let cmp = self.resolve(g.input(n, 1));
        let kind = match g.op(cmp) {
            NodeOp::CmpI => CmpKind::I,
            NodeOp::CmpU => CmpKind::U,
            NodeOp::CmpL => CmpKind::L,
            NodeOp::CmpP => CmpKind::P,
            op => unreachable!("bool over non-compare {op:?}"),
        };
        let a = self.vreg(g.input(cmp, 1));
        let rhs = if matches!(kind, CmpKind::I | CmpKind::U) {
            self.operand(g.input(cmp, 2))
        } else {
            Operand::Reg(self.vreg(g.input(cmp, 2)))
        };
        let dst = self.vreg(n);
        self.push(b, LInsn::SetCond { kind, test, dst, a, b: rhs });
    }

    /// Bare trap block: just its branch projection and the trap itself.
    fn fusible_trap(&self, blk: u32) -> Option<NodeId> {
        let block = &self.sched.blocks[blk as usize];
        if !block.is_trap || block.nodes.len() != 2 {
            return None;
        }
        let t = block.nodes[1];
        matches!(self.g.op(t), NodeOp::Trap(_)).then_some(t)
    }

    fn lower_branch(&mut self, b: usize, n: NodeId) {
        let g = self.g;
        let (kind, test, a, rhs) = self.branch_cond(g.input(n, 1));
        let (Some(t), Some(f)) = (g.if_true(n), g.if_false(n)) else {
            unreachable!("branch without both projections");
        };
        let tb = self.sched.block_of(t);
        let fb = self.sched.block_of(f);
        if let Some(trap) = self.fusible_trap(tb) {
            let deopt_id = self.deopt_id(trap);
            trace!(block = b, "branch fused into guard (taken side traps)");
            self.push(b, LInsn::GuardTrap { kind, test, a, b: rhs, deopt_id });
            self.push(b, LInsn::Jump { target: fb });
        } else if let Some(trap) = self.fusible_trap(fb) {
            let deopt_id = self.deopt_id(trap);
            trace!(block = b, "branch fused into guard (fallthrough side traps)");
            self.push(
                b,
                LInsn::GuardTrap { kind, test: test.negate(), a, b: rhs, deopt_id },
            );
            self.push(b, LInsn::Jump { target: tb });
        } else {
            self.push(
                b,
                LInsn::Branch { kind, test, a, b: rhs, on_true: tb, on_false: fb },
            );
        }
    }

    // --- SSA destruction ----------------------------------------------

    /// Block holding a region predecessor's control edge.
    fn pred_block(&self, ctrl: NodeId) -> u32 {
        if self.g.op(ctrl).is_cfg() {
            self.sched.block_of(ctrl)
        } else {
            // A call's control projection.
            self.sched.block_of(self.g.input(ctrl, 0))
        }
    }

    fn place_phi_moves(&mut self) {
        for sb in 0..self.sched.blocks.len() {
            let head = self.sched.blocks[sb].head;
            if !matches!(self.g.op(head), NodeOp::Region | NodeOp::LoopHead(_)) {
                continue;
            }
            let phis: Vec<NodeId> = self.sched.blocks[sb]
                .nodes
                .iter()
                .copied()
                .filter(|&p| matches!(self.g.op(p), NodeOp::Phi(_)))
                .collect();
            if phis.is_empty() {
                continue;
            }
            let n_preds = self.g.inputs(head).len();
            for j in 0..n_preds {
                let ctrl = self.g.input(head, j);
                let pb = self.pred_block(ctrl);
                let mut moves: Vec<(VReg, VReg)> = Vec::new();
                for &p in &phis {
                    let dst = self.vreg(p);
                    let src = self.vreg(self.g.input(p, j + 1));
                    if dst != src {
                        moves.push((dst, src));
                    }
                }
                if moves.is_empty() {
                    continue;
                }
                let seq = self.sequence_moves(&moves);
                self.insert_on_edge(pb, u32::try_from(sb).unwrap_or(u32::MAX), ctrl, seq);
            }
        }
    }

    /// Order a parallel copy, breaking cycles through a temp.
    fn sequence_moves(&mut self, moves: &[(VReg, VReg)]) -> Vec<LInsn> {
        let mut work: Vec<(VReg, VReg)> = moves.to_vec();
        let mut out = Vec::new();
        while !work.is_empty() {
            let mut progress = false;
            let mut i = 0;
            while i < work.len() {
                let (dst, src) = work[i];
                if work.iter().all(|&(_, s)| s != dst) {
                    out.push(LInsn::Mov { dst, src });
                    work.swap_remove(i);
                    progress = true;
                } else {
                    i += 1;
                }
            }
            if !progress {
                // Every pending dst is also read: a cycle. Park one in a
                // temp and redirect its readers.
                let (dst, _) = work[0];
                let class = self.classes[dst.index()];
                let tmp = self.fresh(class);
                out.push(LInsn::Mov { dst: tmp, src: dst });
                for w in &mut work {
                    if w.1 == dst {
                        w.1 = tmp;
                    }
                }
            }
        }
        out
    }

    /// Put edge moves at the end of the predecessor, splitting the edge
    /// when the predecessor branches.
    fn insert_on_edge(&mut self, pb: u32, sb: u32, ctrl: NodeId, moves: Vec<LInsn>) {
        let branches = matches!(
            self.blocks[pb as usize].insns.last(),
            Some(LInsn::Branch { .. })
        );
        if branches {
            let depth = self.blocks[pb as usize].loop_depth;
            let mut insns_new = moves;
            insns_new.push(LInsn::Jump { target: sb });
            let split = u32::try_from(self.blocks.len()).unwrap_or(u32::MAX);
            self.blocks.push(LBlock { insns: insns_new, loop_depth: depth });
            let take_true = matches!(self.g.op(ctrl), NodeOp::IfTrue);
            if let Some(LInsn::Branch { on_true, on_false, .. }) =
                self.blocks[pb as usize].insns.last_mut()
            {
                if take_true || (*on_true == sb && *on_false != sb) {
                    *on_true = split;
                } else {
                    *on_false = split;
                }
            }
        } else {
            let insns = &mut self.blocks[pb as usize].insns;
            debug_assert!(matches!(insns.last(), Some(LInsn::Jump { .. })));
            let at = insns.len().saturating_sub(1);
            insns.splice(at..at, moves);
        }
    }
}
