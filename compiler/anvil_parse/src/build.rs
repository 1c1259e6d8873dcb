//! The graph builder: abstract interpretation of verified bytecode.

use anvil_bc::{ArrayKind, Insn, Kind, Method, MethodId, Module};
use anvil_deopt::{Dependency, FrameDesc, Reason};
use anvil_ir::{
    BoolTest, Graph, IntRange, NodeId, NodeOp, PhiKind, RaiseKind, Slice, TyData, TyId, TyPool,
};
use anvil_opt::Gvn;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::BuildError;
use crate::profile_source::ProfileSource;

// Stack red zone / growth for deep inlining, matching the interpreter's
// recursion guard.
const RED_ZONE: usize = 100 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

/// Knobs for graph construction.
#[derive(Copy, Clone, Debug)]
pub struct BuildOpts {
    /// Callee body size ceiling for parse-time inlining.
    pub inline_insn_limit: usize,
    /// Maximum inline nesting depth.
    pub inline_depth_limit: usize,
    /// Minimum branch executions before an untaken side is pruned.
    pub prune_min_total: u64,
    /// Hard ceiling on graph size.
    pub node_budget: usize,
}

impl Default for BuildOpts {
    fn default() -> Self {
        BuildOpts {
            inline_insn_limit: 32,
            inline_depth_limit: 4,
            prune_min_total: 100,
            node_budget: 50_000,
        }
    }
}

/// Build the IR graph for one method of a verified module.
pub fn build(
    module: &Module,
    mid: MethodId,
    profiles: &dyn ProfileSource,
    opts: BuildOpts,
) -> Result<Graph, BuildError> {
    let method = module.method(mid);
    if method.code.is_empty() {
        return Err(BuildError::MalformedBody { mid: mid.raw() });
    }
    let mut b = Builder {
        module,
        profiles,
        opts,
        g: Graph::new(module.n_globals()),
        gvn: Gvn::new(),
    };

    // Entry state: params in the leading local slots, fresh memory.
    let start = b.g.start();
    let mut locals = vec![NodeId::NONE; method.max_locals as usize];
    for (i, &k) in method.params.iter().enumerate() {
        let p = b.g.add(NodeOp::Param(u16::try_from(i).unwrap_or(u16::MAX)), &[start]);
        let ty = kind_ty(&mut b.g.tys, k);
        b.g.set_ty(p, ty);
        locals[i] = p;
    }
    let n_slices = b.g.n_slices();
    let mut mem = Vec::with_capacity(n_slices);
    for s in 0..n_slices {
        let m = b.g.add(NodeOp::InitMem(Slice::from_index(s)), &[start]);
        b.g.set_ty(m, TyId::MEM);
        mem.push(m);
    }

    let ctx = MCtx {
        mid,
        caller: None,
        outer_vals: Vec::new(),
        inline: false,
        inline_stack: vec![mid],
    };
    let entry = FrameSt { locals, stack: Vec::new(), mem, ctrl: start };
    let exits = b.parse_method(&ctx, method, entry)?;
    debug_assert!(exits.is_empty(), "outermost parse emits Return nodes");
    debug!(mid = mid.raw(), nodes = b.g.len(), "graph built");
    Ok(b.g)
}

/// SSA frame state flowing through the bytecode.
#[derive(Clone)]
struct FrameSt {
    locals: Vec<NodeId>,
    stack: Vec<NodeId>,
    /// Current memory node per slice.
    mem: Vec<NodeId>,
    ctrl: NodeId,
}

/// Per-method parse context; inlining nests these.
struct MCtx {
    mid: MethodId,
    /// Frame descriptor template of the caller chain (inlining).
    caller: Option<FrameDesc>,
    /// Flattened caller-chain state values, outermost first.
    outer_vals: Vec<NodeId>,
    inline: bool,
    inline_stack: Vec<MethodId>,
}

/// A normal exit of an inlined body.
struct InlineExit {
    ctrl: NodeId,
    value: Option<NodeId>,
    mem: Vec<NodeId>,
}

/// Static block shape of one method body.
struct Shape {
    starts: Vec<u32>,
    headers: FxHashSet<u32>,
    /// Backward-edge count per loop header.
    n_back: FxHashMap<u32, u32>,
}

fn scan(code: &[Insn]) -> Shape {
    let len = u32::try_from(code.len()).unwrap_or(u32::MAX);
    let mut starts: FxHashSet<u32> = FxHashSet::default();
    starts.insert(0);
    for (i, insn) in code.iter().enumerate() {
        let i = u32::try_from(i).unwrap_or(u32::MAX);
        if let Some(t) = insn.branch_target() {
            starts.insert(t);
            if i + 1 < len {
                starts.insert(i + 1);
            }
        }
    }
    let mut headers = FxHashSet::default();
    let mut n_back: FxHashMap<u32, u32> = FxHashMap::default();
    for (i, insn) in code.iter().enumerate() {
        let i = u32::try_from(i).unwrap_or(u32::MAX);
        if let Some(t) = insn.branch_target() {
            if t <= i {
                headers.insert(t);
                *n_back.entry(t).or_insert(0) += 1;
            }
        }
    }
    let mut starts: Vec<u32> = starts.into_iter().filter(|&s| s < len).collect();
    starts.sort_unstable();
    Shape { starts, headers, n_back }
}

/// Loop-header bookkeeping while its body is being parsed.
struct HeaderInfo {
    head: NodeId,
    /// One phi per local slot then per stack slot; `NONE` for dead slots.
    phis: Vec<NodeId>,
    /// One memory phi per slice.
    memphis: Vec<NodeId>,
    /// Backedge merge region and its phis when more than one backedge.
    back: Option<BackMerge>,
}

struct BackMerge {
    region: NodeId,
    phis: Vec<NodeId>,
    memphis: Vec<NodeId>,
}

struct Builder<'m, 'p> {
    module: &'m Module,
    profiles: &'p dyn ProfileSource,
    opts: BuildOpts,
    g: Graph,
    gvn: Gvn,
}

impl Builder<'_, '_> {
    /// Parse one method body into the graph. For inlined bodies the normal
    /// exits are returned; the outermost body emits `Return` nodes.
    #[allow(clippy::too_many_lines)]
    fn parse_method(
        &mut self,
        ctx: &MCtx,
        method: &Method,
        entry: FrameSt,
    ) -> Result<Vec<InlineExit>, BuildError> {
        let code = &method.code;
        let shape = scan(code);
        let mut pending: FxHashMap<u32, Vec<FrameSt>> = FxHashMap::default();
        let mut headers: FxHashMap<u32, HeaderInfo> = FxHashMap::default();
        let mut exits: Vec<InlineExit> = Vec::new();

        pending.entry(0).or_default().push(entry);

        for (bi, &bstart) in shape.starts.iter().enumerate() {
            let bend = shape
                .starts
                .get(bi + 1)
                .copied()
                .unwrap_or(u32::try_from(code.len()).unwrap_or(u32::MAX));

            let arrivals = pending.remove(&bstart).unwrap_or_default();
            if arrivals.is_empty() {
                continue; // unreachable block
            }
            let mut st = if shape.headers.contains(&bstart) {
                let n_back = shape.n_back.get(&bstart).copied().unwrap_or(0);
                self.open_loop(ctx, bstart, arrivals, n_back, &mut headers)?
            } else if arrivals.len() == 1 {
                arrivals.into_iter().next().unwrap_or_else(|| unreachable!())
            } else {
                self.merge_plain(arrivals)
            };

            let mut bci = bstart;
            'block: while bci < bend {
                self.check_budget()?;
                let insn = code[bci as usize];
                match insn {
                    Insn::IConst(v) => {
                        let n = self.data(NodeOp::ConI(v), &[]);
                        st.stack.push(n);
                    }
                    Insn::LConst(v) => {
                        let n = self.data(NodeOp::ConL(v), &[]);
                        st.stack.push(n);
                    }
                    Insn::DConst(bits) => {
                        let n = self.data(NodeOp::ConD(bits), &[]);
                        st.stack.push(n);
                    }
                    Insn::NullConst => {
                        let n = self.data(NodeOp::ConNull, &[]);
                        st.stack.push(n);
                    }

                    Insn::ILoad(i) | Insn::LLoad(i) | Insn::DLoad(i) | Insn::ALoad(i) => {
                        st.stack.push(st.locals[i as usize]);
                    }
                    Insn::IStore(i) | Insn::LStore(i) | Insn::DStore(i) | Insn::AStore(i) => {
                        let v = pop(&mut st);
                        st.locals[i as usize] = v;
                    }

                    Insn::Pop => {
                        let _ = pop(&mut st);
                    }
                    Insn::Dup => {
                        let top = *st.stack.last().unwrap_or(&NodeId::NONE);
                        st.stack.push(top);
                    }

                    Insn::IAdd => self.binop(&mut st, NodeOp::AddI),
                    Insn::ISub => self.binop(&mut st, NodeOp::SubI),
                    Insn::IMul => self.binop(&mut st, NodeOp::MulI),
                    Insn::IAnd => self.binop(&mut st, NodeOp::AndI),
                    Insn::IOr => self.binop(&mut st, NodeOp::OrI),
                    Insn::IXor => self.binop(&mut st, NodeOp::XorI),
                    Insn::IShl => self.binop(&mut st, NodeOp::ShlI),
                    Insn::IShr => self.binop(&mut st, NodeOp::ShrI),
                    Insn::IUShr => self.binop(&mut st, NodeOp::UShrI),
                    Insn::INeg => {
                        let x = pop(&mut st);
                        let z = self.data(NodeOp::ConI(0), &[]);
                        let n = self.data(NodeOp::SubI, &[NodeId::NONE, z, x]);
                        st.stack.push(n);
                    }
                    Insn::IDiv => self.div_rem(ctx, &mut st, bci, NodeOp::DivI, false)?,
                    Insn::IRem => self.div_rem(ctx, &mut st, bci, NodeOp::RemI, false)?,

                    Insn::LAdd => self.binop(&mut st, NodeOp::AddL),
                    Insn::LSub => self.binop(&mut st, NodeOp::SubL),
                    Insn::LMul => self.binop(&mut st, NodeOp::MulL),
                    Insn::LAnd => self.binop(&mut st, NodeOp::AndL),
                    Insn::LOr => self.binop(&mut st, NodeOp::OrL),
                    Insn::LXor => self.binop(&mut st, NodeOp::XorL),
                    Insn::LShl => self.binop(&mut st, NodeOp::ShlL),
                    Insn::LShr => self.binop(&mut st, NodeOp::ShrL),
                    Insn::LUShr => self.binop(&mut st, NodeOp::UShrL),
                    Insn::LNeg => {
                        let x = pop(&mut st);
                        let z = self.data(NodeOp::ConL(0), &[]);
                        let n = self.data(NodeOp::SubL, &[NodeId::NONE, z, x]);
                        st.stack.push(n);
                    }
                    Insn::LDiv => self.div_rem(ctx, &mut st, bci, NodeOp::DivL, true)?,
                    Insn::LRem => self.div_rem(ctx, &mut st, bci, NodeOp::RemL, true)?,
                    Insn::LCmp => self.binop(&mut st, NodeOp::LCmpV),

                    Insn::DAdd => self.binop(&mut st, NodeOp::AddD),
                    Insn::DSub => self.binop(&mut st, NodeOp::SubD),
                    Insn::DMul => self.binop(&mut st, NodeOp::MulD),
                    Insn::DDiv => self.binop(&mut st, NodeOp::DivD),
                    Insn::DRem => self.binop(&mut st, NodeOp::RemD),
                    Insn::DNeg => {
                        let x = pop(&mut st);
                        let n = self.data(NodeOp::NegD, &[NodeId::NONE, x]);
                        st.stack.push(n);
                    }
                    Insn::DCmpL => self.binop(&mut st, NodeOp::DCmpL),
                    Insn::DCmpG => self.binop(&mut st, NodeOp::DCmpG),

                    Insn::I2L => self.unop(&mut st, NodeOp::ConvI2L),
                    Insn::L2I => self.unop(&mut st, NodeOp::ConvL2I),
                    Insn::I2D => self.unop(&mut st, NodeOp::ConvI2D),
                    Insn::D2I => self.unop(&mut st, NodeOp::ConvD2I),
                    Insn::L2D => self.unop(&mut st, NodeOp::ConvL2D),
                    Insn::D2L => self.unop(&mut st, NodeOp::ConvD2L),

                    Insn::Goto(t) => {
                        self.record_edge(ctx, t, bci, st.clone(), &mut pending, &mut headers);
                        break 'block;
                    }
                    Insn::IfEq(t) | Insn::IfNe(t) | Insn::IfLt(t) | Insn::IfGe(t)
                    | Insn::IfGt(t) | Insn::IfLe(t) | Insn::IfICmpEq(t) | Insn::IfICmpNe(t)
                    | Insn::IfICmpLt(t) | Insn::IfICmpGe(t) | Insn::IfICmpGt(t)
                    | Insn::IfICmpLe(t) | Insn::IfNull(t) | Insn::IfNonNull(t) => {
                        self.branch(ctx, insn, t, bci, st.clone(), &mut pending, &mut headers);
                        break 'block;
                    }

                    Insn::NewArr(ak) => self.new_arr(ctx, &mut st, bci, ak)?,
                    Insn::ArrayLen => {
                        let arr = pop(&mut st);
                        let ctrl = self.null_guard(ctx, &mut st, bci, arr)?;
                        let n = self.data(NodeOp::ArrayLen, &[ctrl, arr]);
                        st.stack.push(n);
                    }
                    Insn::IALoad => self.arr_load(ctx, &mut st, bci, ArrayKind::I32)?,
                    Insn::LALoad => self.arr_load(ctx, &mut st, bci, ArrayKind::I64)?,
                    Insn::DALoad => self.arr_load(ctx, &mut st, bci, ArrayKind::F64)?,
                    Insn::IAStore => self.arr_store(ctx, &mut st, bci, ArrayKind::I32)?,
                    Insn::LAStore => self.arr_store(ctx, &mut st, bci, ArrayKind::I64)?,
                    Insn::DAStore => self.arr_store(ctx, &mut st, bci, ArrayKind::F64)?,

                    Insn::GetGlobal(gi) => {
                        let slice = Slice::Global(gi).index();
                        let n = self.g.add(NodeOp::LoadGlobal(gi), &[st.ctrl, st.mem[slice]]);
                        let k = self.module.globals[gi as usize].kind;
                        let ty = kind_ty(&mut self.g.tys, k);
                        self.g.set_ty(n, ty);
                        let n = self.xform(n);
                        st.stack.push(n);
                    }
                    Insn::SetGlobal(gi) => {
                        let v = pop(&mut st);
                        let slice = Slice::Global(gi).index();
                        let n = self
                            .g
                            .add(NodeOp::StoreGlobal(gi), &[st.ctrl, st.mem[slice], v]);
                        st.mem[slice] = self.xform(n);
                    }

                    Insn::Call(midx) => {
                        let done = self.call(ctx, &mut st, bci, MethodId(midx))?;
                        if done {
                            // The callee never returns; the rest of this
                            // block is unreachable.
                            break 'block;
                        }
                    }

                    Insn::Ret | Insn::IRet | Insn::LRet | Insn::DRet | Insn::ARet => {
                        let value = if matches!(insn, Insn::Ret) {
                            None
                        } else {
                            Some(pop(&mut st))
                        };
                        if ctx.inline {
                            exits.push(InlineExit {
                                ctrl: st.ctrl,
                                value,
                                mem: st.mem.clone(),
                            });
                        } else {
                            let mut inputs = vec![st.ctrl, value.unwrap_or(NodeId::NONE)];
                            inputs.extend(st.mem.iter().copied());
                            let ret = self.g.add(NodeOp::Return, &[]);
                            for inp in inputs {
                                self.g.add_input(ret, inp);
                            }
                            self.g.set_ty(ret, TyId::CTRL);
                            self.g.add_exit(ret);
                        }
                        break 'block;
                    }
                }
                bci += 1;
            }

            // Fall through into the next block.
            if bci == bend && bend < u32::try_from(code.len()).unwrap_or(u32::MAX) {
                self.record_edge(ctx, bend, bci, st, &mut pending, &mut headers);
            }
        }

        Ok(exits)
    }

    // --- node helpers -------------------------------------------------

    /// Add a data node and run it through parse-time GVN.
    fn data(&mut self, op: NodeOp, inputs: &[NodeId]) -> NodeId {
        let n = self.g.add(op, inputs);
        self.xform(n)
    }

    fn xform(&mut self, n: NodeId) -> NodeId {
        let m = self.gvn.transform(&mut self.g, n);
        if m != n && self.g.outputs(n).is_empty() {
            self.g.kill(n);
        }
        m
    }

    fn binop(&mut self, st: &mut FrameSt, op: NodeOp) {
        let b = pop(st);
        let a = pop(st);
        let n = self.data(op, &[NodeId::NONE, a, b]);
        st.stack.push(n);
    }

    fn unop(&mut self, st: &mut FrameSt, op: NodeOp) {
        let x = pop(st);
        let n = self.data(op, &[NodeId::NONE, x]);
        st.stack.push(n);
    }

    fn check_budget(&self) -> Result<(), BuildError> {
        if self.g.len() > self.opts.node_budget {
            return Err(BuildError::NodeBudget { limit: self.opts.node_budget });
        }
        Ok(())
    }

    // --- frame state capture ------------------------------------------

    fn frame_desc(&self, ctx: &MCtx, st: &FrameSt, bci: u32) -> FrameDesc {
        FrameDesc {
            mid: ctx.mid,
            bci,
            n_locals: u16::try_from(st.locals.len()).unwrap_or(u16::MAX),
            n_stack: u16::try_from(st.stack.len()).unwrap_or(u16::MAX),
            caller: ctx.caller.clone().map(Box::new),
        }
    }

    /// Append memory and captured frame values to a safepoint-class node.
    fn append_state(&mut self, n: NodeId, ctx: &MCtx, st: &FrameSt) {
        for &m in &st.mem {
            self.g.add_input(n, m);
        }
        let filler = self.data(NodeOp::ConI(0), &[]);
        for &v in ctx
            .outer_vals
            .iter()
            .chain(st.locals.iter())
            .chain(st.stack.iter())
        {
            let v = if v.is_some() { v } else { filler };
            self.g.add_input(n, v);
        }
    }

    /// Insert a safepoint in the control chain, capturing `st`.
    fn safepoint(&mut self, ctx: &MCtx, st: &mut FrameSt, bci: u32) {
        let sp = self.g.add(NodeOp::Safepoint, &[st.ctrl]);
        self.append_state(sp, ctx, st);
        self.g.set_ty(sp, TyId::CTRL);
        let desc = self.frame_desc(ctx, st, bci);
        self.g.frames.insert(sp, desc);
        st.ctrl = sp;
    }

    /// Emit a trap exit on `ctrl`, capturing `st` for frame rebuilding.
    fn trap(&mut self, ctx: &MCtx, st: &FrameSt, bci: u32, ctrl: NodeId, reason: Reason) {
        let t = self.g.add(NodeOp::Trap(reason), &[ctrl]);
        self.append_state(t, ctx, st);
        self.g.set_ty(t, TyId::CTRL);
        let desc = self.frame_desc(ctx, st, bci);
        self.g.frames.insert(t, desc);
        self.g.add_exit(t);
    }

    /// Emit a runtime-error exit on `ctrl` (slow path, no deopt).
    fn raise(&mut self, ctrl: NodeId, kind: RaiseKind, args: &[NodeId]) {
        let r = self.g.add(NodeOp::Raise(kind), &[ctrl]);
        for &a in args {
            self.g.add_input(r, a);
        }
        self.g.set_ty(r, TyId::CTRL);
        self.g.add_exit(r);
    }

    // --- guards -------------------------------------------------------

    /// Branch on `cond`; the true side runs the failure path (trap or
    /// raise), the false side continues. Returns the surviving control.
    fn guard(
        &mut self,
        ctx: &MCtx,
        st: &FrameSt,
        bci: u32,
        ctrl: NodeId,
        cond: NodeId,
        reason: Reason,
        slow: Option<(RaiseKind, Vec<NodeId>)>,
        range_check: bool,
    ) -> NodeId {
        let op = if range_check { NodeOp::RangeCheck } else { NodeOp::If };
        let iff = self.g.add(op, &[ctrl, cond]);
        let tt = self.g.tys.tuple(&[TyId::CTRL, TyId::CTRL]);
        self.g.set_ty(iff, tt);
        let fail = self.g.add(NodeOp::IfTrue, &[iff]);
        self.g.set_ty(fail, TyId::CTRL);
        let ok = self.g.add(NodeOp::IfFalse, &[iff]);
        self.g.set_ty(ok, TyId::CTRL);
        match slow {
            Some((kind, args)) => self.raise(fail, kind, &args),
            None => self.trap(ctx, st, bci, fail, reason),
        }
        ok
    }

    /// Null check an array reference; returns the not-null control.
    fn null_guard(
        &mut self,
        ctx: &MCtx,
        st: &mut FrameSt,
        bci: u32,
        arr: NodeId,
    ) -> Result<NodeId, BuildError> {
        self.check_budget()?;
        let null = self.data(NodeOp::ConNull, &[]);
        let cmp = self.data(NodeOp::CmpP, &[NodeId::NONE, arr, null]);
        let is_null = self.data(NodeOp::Bool(BoolTest::Eq), &[NodeId::NONE, cmp]);
        let slow = if self.profiles.too_many_traps(ctx.mid, bci, Reason::NullCheck) {
            Some((RaiseKind::NullDeref, Vec::new()))
        } else {
            None
        };
        let ok = self.guard(ctx, st, bci, st.ctrl, is_null, Reason::NullCheck, slow, false);
        st.ctrl = ok;
        Ok(ok)
    }

    /// Range check `idx <u len`; returns the in-bounds control.
    fn range_guard(
        &mut self,
        ctx: &MCtx,
        st: &mut FrameSt,
        bci: u32,
        arr: NodeId,
        idx: NodeId,
    ) -> Result<NodeId, BuildError> {
        let len = self.data(NodeOp::ArrayLen, &[st.ctrl, arr]);
        let cmp = self.data(NodeOp::CmpU, &[NodeId::NONE, idx, len]);
        // Out of bounds when NOT (idx <u len).
        let oob = self.data(NodeOp::Bool(BoolTest::Ge), &[NodeId::NONE, cmp]);
        let slow = if self.profiles.too_many_traps(ctx.mid, bci, Reason::RangeCheck) {
            Some((RaiseKind::IndexOutOfBounds, vec![idx, len]))
        } else {
            None
        };
        let ok = self.guard(ctx, st, bci, st.ctrl, oob, Reason::RangeCheck, slow, true);
        st.ctrl = ok;
        Ok(ok)
    }

    fn arr_load(
        &mut self,
        ctx: &MCtx,
        st: &mut FrameSt,
        bci: u32,
        ak: ArrayKind,
    ) -> Result<(), BuildError> {
        let idx = pop(st);
        let arr = pop(st);
        self.null_guard(ctx, st, bci, arr)?;
        let ctrl = self.range_guard(ctx, st, bci, arr, idx)?;
        let slice = Slice::Elem(ak).index();
        let n = self.data(NodeOp::LoadArr(ak), &[ctrl, st.mem[slice], arr, idx]);
        st.stack.push(n);
        Ok(())
    }

    fn arr_store(
        &mut self,
        ctx: &MCtx,
        st: &mut FrameSt,
        bci: u32,
        ak: ArrayKind,
    ) -> Result<(), BuildError> {
        let v = pop(st);
        let idx = pop(st);
        let arr = pop(st);
        self.null_guard(ctx, st, bci, arr)?;
        let ctrl = self.range_guard(ctx, st, bci, arr, idx)?;
        let slice = Slice::Elem(ak).index();
        let n = self.data(NodeOp::StoreArr(ak), &[ctrl, st.mem[slice], arr, idx, v]);
        st.mem[slice] = n;
        Ok(())
    }

    fn new_arr(
        &mut self,
        ctx: &MCtx,
        st: &mut FrameSt,
        bci: u32,
        ak: ArrayKind,
    ) -> Result<(), BuildError> {
        self.check_budget()?;
        let len = pop(st);
        let z = self.data(NodeOp::ConI(0), &[]);
        let cmp = self.data(NodeOp::CmpI, &[NodeId::NONE, len, z]);
        let neg = self.data(NodeOp::Bool(BoolTest::Lt), &[NodeId::NONE, cmp]);
        let ctrl = self.guard(
            ctx,
            st,
            bci,
            st.ctrl,
            neg,
            Reason::None,
            Some((RaiseKind::NegativeArraySize, vec![len])),
            false,
        );
        st.ctrl = ctrl;
        let slice = Slice::Elem(ak).index();
        let na = self.g.add(NodeOp::NewArr(ak), &[ctrl, st.mem[slice], len]);
        let na = self.xform(na);
        let r = self.data(NodeOp::Proj(0), &[na]);
        let m = self.data(NodeOp::Proj(1), &[na]);
        st.mem[slice] = m;
        st.stack.push(r);
        Ok(())
    }

    fn div_rem(
        &mut self,
        ctx: &MCtx,
        st: &mut FrameSt,
        bci: u32,
        op: NodeOp,
        long: bool,
    ) -> Result<(), BuildError> {
        self.check_budget()?;
        let b = pop(st);
        let a = pop(st);
        let (cmp_op, zero) = if long {
            let z = self.data(NodeOp::ConL(0), &[]);
            (NodeOp::CmpL, z)
        } else {
            let z = self.data(NodeOp::ConI(0), &[]);
            (NodeOp::CmpI, z)
        };
        let cmp = self.data(cmp_op, &[NodeId::NONE, b, zero]);
        let is_zero = self.data(NodeOp::Bool(BoolTest::Eq), &[NodeId::NONE, cmp]);
        let slow = if self.profiles.too_many_traps(ctx.mid, bci, Reason::DivZeroCheck) {
            Some((RaiseKind::DivByZero, Vec::new()))
        } else {
            None
        };
        let ctrl = self.guard(ctx, st, bci, st.ctrl, is_zero, Reason::DivZeroCheck, slow, false);
        st.ctrl = ctrl;
        // Division keeps its control edge so it cannot float above the
        // zero check.
        let n = self.data(op, &[ctrl, a, b]);
        st.stack.push(n);
        Ok(())
    }

    // --- control flow -------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn branch(
        &mut self,
        ctx: &MCtx,
        insn: Insn,
        target: u32,
        bci: u32,
        mut st: FrameSt,
        pending: &mut FxHashMap<u32, Vec<FrameSt>>,
        headers: &mut FxHashMap<u32, HeaderInfo>,
    ) {
        let cond = self.branch_cond(insn, &mut st);
        let fall = bci + 1;

        // Profile pruning: a side the interpreter never took parses into an
        // uncommon trap instead of real code.
        let prune = self
            .profiles
            .profile(ctx.mid)
            .and_then(|p| p.branch(bci))
            .filter(|c| c.total() >= self.opts.prune_min_total)
            .filter(|_| !self.profiles.too_many_traps(ctx.mid, bci, Reason::Unreached))
            .and_then(|c| match (c.taken, c.not_taken) {
                (0, _) => Some(true),  // taken side unreached
                (_, 0) => Some(false), // fallthrough side unreached
                _ => None,
            });

        let iff = self.g.add(NodeOp::If, &[st.ctrl, cond]);
        let tt = self.g.tys.tuple(&[TyId::CTRL, TyId::CTRL]);
        self.g.set_ty(iff, tt);
        let on_true = self.g.add(NodeOp::IfTrue, &[iff]);
        self.g.set_ty(on_true, TyId::CTRL);
        let on_false = self.g.add(NodeOp::IfFalse, &[iff]);
        self.g.set_ty(on_false, TyId::CTRL);

        match prune {
            Some(true) => {
                self.trap(ctx, &st, bci, on_true, Reason::Unreached);
                st.ctrl = on_false;
                self.record_edge(ctx, fall, bci, st, pending, headers);
            }
            Some(false) => {
                self.trap(ctx, &st, bci, on_false, Reason::Unreached);
                st.ctrl = on_true;
                self.record_edge(ctx, target, bci, st, pending, headers);
            }
            None => {
                let mut taken = st.clone();
                taken.ctrl = on_true;
                self.record_edge(ctx, target, bci, taken, pending, headers);
                st.ctrl = on_false;
                self.record_edge(ctx, fall, bci, st, pending, headers);
            }
        }
    }

    /// The `Bool` condition for a conditional branch insn.
    fn branch_cond(&mut self, insn: Insn, st: &mut FrameSt) -> NodeId {
        let (cmp, test) = match insn {
            Insn::IfEq(_) | Insn::IfNe(_) | Insn::IfLt(_) | Insn::IfGe(_) | Insn::IfGt(_)
            | Insn::IfLe(_) => {
                let v = pop(st);
                let z = self.data(NodeOp::ConI(0), &[]);
                let cmp = self.data(NodeOp::CmpI, &[NodeId::NONE, v, z]);
                let test = match insn {
                    Insn::IfEq(_) => BoolTest::Eq,
                    Insn::IfNe(_) => BoolTest::Ne,
                    Insn::IfLt(_) => BoolTest::Lt,
                    Insn::IfGe(_) => BoolTest::Ge,
                    Insn::IfGt(_) => BoolTest::Gt,
                    _ => BoolTest::Le,
                };
                (cmp, test)
            }
            Insn::IfICmpEq(_) | Insn::IfICmpNe(_) | Insn::IfICmpLt(_) | Insn::IfICmpGe(_)
            | Insn::IfICmpGt(_) | Insn::IfICmpLe(_) => {
                let b = pop(st);
                let a = pop(st);
                let cmp = self.data(NodeOp::CmpI, &[NodeId::NONE, a, b]);
                let test = match insn {
                    Insn::IfICmpEq(_) => BoolTest::Eq,
                    Insn::IfICmpNe(_) => BoolTest::Ne,
                    Insn::IfICmpLt(_) => BoolTest::Lt,
                    Insn::IfICmpGe(_) => BoolTest::Ge,
                    Insn::IfICmpGt(_) => BoolTest::Gt,
                    _ => BoolTest::Le,
                };
                (cmp, test)
            }
            Insn::IfNull(_) | Insn::IfNonNull(_) => {
                let v = pop(st);
                let null = self.data(NodeOp::ConNull, &[]);
                let cmp = self.data(NodeOp::CmpP, &[NodeId::NONE, v, null]);
                let test = if matches!(insn, Insn::IfNull(_)) {
                    BoolTest::Eq
                } else {
                    BoolTest::Ne
                };
                (cmp, test)
            }
            _ => unreachable!("not a conditional branch"),
        };
        self.data(NodeOp::Bool(test), &[NodeId::NONE, cmp])
    }

    /// Send `st` along an edge to `target`. Backward edges get a safepoint
    /// and fill the target loop header; forward edges queue up.
    fn record_edge(
        &mut self,
        ctx: &MCtx,
        target: u32,
        from_bci: u32,
        mut st: FrameSt,
        pending: &mut FxHashMap<u32, Vec<FrameSt>>,
        headers: &mut FxHashMap<u32, HeaderInfo>,
    ) {
        if target <= from_bci {
            // Backedge: poll point, then wire into the loop header.
            self.safepoint(ctx, &mut st, from_bci);
            if let Some(h) = headers.get(&target) {
                self.fill_backedge(h, &st);
                return;
            }
        }
        pending.entry(target).or_default().push(st);
    }

    fn fill_backedge(&mut self, h: &HeaderInfo, st: &FrameSt) {
        let values: Vec<NodeId> = st
            .locals
            .iter()
            .chain(st.stack.iter())
            .copied()
            .collect();
        match &h.back {
            Some(bm) => {
                self.g.add_input(bm.region, st.ctrl);
                for (i, &bphi) in bm.phis.iter().enumerate() {
                    if bphi.is_some() {
                        self.g.add_input(bphi, values.get(i).copied().unwrap_or(NodeId::NONE));
                    }
                }
                for (s, &mphi) in bm.memphis.iter().enumerate() {
                    self.g.add_input(mphi, st.mem[s]);
                }
            }
            None => {
                self.g.set_input(h.head, 1, st.ctrl);
                for (i, &phi) in h.phis.iter().enumerate() {
                    if phi.is_some() {
                        self.g
                            .set_input(phi, 2, values.get(i).copied().unwrap_or(NodeId::NONE));
                    }
                }
                for (s, &mphi) in h.memphis.iter().enumerate() {
                    self.g.set_input(mphi, 2, st.mem[s]);
                }
            }
        }
    }

    /// Merge several forward arrivals with a plain region and phis.
    fn merge_plain(&mut self, arrivals: Vec<FrameSt>) -> FrameSt {
        let ctrls: Vec<NodeId> = arrivals.iter().map(|a| a.ctrl).collect();
        let region = self.g.add(NodeOp::Region, &[]);
        for c in ctrls {
            self.g.add_input(region, c);
        }
        self.g.set_ty(region, TyId::CTRL);

        let first = &arrivals[0];
        let n_locals = first.locals.len();
        let depth = first.stack.len();
        let n_slices = first.mem.len();

        let mut locals = Vec::with_capacity(n_locals);
        for i in 0..n_locals {
            locals.push(self.merge_slot(region, &arrivals, |a| a.locals[i]));
        }
        let mut stack = Vec::with_capacity(depth);
        for i in 0..depth {
            stack.push(self.merge_slot(region, &arrivals, |a| a.stack[i]));
        }
        let mut mem = Vec::with_capacity(n_slices);
        for s in 0..n_slices {
            let vals: Vec<NodeId> = arrivals.iter().map(|a| a.mem[s]).collect();
            if vals.iter().all(|&v| v == vals[0]) {
                mem.push(vals[0]);
            } else {
                let phi = self.g.add(NodeOp::MemPhi(Slice::from_index(s)), &[region]);
                for v in vals {
                    self.g.add_input(phi, v);
                }
                self.g.set_ty(phi, TyId::MEM);
                mem.push(self.xform(phi));
            }
        }
        FrameSt { locals, stack, mem, ctrl: region }
    }

    fn merge_slot(
        &mut self,
        region: NodeId,
        arrivals: &[FrameSt],
        get: impl Fn(&FrameSt) -> NodeId,
    ) -> NodeId {
        let vals: Vec<NodeId> = arrivals.iter().map(&get).collect();
        if vals.iter().any(|v| v.is_none()) {
            return NodeId::NONE; // dead past the merge
        }
        if vals.iter().all(|&v| v == vals[0]) {
            return vals[0];
        }
        let mut ty = TyId::TOP;
        for &v in &vals {
            let vt = self.g.ty(v);
            ty = self.g.tys.meet(ty, vt);
        }
        let kind = phi_kind(&self.g.tys, ty);
        let phi = self.g.add(NodeOp::Phi(kind), &[region]);
        for v in vals {
            self.g.add_input(phi, v);
        }
        self.g.set_ty(phi, ty);
        self.xform(phi)
    }

    /// Build the loop-header structures: entry merge, entry safepoint,
    /// `LoopHead`, and a phi for every live slot with its backedge input
    /// left open (or routed through a backedge merge region).
    fn open_loop(
        &mut self,
        ctx: &MCtx,
        bstart: u32,
        arrivals: Vec<FrameSt>,
        n_back: u32,
        headers: &mut FxHashMap<u32, HeaderInfo>,
    ) -> Result<FrameSt, BuildError> {
        self.check_budget()?;
        let mut entry = if arrivals.len() == 1 {
            arrivals.into_iter().next().unwrap_or_else(|| unreachable!())
        } else {
            self.merge_plain(arrivals)
        };
        // A deopt point above the loop: loop predicates inserted later
        // hang their traps off this state.
        self.safepoint(ctx, &mut entry, bstart);

        let head = self
            .g
            .add(NodeOp::LoopHead(anvil_ir::LoopFlavor::Plain), &[entry.ctrl, NodeId::NONE]);
        self.g.set_ty(head, TyId::CTRL);

        let back = if n_back > 1 {
            let region = self.g.add(NodeOp::Region, &[]);
            self.g.set_ty(region, TyId::CTRL);
            self.g.set_input(head, 1, region);
            Some(region)
        } else {
            None
        };

        let n_locals = entry.locals.len();
        let slot_inits: Vec<NodeId> = entry
            .locals
            .iter()
            .chain(entry.stack.iter())
            .copied()
            .collect();

        let mut phis = Vec::with_capacity(slot_inits.len());
        let mut back_phis = Vec::with_capacity(slot_inits.len());
        for &init in &slot_inits {
            if init.is_none() {
                phis.push(NodeId::NONE);
                back_phis.push(NodeId::NONE);
                continue;
            }
            let kind = phi_kind(&self.g.tys, self.g.ty(init));
            let bsrc = if let Some(region) = back {
                let bphi = self.g.add(NodeOp::Phi(kind), &[region]);
                let bt = bottom_of(kind);
                self.g.set_ty(bphi, bt);
                back_phis.push(bphi);
                bphi
            } else {
                back_phis.push(NodeId::NONE);
                NodeId::NONE
            };
            let phi = self.g.add(NodeOp::Phi(kind), &[head, init, bsrc]);
            let bt = bottom_of(kind);
            self.g.set_ty(phi, bt);
            phis.push(phi);
        }

        let mut memphis = Vec::with_capacity(entry.mem.len());
        let mut back_memphis = Vec::with_capacity(entry.mem.len());
        for (s, &init) in entry.mem.iter().enumerate() {
            let slice = Slice::from_index(s);
            let bsrc = if let Some(region) = back {
                let bphi = self.g.add(NodeOp::MemPhi(slice), &[region]);
                self.g.set_ty(bphi, TyId::MEM);
                back_memphis.push(bphi);
                bphi
            } else {
                NodeId::NONE
            };
            let phi = self.g.add(NodeOp::MemPhi(slice), &[head, init, bsrc]);
            self.g.set_ty(phi, TyId::MEM);
            memphis.push(phi);
        }

        let state = FrameSt {
            locals: phis[..n_locals].to_vec(),
            stack: phis[n_locals..].to_vec(),
            mem: memphis.clone(),
            ctrl: head,
        };
        headers.insert(
            bstart,
            HeaderInfo {
                head,
                phis,
                memphis,
                back: back.map(|region| BackMerge {
                    region,
                    phis: back_phis,
                    memphis: back_memphis,
                }),
            },
        );
        Ok(state)
    }

    // --- calls --------------------------------------------------------

    /// Parse a static call, inlining when the policy allows. Returns true
    /// when the callee provably never returns.
    fn call(
        &mut self,
        ctx: &MCtx,
        st: &mut FrameSt,
        bci: u32,
        callee_id: MethodId,
    ) -> Result<bool, BuildError> {
        self.check_budget()?;
        let callee = self.module.method(callee_id);
        let argc = callee.n_params();
        self.g.deps.push(Dependency::MethodBody {
            mid: callee_id,
            version: self.profiles.method_version(callee_id),
        });

        let inline = callee.code.len() <= self.opts.inline_insn_limit
            && ctx.inline_stack.len() < self.opts.inline_depth_limit
            && !ctx.inline_stack.contains(&callee_id);

        if inline {
            return self.inline_call(ctx, st, bci, callee_id, callee, argc);
        }

        // Out-of-line call: capture the pre-call state so a deopt at the
        // call site re-executes the call in the interpreter.
        let pre = st.clone();
        let desc = self.frame_desc(ctx, &pre, bci);
        let args: Vec<NodeId> = st.stack.split_off(st.stack.len() - argc);
        let call = self.g.add(
            NodeOp::CallStatic {
                mid: callee_id,
                argc: u8::try_from(argc).unwrap_or(u8::MAX),
            },
            &[st.ctrl],
        );
        for &a in &args {
            self.g.add_input(call, a);
        }
        self.append_state(call, ctx, &pre);
        self.g.frames.insert(call, desc);

        let ret_ty = match callee.ret {
            Some(k) => kind_ty(&mut self.g.tys, k),
            None => TyId::TOP,
        };
        let mut elems = vec![TyId::CTRL, ret_ty];
        elems.extend(std::iter::repeat(TyId::MEM).take(st.mem.len()));
        let call_ty = self.g.tys.tuple(&elems);
        self.g.set_ty(call, call_ty);

        let cproj = self.data(NodeOp::Proj(0), &[call]);
        st.ctrl = cproj;
        if callee.ret.is_some() {
            let r = self.data(NodeOp::Proj(1), &[call]);
            st.stack.push(r);
        }
        for s in 0..st.mem.len() {
            let mp = self.data(NodeOp::Proj(u32::try_from(2 + s).unwrap_or(u32::MAX)), &[call]);
            st.mem[s] = mp;
        }
        Ok(false)
    }

    fn inline_call(
        &mut self,
        ctx: &MCtx,
        st: &mut FrameSt,
        bci: u32,
        callee_id: MethodId,
        callee: &Method,
        argc: usize,
    ) -> Result<bool, BuildError> {
        let args: Vec<NodeId> = st.stack.split_off(st.stack.len() - argc);

        // Frames captured inside the inlinee chain back to this call site;
        // the caller resumes after the call with the arguments consumed.
        let caller_desc = FrameDesc {
            mid: ctx.mid,
            bci: bci + 1,
            n_locals: u16::try_from(st.locals.len()).unwrap_or(u16::MAX),
            n_stack: u16::try_from(st.stack.len()).unwrap_or(u16::MAX),
            caller: ctx.caller.clone().map(Box::new),
        };
        let mut outer_vals = ctx.outer_vals.clone();
        let filler = self.data(NodeOp::ConI(0), &[]);
        for &v in st.locals.iter().chain(st.stack.iter()) {
            outer_vals.push(if v.is_some() { v } else { filler });
        }
        let mut inline_stack = ctx.inline_stack.clone();
        inline_stack.push(callee_id);

        let callee_ctx = MCtx {
            mid: callee_id,
            caller: Some(caller_desc),
            outer_vals,
            inline: true,
            inline_stack,
        };
        let mut locals = vec![NodeId::NONE; callee.max_locals as usize];
        locals[..argc].copy_from_slice(&args);
        let entry = FrameSt {
            locals,
            stack: Vec::new(),
            mem: st.mem.clone(),
            ctrl: st.ctrl,
        };

        let exits = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || {
            self.parse_method(&callee_ctx, callee, entry)
        })?;

        match exits.len() {
            0 => Ok(true), // never returns
            1 => {
                let e = exits.into_iter().next().unwrap_or_else(|| unreachable!());
                st.ctrl = e.ctrl;
                st.mem = e.mem;
                if let Some(v) = e.value {
                    st.stack.push(v);
                }
                Ok(false)
            }
            _ => {
                // Merge the callee's returns.
                let region = self.g.add(NodeOp::Region, &[]);
                for e in &exits {
                    self.g.add_input(region, e.ctrl);
                }
                self.g.set_ty(region, TyId::CTRL);
                if callee.ret.is_some() {
                    let first = exits[0].value.unwrap_or(NodeId::NONE);
                    let kind = phi_kind(&self.g.tys, self.g.ty(first));
                    let phi = self.g.add(NodeOp::Phi(kind), &[region]);
                    for e in &exits {
                        self.g.add_input(phi, e.value.unwrap_or(NodeId::NONE));
                    }
                    let bt = bottom_of(kind);
                    self.g.set_ty(phi, bt);
                    let phi = self.xform(phi);
                    st.stack.push(phi);
                }
                for s in 0..st.mem.len() {
                    let vals: Vec<NodeId> = exits.iter().map(|e| e.mem[s]).collect();
                    if vals.iter().all(|&v| v == vals[0]) {
                        st.mem[s] = vals[0];
                    } else {
                        let phi = self.g.add(NodeOp::MemPhi(Slice::from_index(s)), &[region]);
                        for v in vals {
                            self.g.add_input(phi, v);
                        }
                        self.g.set_ty(phi, TyId::MEM);
                        st.mem[s] = self.xform(phi);
                    }
                }
                st.ctrl = region;
                Ok(false)
            }
        }
    }
}

fn pop(st: &mut FrameSt) -> NodeId {
    st.stack.pop().unwrap_or(NodeId::NONE)
}

/// Bottom lattice type of a value kind.
fn kind_ty(p: &mut TyPool, k: Kind) -> TyId {
    match k {
        Kind::I32 => TyId::INT,
        Kind::I64 => TyId::LONG,
        Kind::F64 => TyId::DOUBLE,
        Kind::Ref(ak) => p.array_ref(
            ak,
            IntRange { lo: 0, hi: i32::MAX, widen: 0 },
            true,
        ),
    }
}

fn phi_kind(p: &TyPool, ty: TyId) -> PhiKind {
    match p.get(ty) {
        TyData::Long(_) => PhiKind::I64,
        TyData::DoubleCon(_) | TyData::Double | TyData::DoubleTop => PhiKind::F64,
        // Verified bytecode only reaches bot by mixing reference types.
        TyData::Null | TyData::Ref(_) | TyData::Bot => PhiKind::Ref,
        _ => PhiKind::I32,
    }
}

/// Sound starting type for a loop phi whose backedge value is not yet
/// known. Refs fall to bot rather than guessing an element kind.
fn bottom_of(kind: PhiKind) -> TyId {
    match kind {
        PhiKind::I32 => TyId::INT,
        PhiKind::I64 => TyId::LONG,
        PhiKind::F64 => TyId::DOUBLE,
        PhiKind::Ref => TyId::BOT,
    }
}

#[cfg(test)]
#[path = "build/tests.rs"]
mod tests;
