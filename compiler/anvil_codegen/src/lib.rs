//! Back end of the optimizing compiler.
//!
//! Takes a method through the whole pipeline: graph construction from
//! bytecode, iterative value numbering, the loop portfolio, conditional
//! constant propagation, then global code motion, lowering to LIR and
//! register allocation. The product is an [`Artifact`] the runtime can
//! execute directly or serialize into its disk cache.
//!
//! The pieces are public so tools can stop the pipeline mid-way and
//! inspect the graph or the schedule; [`compile`] is the one-call path
//! the runtime uses.

pub mod lir;
mod lower;
mod regalloc;
pub mod schedule;

use std::fmt;
use std::hash::{Hash, Hasher};

use anvil_bc::{MethodId, Module};
use anvil_ir::Graph;
use anvil_loop::LoopOpts;
use anvil_opt::{Ccp, IterGvn, OptError};
use anvil_parse::{build, BuildError, BuildOpts, ProfileSource};
use rustc_hash::FxHasher;
use tracing::debug;

pub use lir::{
    Artifact, Cmp3Kind, CmpKind, CompileStats, ConvOp, DeoptRecord, DoubleOp, IntOp, K_REGS,
    LBlock, LInsn, Loc, LongOp, Operand, RegClass, VReg,
};
pub use schedule::{schedule, Block, Schedule};

/// Knobs for the whole pipeline.
#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    pub build: BuildOpts,
    pub loops: LoopOpts,
    /// Run the loop portfolio.
    pub loop_opts: bool,
    /// Run conditional constant propagation after loops.
    pub ccp: bool,
}

impl Default for CompileOptions {
    fn default() -> CompileOptions {
        CompileOptions {
            build: BuildOpts::default(),
            loops: LoopOpts::default(),
            loop_opts: true,
            ccp: true,
        }
    }
}

impl CompileOptions {
    /// Stable fingerprint of every knob, used to key the artifact disk
    /// cache: artifacts built under different options never alias.
    pub fn fingerprint(&self) -> u64 {
        let mut h = FxHasher::default();
        self.build.inline_insn_limit.hash(&mut h);
        self.build.inline_depth_limit.hash(&mut h);
        self.build.prune_min_total.hash(&mut h);
        self.build.node_budget.hash(&mut h);
        self.loops.rounds.hash(&mut h);
        self.loops.full_unroll_trip_limit.hash(&mut h);
        self.loops.unroll_body_limit.hash(&mut h);
        self.loops.node_budget.hash(&mut h);
        self.loop_opts.hash(&mut h);
        self.ccp.hash(&mut h);
        h.finish()
    }
}

/// Compilation gave up; the method stays interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileError {
    Build(BuildError),
    Opt(OptError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Build(e) => write!(f, "graph construction failed: {e}"),
            CompileError::Opt(e) => write!(f, "optimization failed: {e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<BuildError> for CompileError {
    fn from(e: BuildError) -> CompileError {
        CompileError::Build(e)
    }
}

impl From<OptError> for CompileError {
    fn from(e: OptError) -> CompileError {
        CompileError::Opt(e)
    }
}

/// Compile one method of a verified module into a runnable artifact.
pub fn compile(
    module: &Module,
    mid: MethodId,
    profiles: &dyn ProfileSource,
    opts: &CompileOptions,
) -> Result<Artifact, CompileError> {
    let mut g = build(module, mid, profiles, opts.build)?;
    let mut igvn = IterGvn::new();
    igvn.optimize(&mut g)?;
    if opts.loop_opts {
        anvil_loop::optimize(&mut g, &mut igvn, &opts.loops)?;
    }
    if opts.ccp {
        Ccp::analyze_and_apply(&mut g, &mut igvn)?;
    }
    let artifact = emit(&g, mid);
    debug!(
        mid = mid.raw(),
        blocks = artifact.stats.blocks,
        vregs = artifact.stats.vregs,
        spills = artifact.stats.spills,
        "compiled"
    );
    Ok(artifact)
}

/// Back-end half of the pipeline: schedule, lower, allocate.
pub fn emit(g: &Graph, mid: MethodId) -> Artifact {
    let sched = schedule::schedule(g);
    let func = lower::lower(g, &sched);
    let alloc = regalloc::allocate(&func);
    let stats = CompileStats {
        ir_nodes: u32::try_from(g.live_count()).unwrap_or(u32::MAX),
        blocks: u32::try_from(func.blocks.len()).unwrap_or(u32::MAX),
        vregs: u32::try_from(func.classes.len()).unwrap_or(u32::MAX),
        spills: alloc.spills,
    };
    Artifact {
        mid,
        blocks: func.blocks,
        params: func.params,
        classes: func.classes,
        assignment: alloc.assignment,
        frame_size: alloc.frame_size,
        deopts: func.deopts,
        deps: g.deps.clone(),
        stats,
    }
}

#[cfg(test)]
#[path = "lib/tests.rs"]
mod tests;
