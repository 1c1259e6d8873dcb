//! The low-level IR and the compiled artifact.
//!
//! LIR is three-address code over virtual registers, one [`LBlock`] per
//! scheduled block. Compares fuse into branches and guards; a guard that
//! fails hands its [`DeoptRecord`] to the deoptimization machinery instead
//! of raising an error itself. After register allocation every virtual
//! register maps to a physical register or a frame slot, and the whole
//! function ships as an [`Artifact`].

use std::fmt::Write as _;

use anvil_bc::{ArrayKind, MethodId, Value};
use anvil_deopt::{Dependency, FrameDesc, Reason};
use anvil_ir::{BoolTest, RaiseKind};

/// A virtual register.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct VReg(pub u32);

impl VReg {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for VReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Register class of a virtual register.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum RegClass {
    /// Integers, longs and references.
    Gpr,
    /// Doubles.
    Fpr,
}

/// Registers per class.
pub const K_REGS: u8 = 8;

/// Where a virtual register lives after allocation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Loc {
    /// Physical register within the vreg's class.
    Reg(u8),
    /// Spill slot in the frame.
    Slot(u32),
}

/// Right-hand operand: a register or a folded small constant.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    Reg(VReg),
    Imm(i32),
}

/// Which compare feeds a branch, guard or `SetCond`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum CmpKind {
    /// Signed 32-bit.
    I,
    /// Unsigned 32-bit (the range-check shape).
    U,
    /// Signed 64-bit.
    L,
    /// Reference identity (`Eq`/`Ne` only).
    P,
}

/// Integer ALU operation (wrapping, shifts masked to 31).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum IntOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    UShr,
    Min,
    Max,
}

/// Long ALU operation (wrapping, shift counts are ints masked to 63).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum LongOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    UShr,
}

/// Double ALU operation (IEEE-754).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum DoubleOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Three-way compare producing -1/0/1 as an int.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Cmp3Kind {
    /// Long compare.
    L,
    /// Double compare, NaN to -1.
    Dl,
    /// Double compare, NaN to +1.
    Dg,
}

/// Numeric conversion.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum ConvOp {
    I2L,
    L2I,
    I2D,
    /// Saturating: NaN to 0, out-of-range clamped.
    D2I,
    L2D,
    /// Saturating: NaN to 0, out-of-range clamped.
    D2L,
}

/// One LIR instruction.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum LInsn {
    Const {
        dst: VReg,
        value: Value,
    },
    Mov {
        dst: VReg,
        src: VReg,
    },
    AluI {
        op: IntOp,
        dst: VReg,
        a: VReg,
        b: Operand,
    },
    AluL {
        op: LongOp,
        dst: VReg,
        a: VReg,
        b: VReg,
    },
    AluD {
        op: DoubleOp,
        dst: VReg,
        a: VReg,
        b: VReg,
    },
    NegD {
        dst: VReg,
        src: VReg,
    },
    Cmp3 {
        kind: Cmp3Kind,
        dst: VReg,
        a: VReg,
        b: VReg,
    },
    Conv {
        op: ConvOp,
        dst: VReg,
        src: VReg,
    },
    /// Materialize a branch condition as 0/1.
    SetCond {
        kind: CmpKind,
        test: BoolTest,
        dst: VReg,
        a: VReg,
        b: Operand,
    },
    ArrayLen {
        dst: VReg,
        base: VReg,
    },
    /// Array access with bounds and nullness already proven by a
    /// preceding guard or slow path.
    LoadArr {
        kind: ArrayKind,
        dst: VReg,
        base: VReg,
        idx: VReg,
    },
    StoreArr {
        kind: ArrayKind,
        base: VReg,
        idx: VReg,
        src: VReg,
    },
    NewArr {
        kind: ArrayKind,
        dst: VReg,
        len: VReg,
    },
    LoadGlobal {
        dst: VReg,
        global: u16,
    },
    StoreGlobal {
        global: u16,
        src: VReg,
    },
    Call {
        mid: MethodId,
        dst: Option<VReg>,
        args: Vec<VReg>,
        deopt_id: u32,
    },
    /// Deoptimize through the record when the test holds.
    GuardTrap {
        kind: CmpKind,
        test: BoolTest,
        a: VReg,
        b: Operand,
        deopt_id: u32,
    },
    /// Invalidation poll: deopts through the record when the artifact is
    /// no longer entrant.
    Safepoint {
        deopt_id: u32,
    },

    // --- terminators ---
    Jump {
        target: u32,
    },
    Branch {
        kind: CmpKind,
        test: BoolTest,
        a: VReg,
        b: Operand,
        on_true: u32,
        on_false: u32,
    },
    Ret {
        src: Option<VReg>,
    },
    /// Raise a runtime error (slow path, no deopt).
    Raise {
        kind: RaiseKind,
        args: Vec<VReg>,
    },
    /// Unconditional deoptimization (the unfused trap form).
    Deopt {
        deopt_id: u32,
    },
}

impl LInsn {
    /// Instruction that ends its block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            LInsn::Jump { .. }
                | LInsn::Branch { .. }
                | LInsn::Ret { .. }
                | LInsn::Raise { .. }
                | LInsn::Deopt { .. }
        )
    }
}

/// One LIR block.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct LBlock {
    pub insns: Vec<LInsn>,
    /// Loop nesting depth, for spill costs.
    pub loop_depth: u32,
}

/// Everything a deopt site needs to hand execution back to the
/// interpreter: the frame shape and where each captured slot lives.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct DeoptRecord {
    pub reason: Reason,
    pub desc: FrameDesc,
    /// One vreg per flattened frame slot, in descriptor order.
    pub values: Vec<VReg>,
}

/// Compilation counters carried alongside an artifact.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct CompileStats {
    pub ir_nodes: u32,
    pub blocks: u32,
    pub vregs: u32,
    pub spills: u32,
}

/// A compiled method, ready to run or to serialize into the disk cache.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub struct Artifact {
    pub mid: MethodId,
    /// Blocks in reverse postorder; block 0 is the entry.
    pub blocks: Vec<LBlock>,
    /// Where the runner deposits each argument on entry.
    pub params: Vec<VReg>,
    /// Register class per vreg.
    pub classes: Vec<RegClass>,
    /// Location per vreg.
    pub assignment: Vec<Loc>,
    /// Spill slots in the frame.
    pub frame_size: u32,
    pub deopts: Vec<DeoptRecord>,
    /// Assumptions the graph was built under.
    pub deps: Vec<Dependency>,
    pub stats: CompileStats,
}

impl Artifact {
    /// Location of a vreg after allocation.
    #[inline]
    pub fn loc(&self, v: VReg) -> Loc {
        self.assignment[v.index()]
    }

    /// Plain-text dump, one instruction per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "artifact {} ({} blocks, {} vregs, {} spill slots)",
            self.mid,
            self.blocks.len(),
            self.classes.len(),
            self.frame_size
        );
        for (i, b) in self.blocks.iter().enumerate() {
            let _ = writeln!(out, "B{i}: # depth {}", b.loop_depth);
            for insn in &b.insns {
                let _ = writeln!(out, "  {insn:?}");
            }
        }
        out
    }
}
