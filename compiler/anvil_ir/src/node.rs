//! Node operations and their static properties.

use anvil_bc::{ArrayKind, MethodId};
use anvil_deopt::Reason;
use bitflags::bitflags;

use crate::ty::TyId;

bitflags! {
    /// Per-node state bits.
    #[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
    pub struct NodeFlags: u8 {
        /// Node has been killed and must be ignored.
        const DEAD = 1 << 0;
        /// `LoopHead` recognized as a counted loop.
        const COUNTED = 1 << 1;
    }
}

/// Condition a `Bool` node applies to its compare input.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum BoolTest {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BoolTest {
    /// The test on the opposite branch outcome.
    pub fn negate(self) -> BoolTest {
        match self {
            BoolTest::Eq => BoolTest::Ne,
            BoolTest::Ne => BoolTest::Eq,
            BoolTest::Lt => BoolTest::Ge,
            BoolTest::Ge => BoolTest::Lt,
            BoolTest::Gt => BoolTest::Le,
            BoolTest::Le => BoolTest::Gt,
        }
    }

    /// The test after swapping compare operands.
    pub fn commute(self) -> BoolTest {
        match self {
            BoolTest::Eq => BoolTest::Eq,
            BoolTest::Ne => BoolTest::Ne,
            BoolTest::Lt => BoolTest::Gt,
            BoolTest::Gt => BoolTest::Lt,
            BoolTest::Le => BoolTest::Ge,
            BoolTest::Ge => BoolTest::Le,
        }
    }

    /// Apply to a three-way compare outcome (-1/0/+1).
    pub fn eval(self, cc: i32) -> bool {
        match self {
            BoolTest::Eq => cc == 0,
            BoolTest::Ne => cc != 0,
            BoolTest::Lt => cc < 0,
            BoolTest::Le => cc <= 0,
            BoolTest::Gt => cc > 0,
            BoolTest::Ge => cc >= 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BoolTest::Eq => "eq",
            BoolTest::Ne => "ne",
            BoolTest::Lt => "lt",
            BoolTest::Le => "le",
            BoolTest::Gt => "gt",
            BoolTest::Ge => "ge",
        }
    }
}

/// Value kind carried by a `Phi`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PhiKind {
    I32,
    I64,
    F64,
    Ref,
}

/// A memory slice: one per array element kind plus one per global.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub enum Slice {
    Elem(ArrayKind),
    Global(u16),
}

impl Slice {
    /// Canonical dense index; element slices first, then globals.
    pub fn index(self) -> usize {
        match self {
            Slice::Elem(ArrayKind::I32) => 0,
            Slice::Elem(ArrayKind::I64) => 1,
            Slice::Elem(ArrayKind::F64) => 2,
            Slice::Global(g) => 3 + g as usize,
        }
    }

    /// Inverse of [`Slice::index`].
    pub fn from_index(i: usize) -> Slice {
        match i {
            0 => Slice::Elem(ArrayKind::I32),
            1 => Slice::Elem(ArrayKind::I64),
            2 => Slice::Elem(ArrayKind::F64),
            g => Slice::Global(u16::try_from(g - 3).unwrap_or(u16::MAX)),
        }
    }

    /// Number of slices for a module with `n_globals` globals.
    pub fn count(n_globals: u16) -> usize {
        3 + n_globals as usize
    }
}

/// Loop flavor after pre/main/post splitting.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LoopFlavor {
    Plain,
    Pre,
    Main,
    Post,
}

/// Runtime error raised by an explicit slow path (no deoptimization).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum RaiseKind {
    NullDeref,
    /// Inputs: index, length.
    IndexOutOfBounds,
    DivByZero,
    /// Input: requested length.
    NegativeArraySize,
}

/// The operation of a node.
///
/// Fixed input shapes (slot 0 is control where present):
///
/// - `If`/`RangeCheck`: `[ctrl, bool]`, outputs via `IfTrue`/`IfFalse`.
/// - `Region`: predecessor controls; `LoopHead`: `[entry, backedge]`.
/// - `Phi`/`MemPhi`: `[region, v0, v1, ...]`.
/// - `LoadArr`: `[ctrl, mem, base, idx]`; `StoreArr`:
///   `[ctrl, mem, base, idx, value]` (the store is the new memory).
/// - `LoadGlobal`: `[ctrl, mem]`; `StoreGlobal`: `[ctrl, mem, value]`.
/// - `NewArr`: `[ctrl, mem, len]`; projections 0 = ref, 1 = new memory.
/// - `CallStatic`: `[ctrl, arg0.., argN, mem-slices.., state..]`;
///   projections 0 = ctrl, 1 = result, `2 + i` = memory slice `i`.
/// - `Safepoint`/`Trap`: `[ctrl, mem-slices.., state..]`; the state suffix
///   length comes from the node's [`anvil_deopt::FrameDesc`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum NodeOp {
    // --- control ---
    Start,
    Stop,
    Region,
    LoopHead(LoopFlavor),
    If,
    /// An `If` guarding an array index; kept distinct so range-check
    /// elimination can find its prey.
    RangeCheck,
    IfTrue,
    IfFalse,
    Return,
    Safepoint,
    /// Deoptimize: hand the captured frame state back to the interpreter.
    Trap(Reason),
    /// Raise a runtime error without deopt (explicit slow path).
    Raise(RaiseKind),

    // --- data ---
    Param(u16),
    ConI(i32),
    ConL(i64),
    ConD(u64),
    ConNull,

    AddI,
    SubI,
    MulI,
    DivI,
    RemI,
    AndI,
    OrI,
    XorI,
    ShlI,
    ShrI,
    UShrI,

    AddL,
    SubL,
    MulL,
    DivL,
    RemL,
    AndL,
    OrL,
    XorL,
    ShlL,
    ShrL,
    UShrL,

    AddD,
    SubD,
    MulD,
    DivD,
    RemD,
    NegD,

    /// Three-way long compare producing -1/0/1 as a value.
    LCmpV,
    /// Three-way double compare, NaN to -1.
    DCmpL,
    /// Three-way double compare, NaN to +1.
    DCmpG,

    ConvI2L,
    ConvL2I,
    ConvI2D,
    ConvD2I,
    ConvL2D,
    ConvD2L,

    /// Signed int compare for branches, producing a condition value.
    CmpI,
    /// Unsigned int compare (the range-check shape: `idx <u len`).
    CmpU,
    /// Signed long compare for branches.
    CmpL,
    /// Reference compare against null.
    CmpP,
    /// Branch condition: applies a test to a compare.
    Bool(BoolTest),

    Phi(PhiKind),
    MinI,
    MaxI,
    /// Type-pinning cast: asserts its input lies in the carried int type.
    CastII(TyId),
    /// Optimization barrier hiding the main-loop limit until loop opts
    /// finish; stripped to identity afterwards.
    Opaque1,

    // --- memory ---
    /// Initial memory state of one slice, hanging off `Start`.
    InitMem(Slice),
    MemPhi(Slice),
    LoadArr(ArrayKind),
    StoreArr(ArrayKind),
    LoadGlobal(u16),
    StoreGlobal(u16),
    ArrayLen,
    NewArr(ArrayKind),

    // --- calls ---
    CallStatic { mid: MethodId, argc: u8 },
    Proj(u32),
}

impl NodeOp {
    /// Control-flow node (lives in the CFG skeleton).
    pub fn is_cfg(&self) -> bool {
        matches!(
            self,
            NodeOp::Start
                | NodeOp::Stop
                | NodeOp::Region
                | NodeOp::LoopHead(_)
                | NodeOp::If
                | NodeOp::RangeCheck
                | NodeOp::IfTrue
                | NodeOp::IfFalse
                | NodeOp::Return
                | NodeOp::Safepoint
                | NodeOp::Trap(_)
                | NodeOp::Raise(_)
                | NodeOp::CallStatic { .. }
        )
    }

    /// Two-way branch whose outcomes are `IfTrue`/`IfFalse` projections.
    pub fn is_branch(&self) -> bool {
        matches!(self, NodeOp::If | NodeOp::RangeCheck)
    }

    /// Node that ends its control path (successor is `Stop`).
    pub fn is_exit(&self) -> bool {
        matches!(self, NodeOp::Return | NodeOp::Trap(_) | NodeOp::Raise(_))
    }

    /// Pinned to its control input during scheduling.
    pub fn is_pinned(&self) -> bool {
        self.is_cfg()
            || matches!(
                self,
                NodeOp::Phi(_)
                    | NodeOp::MemPhi(_)
                    | NodeOp::StoreArr(_)
                    | NodeOp::StoreGlobal(_)
                    | NodeOp::NewArr(_)
                    | NodeOp::Param(_)
                    | NodeOp::InitMem(_)
                    | NodeOp::Proj(_)
                    | NodeOp::CastII(_)
            )
    }

    /// Carries a frame state suffix and consumes every memory slice.
    pub fn is_safepoint_class(&self) -> bool {
        matches!(
            self,
            NodeOp::Safepoint | NodeOp::Trap(_) | NodeOp::CallStatic { .. }
        )
    }

    /// Must never be removed even when nothing uses its value. A store with
    /// no memory uses is unobservable and may be swept.
    pub fn is_always_live(&self) -> bool {
        self.is_cfg()
    }

    /// Operands can be swapped freely (GVN canonicalizes their order).
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            NodeOp::AddI
                | NodeOp::MulI
                | NodeOp::AndI
                | NodeOp::OrI
                | NodeOp::XorI
                | NodeOp::AddL
                | NodeOp::MulL
                | NodeOp::AndL
                | NodeOp::OrL
                | NodeOp::XorL
                | NodeOp::MinI
                | NodeOp::MaxI
        )
    }

    /// Produces a memory state for this slice.
    pub fn mem_slice(&self, _n_globals: u16) -> Option<Slice> {
        match self {
            NodeOp::StoreArr(ak) | NodeOp::NewArr(ak) | NodeOp::LoadArr(ak) => {
                Some(Slice::Elem(*ak))
            }
            NodeOp::StoreGlobal(g) | NodeOp::LoadGlobal(g) => Some(Slice::Global(*g)),
            NodeOp::MemPhi(s) | NodeOp::InitMem(s) => Some(*s),
            _ => None,
        }
    }

    /// Constant op.
    pub fn is_con(&self) -> bool {
        matches!(
            self,
            NodeOp::ConI(_) | NodeOp::ConL(_) | NodeOp::ConD(_) | NodeOp::ConNull
        )
    }

    /// Mnemonic for the printer.
    #[allow(clippy::too_many_lines)]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            NodeOp::Start => "Start",
            NodeOp::Stop => "Stop",
            NodeOp::Region => "Region",
            NodeOp::LoopHead(LoopFlavor::Plain) => "LoopHead",
            NodeOp::LoopHead(LoopFlavor::Pre) => "PreLoop",
            NodeOp::LoopHead(LoopFlavor::Main) => "MainLoop",
            NodeOp::LoopHead(LoopFlavor::Post) => "PostLoop",
            NodeOp::If => "If",
            NodeOp::RangeCheck => "RangeCheck",
            NodeOp::IfTrue => "IfTrue",
            NodeOp::IfFalse => "IfFalse",
            NodeOp::Return => "Return",
            NodeOp::Safepoint => "Safepoint",
            NodeOp::Trap(_) => "Trap",
            NodeOp::Raise(_) => "Raise",
            NodeOp::Param(_) => "Param",
            NodeOp::ConI(_) => "ConI",
            NodeOp::ConL(_) => "ConL",
            NodeOp::ConD(_) => "ConD",
            NodeOp::ConNull => "ConNull",
            NodeOp::AddI => "AddI",
            NodeOp::SubI => "SubI",
            NodeOp::MulI => "MulI",
            NodeOp::DivI => "DivI",
            NodeOp::RemI => "RemI",
            NodeOp::AndI => "AndI",
            NodeOp::OrI => "OrI",
            NodeOp::XorI => "XorI",
            NodeOp::ShlI => "ShlI",
            NodeOp::ShrI => "ShrI",
            NodeOp::UShrI => "UShrI",
            NodeOp::AddL => "AddL",
            NodeOp::SubL => "SubL",
            NodeOp::MulL => "MulL",
            NodeOp::DivL => "DivL",
            NodeOp::RemL => "RemL",
            NodeOp::AndL => "AndL",
            NodeOp::OrL => "OrL",
            NodeOp::XorL => "XorL",
            NodeOp::ShlL => "ShlL",
            NodeOp::ShrL => "ShrL",
            NodeOp::UShrL => "UShrL",
            NodeOp::AddD => "AddD",
            NodeOp::SubD => "SubD",
            NodeOp::MulD => "MulD",
            NodeOp::DivD => "DivD",
            NodeOp::RemD => "RemD",
            NodeOp::NegD => "NegD",
            NodeOp::LCmpV => "LCmpV",
            NodeOp::DCmpL => "DCmpL",
            NodeOp::DCmpG => "DCmpG",
            NodeOp::ConvI2L => "ConvI2L",
            NodeOp::ConvL2I => "ConvL2I",
            NodeOp::ConvI2D => "ConvI2D",
            NodeOp::ConvD2I => "ConvD2I",
            NodeOp::ConvL2D => "ConvL2D",
            NodeOp::ConvD2L => "ConvD2L",
            NodeOp::CmpI => "CmpI",
            NodeOp::CmpU => "CmpU",
            NodeOp::CmpL => "CmpL",
            NodeOp::CmpP => "CmpP",
            NodeOp::Bool(_) => "Bool",
            NodeOp::Phi(_) => "Phi",
            NodeOp::MinI => "MinI",
            NodeOp::MaxI => "MaxI",
            NodeOp::CastII(_) => "CastII",
            NodeOp::Opaque1 => "Opaque1",
            NodeOp::InitMem(_) => "InitMem",
            NodeOp::MemPhi(_) => "MemPhi",
            NodeOp::LoadArr(_) => "LoadArr",
            NodeOp::StoreArr(_) => "StoreArr",
            NodeOp::LoadGlobal(_) => "LoadGlobal",
            NodeOp::StoreGlobal(_) => "StoreGlobal",
            NodeOp::ArrayLen => "ArrayLen",
            NodeOp::NewArr(_) => "NewArr",
            NodeOp::CallStatic { .. } => "CallStatic",
            NodeOp::Proj(_) => "Proj",
        }
    }
}
