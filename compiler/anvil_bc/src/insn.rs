//! The instruction set.
//!
//! Branch targets are instruction indices into the owning method's code
//! ("bci"). Double constants are stored as raw IEEE-754 bits so that NaN
//! payloads round-trip exactly through the assembler and the disk cache.

use crate::kind::ArrayKind;

/// One bytecode instruction.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Insn {
    // Constants
    IConst(i32),
    LConst(i64),
    /// Double constant as raw bits.
    DConst(u64),
    NullConst,

    // Locals
    ILoad(u16),
    LLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IStore(u16),
    LStore(u16),
    DStore(u16),
    AStore(u16),

    // Stack
    Pop,
    Dup,

    // Int arithmetic (wrapping, shifts masked to 31)
    IAdd,
    ISub,
    IMul,
    IDiv,
    IRem,
    INeg,
    IAnd,
    IOr,
    IXor,
    IShl,
    IShr,
    IUShr,

    // Long arithmetic (wrapping, shifts masked to 63, shift count is int)
    LAdd,
    LSub,
    LMul,
    LDiv,
    LRem,
    LNeg,
    LAnd,
    LOr,
    LXor,
    LShl,
    LShr,
    LUShr,
    /// Three-way long compare, pushes -1/0/1 as int.
    LCmp,

    // Double arithmetic (IEEE-754)
    DAdd,
    DSub,
    DMul,
    DDiv,
    DRem,
    DNeg,
    /// Three-way double compare, NaN compares as -1.
    DCmpL,
    /// Three-way double compare, NaN compares as +1.
    DCmpG,

    // Conversions
    I2L,
    L2I,
    I2D,
    /// Saturating: NaN to 0, out-of-range to i32::MIN/MAX.
    D2I,
    L2D,
    /// Saturating: NaN to 0, out-of-range to i64::MIN/MAX.
    D2L,

    // Control
    Goto(u32),
    IfEq(u32),
    IfNe(u32),
    IfLt(u32),
    IfGe(u32),
    IfGt(u32),
    IfLe(u32),
    IfICmpEq(u32),
    IfICmpNe(u32),
    IfICmpLt(u32),
    IfICmpGe(u32),
    IfICmpGt(u32),
    IfICmpLe(u32),
    IfNull(u32),
    IfNonNull(u32),

    // Arrays
    NewArr(ArrayKind),
    ArrayLen,
    IALoad,
    LALoad,
    DALoad,
    IAStore,
    LAStore,
    DAStore,

    // Globals
    GetGlobal(u16),
    SetGlobal(u16),

    // Calls (static only)
    Call(u16),

    // Returns
    Ret,
    IRet,
    LRet,
    DRet,
    ARet,
}

impl Insn {
    /// Branch target, if this is a jump or conditional branch.
    pub fn branch_target(&self) -> Option<u32> {
        match *self {
            Insn::Goto(t)
            | Insn::IfEq(t)
            | Insn::IfNe(t)
            | Insn::IfLt(t)
            | Insn::IfGe(t)
            | Insn::IfGt(t)
            | Insn::IfLe(t)
            | Insn::IfICmpEq(t)
            | Insn::IfICmpNe(t)
            | Insn::IfICmpLt(t)
            | Insn::IfICmpGe(t)
            | Insn::IfICmpGt(t)
            | Insn::IfICmpLe(t)
            | Insn::IfNull(t)
            | Insn::IfNonNull(t) => Some(t),
            _ => None,
        }
    }

    /// Rewrite the branch target in place (assembler backpatching).
    pub(crate) fn set_branch_target(&mut self, new: u32) {
        match self {
            Insn::Goto(t)
            | Insn::IfEq(t)
            | Insn::IfNe(t)
            | Insn::IfLt(t)
            | Insn::IfGe(t)
            | Insn::IfGt(t)
            | Insn::IfLe(t)
            | Insn::IfICmpEq(t)
            | Insn::IfICmpNe(t)
            | Insn::IfICmpLt(t)
            | Insn::IfICmpGe(t)
            | Insn::IfICmpGt(t)
            | Insn::IfICmpLe(t)
            | Insn::IfNull(t)
            | Insn::IfNonNull(t) => *t = new,
            _ => {}
        }
    }

    /// Conditional branch (falls through on the other outcome).
    pub fn is_cond_branch(&self) -> bool {
        matches!(self.branch_target(), Some(_)) && !matches!(self, Insn::Goto(_))
    }

    /// Instruction that never falls through to the next bci.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Insn::Goto(_) | Insn::Ret | Insn::IRet | Insn::LRet | Insn::DRet | Insn::ARet
        )
    }

    /// Any return form.
    pub fn is_return(&self) -> bool {
        matches!(
            self,
            Insn::Ret | Insn::IRet | Insn::LRet | Insn::DRet | Insn::ARet
        )
    }
}
