//! Bytecode model for the Anvil VM.
//!
//! This crate defines the typed stack bytecode both execution tiers consume:
//! the instruction set ([`Insn`]), methods/globals/modules ([`Module`]), the
//! runtime value model ([`Value`]), per-method execution profiles
//! ([`MethodProfile`]), the verifier, and the textual `.anv` assembler and
//! disassembler.
//!
//! # Semantics
//!
//! Arithmetic keeps Java's edge behavior on purpose: two's-complement
//! wrapping, shift counts masked to 31/63, `MIN / -1 == MIN`, IEEE-754
//! doubles with `dcmpl`/`dcmpg` NaN ordering, and saturating
//! double-to-integer conversion. The optimizing compiler must preserve all
//! of it through every transform, so the ground truth lives here next to
//! the instruction definitions.

mod asm;
mod dis;
mod insn;
mod kind;
mod module;
mod profile;
mod value;
mod verify;

pub use asm::{assemble, AsmError};
pub use dis::disassemble;
pub use insn::Insn;
pub use kind::{ArrayKind, Kind};
pub use module::{Global, Method, MethodId, Module};
pub use profile::{BranchCounts, MethodProfile};
pub use value::{ArrayRef, Value};
pub use verify::{verify, VerifyError};
