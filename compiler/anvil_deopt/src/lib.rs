//! Deoptimization model for the Anvil VM.
//!
//! Compiled code is speculative: checks the compiler could not prove are
//! guarded by traps that hand execution back to the interpreter. This crate
//! owns everything both sides of that handoff share:
//!
//! - [`Reason`]/[`Action`]: why a trap fired and what to do about the
//!   compiled code afterwards,
//! - [`TrapProfile`]: per-method trap bookkeeping and the recompilation
//!   hysteresis policy,
//! - [`FrameDesc`]/[`FrameRebuilder`]: the metadata an artifact records at
//!   every trap site and the machinery that turns captured values back into
//!   interpreter frames (including inlined-caller chains),
//! - [`Dependency`]/[`DependencyRegistry`]: what an artifact assumed about
//!   other methods, so redefining a method invalidates its dependents.

mod deps;
mod frame;
mod profile;
mod reason;

pub use deps::{Dependency, DependencyRegistry};
pub use frame::{FrameDesc, FrameRebuilder, InterpFrameImage};
pub use profile::{
    TrapProfile, PER_BCI_TRAP_LIMIT, PER_METHOD_RECOMPILE_CUTOFF, PER_METHOD_TRAP_LIMIT,
};
pub use reason::{Action, Reason};
