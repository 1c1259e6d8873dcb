//! Sea-of-nodes intermediate representation for the Anvil optimizing
//! compiler.
//!
//! The IR follows the classic design: control, data and memory are all
//! nodes in one graph with use/def edges, and most data nodes float free of
//! control until global code motion pins them to blocks. Types live in a
//! hash-consed lattice pool ([`TyPool`]); every node carries a [`TyId`]
//! that optimization passes sharpen monotonically.
//!
//! # Conventions
//!
//! - Input slot 0 of a pinned node is its control edge ([`NodeId::NONE`]
//!   when floating).
//! - `Region` inputs are predecessor controls; a `Phi`'s input 0 is its
//!   region and input `1 + i` matches region predecessor `i`.
//! - `LoopHead` is a two-predecessor region: input 0 is the entry control,
//!   input 1 the backedge. Loop phis therefore carry the initial value in
//!   slot 1 and the backedge value in slot 2.
//! - Memory is sliced: one slice per array element kind and one per global.
//!   A store node *is* the new memory state of its slice.

pub mod cfg;
mod graph;
mod node;
mod printer;
pub mod ty;

pub use graph::{Graph, NodeId, NodeInfo};
pub use node::{BoolTest, LoopFlavor, NodeFlags, NodeOp, PhiKind, RaiseKind, Slice};
pub use printer::GraphPrinter;
pub use ty::{IntRange, LongRange, RefData, TyData, TyId, TyPool};
