//! Builds a sea-of-nodes graph from verified bytecode.
//!
//! Parsing is abstract interpretation: an SSA frame state (locals, operand
//! stack, memory slices, control) is pushed through every instruction, and
//! every node is born through parse-time GVN so the graph is folded as it
//! grows. Checked operations (array access, division) parse into
//! guard-plus-trap shapes; profile data prunes never-taken branches; small
//! static calls are inlined with chained frame descriptors.

mod build;
mod error;
mod profile_source;

pub use build::{build, BuildOpts};
pub use error::BuildError;
pub use profile_source::{NoProfile, ProfileSource};
