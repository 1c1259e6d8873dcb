//! Value numbering and constant propagation over the sea-of-nodes graph.
//!
//! The pass structure follows the classic split:
//!
//! - [`value`] computes a node's lattice type from its inputs,
//! - [`identity`] finds an existing node the node is equal to,
//! - [`ideal`] rewrites a node into a cheaper shape,
//! - [`Gvn`] hash-conses nodes as they are built (parse-time),
//! - [`IterGvn`] runs all three to a worklist fixpoint,
//! - [`Ccp`] is the optimistic constant-propagation pass that assumes
//!   everything is dead or constant until proven otherwise.

mod ccp;
mod error;
mod gvn;
mod ideal;
mod identity;
mod igvn;
mod value;

pub use ccp::Ccp;
pub use error::OptError;
pub use gvn::Gvn;
pub use ideal::ideal;
pub use identity::identity;
pub use igvn::IterGvn;
pub use value::value;
