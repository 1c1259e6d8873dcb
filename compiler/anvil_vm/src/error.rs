use anvil_bc::MethodId;
use thiserror::Error;

/// A terminal runtime error. Both tiers raise the same errors for the
/// same inputs; there is no catch mechanism.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("null dereference")]
    NullDeref,

    #[error("index {index} out of bounds for array of length {length}")]
    IndexOutOfBounds { index: i32, length: i32 },

    #[error("division by zero")]
    DivByZero,

    #[error("negative array size {len}")]
    NegativeArraySize { len: i32 },

    #[error("no method named `{0}`")]
    UnknownMethod(String),

    #[error("{mid} takes {expect} arguments, got {got}")]
    ArityMismatch {
        mid: MethodId,
        expect: usize,
        got: usize,
    },

    #[error("argument {index} for {mid} has the wrong kind")]
    BadArgument { mid: MethodId, index: usize },

    /// A deopt record did not match its frame descriptor. The artifact
    /// (or a cached copy of it) is damaged.
    #[error("compiled code for {mid} is corrupt")]
    CorruptArtifact { mid: MethodId },
}
