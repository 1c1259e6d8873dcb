use std::fmt;

/// Graph construction gave up; compilation falls back to the interpreter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildError {
    /// The graph outgrew the node budget (huge method or inlining blowup).
    NodeBudget { limit: usize },
    /// The method body is empty or malformed despite verification.
    MalformedBody { mid: u16 },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::NodeBudget { limit } => {
                write!(f, "graph construction exceeded the node budget of {limit}")
            }
            BuildError::MalformedBody { mid } => {
                write!(f, "method m{mid} has a malformed body")
            }
        }
    }
}

impl std::error::Error for BuildError {}
