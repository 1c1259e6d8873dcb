use std::fmt;

/// Optimization gave up; the caller must fall back to a less optimized
/// tier, never emit wrong code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptError {
    /// The worklist kept churning past the iteration ceiling.
    IterationGuard { limit: usize },
    /// The graph grew past the node budget.
    NodeBudget { limit: usize },
}

impl fmt::Display for OptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptError::IterationGuard { limit } => {
                write!(f, "value numbering did not converge within {limit} iterations")
            }
            OptError::NodeBudget { limit } => {
                write!(f, "graph exceeded the node budget of {limit}")
            }
        }
    }
}

impl std::error::Error for OptError {}
