//! Trap reasons and recompilation actions.

use std::fmt;

/// Why compiled code deoptimized.
///
/// Reasons are part of the trap-profile key: a method that keeps trapping
/// for the same reason at the same bci gets recompiled without the
/// speculation that failed.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Reason {
    /// Invalidation-driven deopt (no failed speculation).
    None,
    /// Speculatively elided null check failed.
    NullCheck,
    /// Speculatively elided or hoisted range check failed.
    RangeCheck,
    /// Division by a value the compiler assumed nonzero.
    DivZeroCheck,
    /// A branch the profile said was never taken got taken.
    Unreached,
    /// A loop predicate hoisted above the loop failed.
    Predicate,
    /// Counted-loop limit could overflow the induction variable.
    LoopLimitCheck,
    /// A type constraint pinned by the optimizer was violated.
    Constraint,
}

impl Reason {
    pub fn name(self) -> &'static str {
        match self {
            Reason::None => "none",
            Reason::NullCheck => "null_check",
            Reason::RangeCheck => "range_check",
            Reason::DivZeroCheck => "div0_check",
            Reason::Unreached => "unreached",
            Reason::Predicate => "predicate",
            Reason::LoopLimitCheck => "loop_limit_check",
            Reason::Constraint => "constraint",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What happens to the compiled method after a trap.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Action {
    /// Keep the code; the trap is tolerable.
    None,
    /// Keep the code but consider recompiling if traps continue.
    MaybeRecompile,
    /// Fall back to the interpreter for this execution only.
    Reinterpret,
    /// Throw the code away; recompile on the next threshold crossing.
    MakeNotEntrant,
    /// Throw the code away and never compile this method again.
    MakeNotCompilable,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::None => "none",
            Action::MaybeRecompile => "maybe_recompile",
            Action::Reinterpret => "reinterpret",
            Action::MakeNotEntrant => "make_not_entrant",
            Action::MakeNotCompilable => "make_not_compilable",
        }
    }

    /// Whether this action discards the compiled code.
    pub fn invalidates(self) -> bool {
        matches!(self, Action::MakeNotEntrant | Action::MakeNotCompilable)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
