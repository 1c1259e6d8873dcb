use anvil_bc::{MethodId, MethodProfile};
use anvil_deopt::Reason;

/// What the builder knows about runtime behavior: interpreter profiles,
/// trap history, and method body versions (bumped on redefinition).
pub trait ProfileSource {
    /// Interpreter-tier profile for a method, if any was collected.
    fn profile(&self, mid: MethodId) -> Option<&MethodProfile>;

    /// Trap hysteresis: has this site already deoptimized too often for
    /// this reason? When true, the builder must emit the full slow path
    /// instead of a trap.
    fn too_many_traps(&self, mid: MethodId, bci: u32, reason: Reason) -> bool;

    /// Current body version of a method, recorded in dependencies.
    fn method_version(&self, mid: MethodId) -> u32;
}

/// Profile source with no data: nothing is pruned, traps are allowed
/// everywhere.
pub struct NoProfile;

impl ProfileSource for NoProfile {
    fn profile(&self, _mid: MethodId) -> Option<&MethodProfile> {
        None
    }

    fn too_many_traps(&self, _mid: MethodId, _bci: u32, _reason: Reason) -> bool {
        false
    }

    fn method_version(&self, _mid: MethodId) -> u32 {
        0
    }
}
