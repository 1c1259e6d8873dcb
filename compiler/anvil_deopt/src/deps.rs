//! Artifact dependencies and the invalidation registry.

use anvil_bc::MethodId;
use rustc_hash::FxHashMap;

/// An assumption baked into a compiled artifact.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
pub enum Dependency {
    /// The artifact inlined or direct-called `mid` at body version
    /// `version`; redefining the method breaks the artifact.
    MethodBody { mid: MethodId, version: u32 },
}

impl Dependency {
    pub fn subject(&self) -> MethodId {
        match self {
            Dependency::MethodBody { mid, .. } => *mid,
        }
    }
}

/// Maps methods to the compiled artifacts that depend on them.
#[derive(Debug, Default)]
pub struct DependencyRegistry {
    /// subject method -> methods whose artifacts assumed its body
    dependents: FxHashMap<MethodId, Vec<MethodId>>,
}

impl DependencyRegistry {
    /// Register the dependencies of a freshly installed artifact.
    pub fn register(&mut self, holder: MethodId, deps: &[Dependency]) {
        for dep in deps {
            let list = self.dependents.entry(dep.subject()).or_default();
            if !list.contains(&holder) {
                list.push(holder);
            }
        }
    }

    /// Drop a holder's registrations (its artifact went away).
    pub fn unregister(&mut self, holder: MethodId) {
        for list in self.dependents.values_mut() {
            list.retain(|&m| m != holder);
        }
    }

    /// Methods whose artifacts must become not entrant when `subject` is
    /// redefined.
    pub fn dependents_of(&self, subject: MethodId) -> &[MethodId] {
        self.dependents
            .get(&subject)
            .map_or(&[], Vec::as_slice)
    }
}
