//! Methods, globals and modules.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use crate::insn::Insn;
use crate::kind::Kind;
use crate::value::Value;

/// Index of a method within its module.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct MethodId(pub u16);

impl MethodId {
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// A single static method.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Method {
    pub name: String,
    pub params: Vec<Kind>,
    /// `None` for `void`.
    pub ret: Option<Kind>,
    /// Number of local slots, parameters included (params occupy slots
    /// `0..params.len()`).
    pub max_locals: u16,
    pub code: Vec<Insn>,
}

impl Method {
    /// Number of parameter slots.
    #[inline]
    pub fn n_params(&self) -> usize {
        self.params.len()
    }
}

/// A module-level global variable.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Global {
    pub name: String,
    pub kind: Kind,
    /// Initial value; the verifier requires it to fit `kind` (references
    /// may only be initialized to null).
    pub init: Value,
}

/// A verified unit of bytecode: named methods and globals.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub name: String,
    pub methods: Vec<Method>,
    pub globals: Vec<Global>,
    method_names: FxHashMap<String, u16>,
    global_names: FxHashMap<String, u16>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Module::default()
        }
    }

    /// Append a method; returns its id. Duplicate names keep the first id.
    pub fn push_method(&mut self, method: Method) -> MethodId {
        let id = u16::try_from(self.methods.len()).unwrap_or(u16::MAX);
        self.method_names.entry(method.name.clone()).or_insert(id);
        self.methods.push(method);
        MethodId(id)
    }

    /// Append a global; returns its index.
    pub fn push_global(&mut self, global: Global) -> u16 {
        let id = u16::try_from(self.globals.len()).unwrap_or(u16::MAX);
        self.global_names.entry(global.name.clone()).or_insert(id);
        self.globals.push(global);
        id
    }

    #[inline]
    pub fn method(&self, mid: MethodId) -> &Method {
        &self.methods[mid.index()]
    }

    pub fn method_id(&self, name: &str) -> Option<MethodId> {
        self.method_names.get(name).copied().map(MethodId)
    }

    pub fn global_id(&self, name: &str) -> Option<u16> {
        self.global_names.get(name).copied()
    }

    #[inline]
    pub fn n_globals(&self) -> u16 {
        u16::try_from(self.globals.len()).unwrap_or(u16::MAX)
    }

    /// Stable content fingerprint, used to key the artifact disk cache.
    pub fn fingerprint(&self) -> u64 {
        let mut h = FxHasher::default();
        self.name.hash(&mut h);
        self.methods.hash(&mut h);
        self.globals.hash(&mut h);
        h.finish()
    }
}
