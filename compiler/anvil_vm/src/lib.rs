//! The tiered Anvil runtime.
//!
//! A [`Vm`] executes one verified [`Module`]. Methods start in the
//! interpreter, which profiles them; hot methods are queued to the
//! compile broker and switch to compiled artifacts once installed.
//! Speculation failures deoptimize back into the interpreter through the
//! frame rebuilder, and methods that misbehave repeatedly lose their
//! compiled code or the right to any.
//!
//! [`compare_tiers`] runs the same call interpreted and force-compiled
//! and reports whether the two tiers agreed, which is the oracle the
//! golden tests and the property tests are built on.

mod broker;
mod cache;
mod code;
mod error;
mod heap;
mod interp;
mod ops;
mod runner;

use std::path::PathBuf;
use std::sync::Arc;

use anvil_bc::{Method, MethodId, MethodProfile, Module, Value};
use anvil_deopt::TrapProfile;

use broker::CompileBroker;
use code::CodeCache;
use interp::Machine;

pub use anvil_codegen::CompileOptions;
pub use error::VmError;
pub use heap::Heap;

/// When methods get compiled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompileMode {
    /// Interpret, profile, compile what gets hot.
    Mixed,
    /// Compile every method synchronously on its first call.
    Forced,
    /// Never compile.
    InterpOnly,
}

/// Runtime configuration.
#[derive(Clone, Debug)]
pub struct VmOptions {
    pub mode: CompileMode,
    /// `invocations + backedges/8` at which a method qualifies.
    pub compile_threshold: u64,
    /// Broker worker threads (`Mixed` mode only).
    pub compile_workers: usize,
    /// Bound of the compile queue; overflow drops the request.
    pub queue_capacity: usize,
    /// Artifact disk cache directory, if any.
    pub cache_dir: Option<PathBuf>,
    pub compile: CompileOptions,
}

impl Default for VmOptions {
    fn default() -> VmOptions {
        VmOptions {
            mode: CompileMode::Mixed,
            compile_threshold: 1000,
            compile_workers: 1,
            queue_capacity: 64,
            cache_dir: None,
            compile: CompileOptions::default(),
        }
    }
}

/// A running instance of one module.
pub struct Vm {
    module: Arc<Module>,
    heap: Heap,
    globals: Vec<Value>,
    profiles: Vec<MethodProfile>,
    traps: Vec<TrapProfile>,
    code: Arc<CodeCache>,
    broker: Option<CompileBroker>,
    opts: VmOptions,
}

impl Vm {
    /// Run `module` with default options. The module must have passed
    /// [`anvil_bc::verify`]; execution relies on its guarantees.
    pub fn new(module: Module) -> Vm {
        Vm::with_options(module, VmOptions::default())
    }

    pub fn with_options(module: Module, opts: VmOptions) -> Vm {
        let n = module.methods.len();
        let globals = module.globals.iter().map(|g| g.init).collect();
        let code = Arc::new(CodeCache::new());
        let broker = (opts.mode == CompileMode::Mixed && opts.compile_workers > 0)
            .then(|| CompileBroker::new(Arc::clone(&code), &opts));
        Vm {
            module: Arc::new(module),
            heap: Heap::new(),
            globals,
            profiles: vec![MethodProfile::default(); n],
            traps: vec![TrapProfile::default(); n],
            code,
            broker,
            opts,
        }
    }

    /// Call a method by name.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, VmError> {
        let mid = self
            .module
            .method_id(name)
            .ok_or_else(|| VmError::UnknownMethod(name.to_string()))?;
        self.call_id(mid, args)
    }

    /// Call a method by id, checking the arguments against its signature.
    pub fn call_id(&mut self, mid: MethodId, args: &[Value]) -> Result<Option<Value>, VmError> {
        let method = self.module.method(mid);
        if args.len() != method.n_params() {
            return Err(VmError::ArityMismatch {
                mid,
                expect: method.n_params(),
                got: args.len(),
            });
        }
        for (index, (arg, kind)) in args.iter().zip(method.params.iter()).enumerate() {
            if !arg.fits(*kind) {
                return Err(VmError::BadArgument { mid, index });
            }
        }
        self.machine().call(mid, args)
    }

    fn machine(&mut self) -> Machine<'_> {
        Machine {
            module: &self.module,
            heap: &mut self.heap,
            globals: &mut self.globals,
            profiles: &mut self.profiles,
            traps: &mut self.traps,
            code: &self.code,
            broker: self.broker.as_ref(),
            opts: &self.opts,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        let g = self.module.global_id(name)?;
        Some(self.globals[g as usize])
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    pub fn profile(&self, mid: MethodId) -> &MethodProfile {
        &self.profiles[mid.index()]
    }

    pub fn trap_profile(&self, mid: MethodId) -> &TrapProfile {
        &self.traps[mid.index()]
    }

    /// Whether the method currently has entrant compiled code.
    pub fn has_compiled(&self, mid: MethodId) -> bool {
        self.code.is_entrant(mid)
    }

    /// Replace a method body. Its version is bumped, its own compiled
    /// code and every artifact that assumed the old body are invalidated,
    /// and its profiles start over. The new body must leave the module
    /// verifiable.
    pub fn redefine_method(&mut self, mid: MethodId, method: Method) {
        Arc::make_mut(&mut self.module).methods[mid.index()] = method;
        self.code.redefine(mid);
        self.profiles[mid.index()] = MethodProfile::default();
        self.traps[mid.index()] = TrapProfile::default();
    }
}

/// Result of running the same call in both tiers.
pub struct TierReport {
    pub interpreted: Result<Option<Value>, VmError>,
    pub compiled: Result<Option<Value>, VmError>,
    pub interpreted_globals: Vec<Value>,
    pub compiled_globals: Vec<Value>,
}

impl TierReport {
    /// Bit-exact agreement: same result (or same error) and same final
    /// globals. `Value` equality compares doubles by bit pattern, so a
    /// tier that flips a NaN payload or a zero sign fails here.
    pub fn agree(&self) -> bool {
        self.interpreted == self.compiled && self.interpreted_globals == self.compiled_globals
    }
}

/// Run one call interpreted and once more with every method force
/// compiled, on fresh VMs, and report both outcomes.
pub fn compare_tiers(module: &Module, name: &str, args: &[Value]) -> TierReport {
    let mut interp = Vm::with_options(
        module.clone(),
        VmOptions {
            mode: CompileMode::InterpOnly,
            ..VmOptions::default()
        },
    );
    let mut forced = Vm::with_options(
        module.clone(),
        VmOptions {
            mode: CompileMode::Forced,
            ..VmOptions::default()
        },
    );
    let interpreted = interp.call(name, args);
    let compiled = forced.call(name, args);
    TierReport {
        interpreted,
        compiled,
        interpreted_globals: interp.globals.clone(),
        compiled_globals: forced.globals.clone(),
    }
}

#[cfg(test)]
#[path = "lib/tests.rs"]
mod tests;
