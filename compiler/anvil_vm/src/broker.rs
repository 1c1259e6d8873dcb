//! The compile broker: a bounded queue of compile tasks drained by
//! background worker threads.
//!
//! Each task carries its own snapshot of the profiles and a clone of the
//! module `Arc` taken at enqueue time, so workers never look at live
//! interpreter state. Staleness is handled at install: the code cache
//! rejects artifacts whose body versions moved while the compile ran.

use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anvil_bc::{MethodId, MethodProfile, Module};
use anvil_codegen::CompileOptions;
use anvil_deopt::{Reason, TrapProfile};
use anvil_parse::ProfileSource;
use crossbeam::channel::{bounded, Receiver, Sender};
use rustc_hash::FxHasher;
use tracing::debug;

use crate::cache;
use crate::code::CodeCache;
use crate::VmOptions;

/// Immutable view of the profiling state at enqueue time.
pub(crate) struct ProfileSnapshot {
    profiles: Vec<MethodProfile>,
    traps: Vec<TrapProfile>,
    versions: Vec<u32>,
}

impl ProfileSnapshot {
    pub fn capture(
        profiles: &[MethodProfile],
        traps: &[TrapProfile],
        code: &CodeCache,
    ) -> ProfileSnapshot {
        ProfileSnapshot {
            profiles: profiles.to_vec(),
            traps: traps.to_vec(),
            versions: code.versions_snapshot(profiles.len()),
        }
    }

    /// Cache-key component: the shape of what the compiler will consume
    /// for `mid`. Artifacts compiled against differently-shaped profiles
    /// never alias on disk.
    pub fn shape_fingerprint(&self, mid: MethodId) -> u64 {
        let mut h = FxHasher::default();
        self.profiles[mid.index()].shape_fingerprint().hash(&mut h);
        self.traps[mid.index()].shape_fingerprint().hash(&mut h);
        self.versions[mid.index()].hash(&mut h);
        h.finish()
    }
}

impl ProfileSource for ProfileSnapshot {
    fn profile(&self, mid: MethodId) -> Option<&MethodProfile> {
        self.profiles.get(mid.index())
    }

    fn too_many_traps(&self, mid: MethodId, bci: u32, reason: Reason) -> bool {
        self.traps
            .get(mid.index())
            .is_some_and(|t| t.too_many_traps(bci, reason))
    }

    fn method_version(&self, mid: MethodId) -> u32 {
        self.versions.get(mid.index()).copied().unwrap_or(0)
    }
}

pub(crate) struct CompileTask {
    pub module: Arc<Module>,
    pub mid: MethodId,
    pub version: u32,
    pub snapshot: ProfileSnapshot,
}

/// Compile one method and install the result. Shared by the broker
/// workers and the synchronous forced-compile path.
pub(crate) fn compile_and_install(
    module: &Module,
    code: &CodeCache,
    copts: &CompileOptions,
    cache_dir: Option<&Path>,
    mid: MethodId,
    version: u32,
    snapshot: &ProfileSnapshot,
) -> bool {
    let key = cache::CacheKey {
        module: module.fingerprint(),
        mid: mid.raw(),
        options: copts.fingerprint(),
        shape: snapshot.shape_fingerprint(mid),
    };
    if let Some(dir) = cache_dir {
        if let Some(artifact) = cache::load(dir, &key) {
            debug!(mid = mid.raw(), "artifact cache hit");
            return code.install(mid, artifact, version);
        }
    }
    match anvil_codegen::compile(module, mid, snapshot, copts) {
        Ok(artifact) => {
            if let Some(dir) = cache_dir {
                cache::store(dir, &key, &artifact);
            }
            code.install(mid, artifact, version)
        }
        Err(e) => {
            debug!(mid = mid.raw(), error = %e, "compilation failed; method stays interpreted");
            code.abandon(mid);
            code.make_not_compilable(mid);
            false
        }
    }
}

/// Owns the task queue and the worker threads. Dropping the broker
/// closes the queue and joins the workers.
pub(crate) struct CompileBroker {
    tx: Option<Sender<CompileTask>>,
    workers: Vec<JoinHandle<()>>,
}

impl CompileBroker {
    pub fn new(code: Arc<CodeCache>, opts: &VmOptions) -> CompileBroker {
        let (tx, rx) = bounded::<CompileTask>(opts.queue_capacity.max(1));
        let workers = (0..opts.compile_workers.max(1))
            .map(|_| {
                let rx: Receiver<CompileTask> = rx.clone();
                let code = Arc::clone(&code);
                let copts = opts.compile;
                let dir = opts.cache_dir.clone();
                thread::spawn(move || {
                    for task in rx {
                        compile_and_install(
                            &task.module,
                            &code,
                            &copts,
                            dir.as_deref(),
                            task.mid,
                            task.version,
                            &task.snapshot,
                        );
                    }
                })
            })
            .collect();
        CompileBroker { tx: Some(tx), workers }
    }

    /// Non-blocking: a full queue drops the request (the method will
    /// requalify on a later entry or backedge).
    pub fn enqueue(&self, task: CompileTask) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.try_send(task).is_ok())
    }
}

impl Drop for CompileBroker {
    fn drop(&mut self) {
        self.tx = None;
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}
