//! The interpreter tier and the execution engine shared by both tiers.
//!
//! [`Machine`] borrows the mutable parts of the VM for the duration of
//! one top-level call. It dispatches each method to compiled code when
//! the code cache has an entrant artifact, and otherwise interprets,
//! counting invocations, backedges and branch outcomes so the broker can
//! decide what to compile next.
//!
//! The interpreter keeps its frames in an explicit stack rather than on
//! the Rust stack, which lets deoptimization splice rebuilt frames in at
//! any depth. Frame convention: a caller waiting on a callee has already
//! consumed the argument values and advanced past the `Call`; a return
//! just pushes the result onto the caller's operand stack. Rebuilt
//! deopt frames follow the same convention, with the innermost frame
//! re-executing the instruction that trapped.

use std::sync::Arc;

use anvil_bc::{Insn, MethodId, MethodProfile, Module, Value};
use anvil_codegen::Artifact;
use anvil_deopt::{InterpFrameImage, TrapProfile};
use tracing::debug;

use crate::broker::{CompileBroker, CompileTask, ProfileSnapshot};
use crate::code::CodeCache;
use crate::error::VmError;
use crate::heap::Heap;
use crate::ops;
use crate::{CompileMode, VmOptions};

const RED_ZONE: usize = 64 * 1024;
const STACK_GROWTH: usize = 2 * 1024 * 1024;

/// The mutable half of the VM, borrowed for one call.
pub(crate) struct Machine<'a> {
    pub module: &'a Arc<Module>,
    pub heap: &'a mut Heap,
    pub globals: &'a mut Vec<Value>,
    pub profiles: &'a mut Vec<MethodProfile>,
    pub traps: &'a mut Vec<TrapProfile>,
    pub code: &'a CodeCache,
    pub broker: Option<&'a CompileBroker>,
    pub opts: &'a VmOptions,
}

/// One interpreter frame.
struct Frame {
    mid: MethodId,
    pc: usize,
    locals: Vec<Value>,
    stack: Vec<Value>,
}

fn pop(f: &mut Frame) -> Value {
    f.stack.pop().unwrap_or_else(|| unreachable!("stack depth checked by the verifier"))
}

fn pop_i(f: &mut Frame) -> i32 {
    ops::int(pop(f))
}

fn pop_l(f: &mut Frame) -> i64 {
    ops::long(pop(f))
}

fn pop_d(f: &mut Frame) -> f64 {
    ops::dbl(pop(f))
}

impl Machine<'_> {
    /// Execute a method, choosing the tier per the VM's compile mode.
    /// Re-entered by both tiers for nested calls; grows the Rust stack
    /// ahead of deep bytecode recursion.
    pub fn call(&mut self, mid: MethodId, args: &[Value]) -> Result<Option<Value>, VmError> {
        stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.dispatch(mid, args))
    }

    fn dispatch(&mut self, mid: MethodId, args: &[Value]) -> Result<Option<Value>, VmError> {
        if self.opts.mode != CompileMode::InterpOnly {
            if let Some(art) = self.compiled_for(mid) {
                return self.run_compiled(&art, args);
            }
        }
        self.enter(mid);
        let entry = self.frame_for(mid, args);
        self.interpret(vec![entry])
    }

    /// The artifact to run, if any. In `Forced` mode the first call
    /// compiles synchronously on this thread.
    fn compiled_for(&mut self, mid: MethodId) -> Option<Arc<Artifact>> {
        if let Some(art) = self.code.entrant(mid) {
            return Some(art);
        }
        if self.opts.mode == CompileMode::Forced && self.code.begin_compile(mid) {
            let snapshot = self.snapshot();
            crate::broker::compile_and_install(
                self.module,
                self.code,
                &self.opts.compile,
                self.opts.cache_dir.as_deref(),
                mid,
                self.code.version(mid),
                &snapshot,
            );
            return self.code.entrant(mid);
        }
        None
    }

    fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot::capture(self.profiles, self.traps, self.code)
    }

    fn enter(&mut self, mid: MethodId) {
        self.profiles[mid.index()].invocations += 1;
        self.maybe_enqueue(mid);
    }

    fn backedge(&mut self, mid: MethodId) {
        self.profiles[mid.index()].backedges += 1;
        self.maybe_enqueue(mid);
    }

    /// Tiering policy: entries plus a fraction of backedges against the
    /// threshold. Loop-heavy methods qualify without being re-entered.
    fn maybe_enqueue(&mut self, mid: MethodId) {
        if self.opts.mode != CompileMode::Mixed {
            return;
        }
        let Some(broker) = self.broker else {
            return;
        };
        let p = &self.profiles[mid.index()];
        if p.invocations + p.backedges / 8 < self.opts.compile_threshold {
            return;
        }
        if !self.code.begin_compile(mid) {
            return;
        }
        debug!(
            mid = mid.raw(),
            invocations = p.invocations,
            backedges = p.backedges,
            "queueing for compilation"
        );
        let task = CompileTask {
            module: Arc::clone(self.module),
            mid,
            version: self.code.version(mid),
            snapshot: self.snapshot(),
        };
        if !broker.enqueue(task) {
            self.code.abandon(mid);
        }
    }

    fn frame_for(&self, mid: MethodId, args: &[Value]) -> Frame {
        let method = self.module.method(mid);
        let mut locals = args.to_vec();
        locals.resize(method.max_locals as usize, Value::I32(0));
        Frame {
            mid,
            pc: 0,
            locals,
            stack: Vec::new(),
        }
    }

    /// Resume interpretation from rebuilt deopt frames, outermost first.
    pub fn interpret_images(
        &mut self,
        images: Vec<InterpFrameImage>,
    ) -> Result<Option<Value>, VmError> {
        let frames = images
            .into_iter()
            .map(|img| {
                let max = self.module.method(img.mid).max_locals as usize;
                let mut locals = img.locals;
                locals.resize(max, Value::I32(0));
                Frame {
                    mid: img.mid,
                    pc: img.bci as usize,
                    locals,
                    stack: img.stack,
                }
            })
            .collect();
        self.interpret(frames)
    }

    fn branch(&mut self, f: &mut Frame, bci: u32, target: u32, taken: bool) {
        self.profiles[f.mid.index()].record_branch(bci, taken);
        if taken {
            if target <= bci {
                self.backedge(f.mid);
            }
            f.pc = target as usize;
        }
    }

    fn interpret(&mut self, mut frames: Vec<Frame>) -> Result<Option<Value>, VmError> {
        let module = Arc::clone(self.module);
        loop {
            let f = frames.last_mut().unwrap_or_else(|| unreachable!());
            let mid = f.mid;
            let bci = u32::try_from(f.pc).unwrap_or(u32::MAX);
            let insn = module.method(mid).code[f.pc];
            f.pc += 1;
            match insn {
                Insn::IConst(x) => f.stack.push(Value::I32(x)),
                Insn::LConst(x) => f.stack.push(Value::I64(x)),
                Insn::DConst(bits) => f.stack.push(Value::F64(f64::from_bits(bits))),
                Insn::NullConst => f.stack.push(Value::Null),

                Insn::ILoad(i) | Insn::LLoad(i) | Insn::DLoad(i) | Insn::ALoad(i) => {
                    f.stack.push(f.locals[i as usize]);
                }
                Insn::IStore(i) | Insn::LStore(i) | Insn::DStore(i) | Insn::AStore(i) => {
                    f.locals[i as usize] = pop(f);
                }

                Insn::Pop => {
                    pop(f);
                }
                Insn::Dup => {
                    let top = *f
                        .stack
                        .last()
                        .unwrap_or_else(|| unreachable!("stack depth checked by the verifier"));
                    f.stack.push(top);
                }

                Insn::IAdd | Insn::ISub | Insn::IMul | Insn::IDiv | Insn::IRem | Insn::IAnd
                | Insn::IOr | Insn::IXor | Insn::IShl | Insn::IShr | Insn::IUShr => {
                    let b = pop_i(f);
                    let a = pop_i(f);
                    let r = match insn {
                        Insn::IAdd => a.wrapping_add(b),
                        Insn::ISub => a.wrapping_sub(b),
                        Insn::IMul => a.wrapping_mul(b),
                        Insn::IDiv => ops::idiv(a, b)?,
                        Insn::IRem => ops::irem(a, b)?,
                        Insn::IAnd => a & b,
                        Insn::IOr => a | b,
                        Insn::IXor => a ^ b,
                        Insn::IShl => ops::ishl(a, b),
                        Insn::IShr => ops::ishr(a, b),
                        _ => ops::iushr(a, b),
                    };
                    f.stack.push(Value::I32(r));
                }
                Insn::INeg => {
                    let a = pop_i(f);
                    f.stack.push(Value::I32(a.wrapping_neg()));
                }

                Insn::LShl | Insn::LShr | Insn::LUShr => {
                    let count = pop_i(f);
                    let a = pop_l(f);
                    let r = match insn {
                        Insn::LShl => ops::lshl(a, count),
                        Insn::LShr => ops::lshr(a, count),
                        _ => ops::lushr(a, count),
                    };
                    f.stack.push(Value::I64(r));
                }
                Insn::LAdd | Insn::LSub | Insn::LMul | Insn::LDiv | Insn::LRem | Insn::LAnd
                | Insn::LOr | Insn::LXor => {
                    let b = pop_l(f);
                    let a = pop_l(f);
                    let r = match insn {
                        Insn::LAdd => a.wrapping_add(b),
                        Insn::LSub => a.wrapping_sub(b),
                        Insn::LMul => a.wrapping_mul(b),
                        Insn::LDiv => ops::ldiv(a, b)?,
                        Insn::LRem => ops::lrem(a, b)?,
                        Insn::LAnd => a & b,
                        Insn::LOr => a | b,
                        _ => a ^ b,
                    };
                    f.stack.push(Value::I64(r));
                }
                Insn::LNeg => {
                    let a = pop_l(f);
                    f.stack.push(Value::I64(a.wrapping_neg()));
                }
                Insn::LCmp => {
                    let b = pop_l(f);
                    let a = pop_l(f);
                    f.stack.push(Value::I32(ops::lcmp(a, b)));
                }

                Insn::DAdd | Insn::DSub | Insn::DMul | Insn::DDiv | Insn::DRem => {
                    let b = pop_d(f);
                    let a = pop_d(f);
                    let r = match insn {
                        Insn::DAdd => a + b,
                        Insn::DSub => a - b,
                        Insn::DMul => a * b,
                        Insn::DDiv => a / b,
                        _ => a % b,
                    };
                    f.stack.push(Value::F64(r));
                }
                Insn::DNeg => {
                    let a = pop_d(f);
                    f.stack.push(Value::F64(-a));
                }
                Insn::DCmpL | Insn::DCmpG => {
                    let b = pop_d(f);
                    let a = pop_d(f);
                    let nan = if matches!(insn, Insn::DCmpL) { -1 } else { 1 };
                    f.stack.push(Value::I32(ops::dcmp(a, b, nan)));
                }

                Insn::I2L => {
                    let a = pop_i(f);
                    f.stack.push(Value::I64(i64::from(a)));
                }
                Insn::L2I => {
                    let a = pop_l(f);
                    f.stack.push(Value::I32(a as i32));
                }
                Insn::I2D => {
                    let a = pop_i(f);
                    f.stack.push(Value::F64(f64::from(a)));
                }
                Insn::D2I => {
                    let a = pop_d(f);
                    f.stack.push(Value::I32(ops::d2i(a)));
                }
                Insn::L2D => {
                    let a = pop_l(f);
                    f.stack.push(Value::F64(a as f64));
                }
                Insn::D2L => {
                    let a = pop_d(f);
                    f.stack.push(Value::I64(ops::d2l(a)));
                }

                Insn::Goto(t) => {
                    if t <= bci {
                        self.backedge(mid);
                    }
                    f.pc = t as usize;
                }
                Insn::IfEq(t) | Insn::IfNe(t) | Insn::IfLt(t) | Insn::IfGe(t) | Insn::IfGt(t)
                | Insn::IfLe(t) => {
                    let a = pop_i(f);
                    let taken = match insn {
                        Insn::IfEq(_) => a == 0,
                        Insn::IfNe(_) => a != 0,
                        Insn::IfLt(_) => a < 0,
                        Insn::IfGe(_) => a >= 0,
                        Insn::IfGt(_) => a > 0,
                        _ => a <= 0,
                    };
                    self.branch(f, bci, t, taken);
                }
                Insn::IfICmpEq(t) | Insn::IfICmpNe(t) | Insn::IfICmpLt(t) | Insn::IfICmpGe(t)
                | Insn::IfICmpGt(t) | Insn::IfICmpLe(t) => {
                    let b = pop_i(f);
                    let a = pop_i(f);
                    let taken = match insn {
                        Insn::IfICmpEq(_) => a == b,
                        Insn::IfICmpNe(_) => a != b,
                        Insn::IfICmpLt(_) => a < b,
                        Insn::IfICmpGe(_) => a >= b,
                        Insn::IfICmpGt(_) => a > b,
                        _ => a <= b,
                    };
                    self.branch(f, bci, t, taken);
                }
                Insn::IfNull(t) | Insn::IfNonNull(t) => {
                    let is_null = ops::refv(pop(f)).is_none();
                    let taken = if matches!(insn, Insn::IfNull(_)) { is_null } else { !is_null };
                    self.branch(f, bci, t, taken);
                }

                Insn::NewArr(kind) => {
                    let len = pop_i(f);
                    let r = self.heap.alloc(kind, len)?;
                    f.stack.push(Value::Ref(r));
                }
                Insn::ArrayLen => {
                    let r = ops::arr(pop(f))?;
                    f.stack.push(Value::I32(self.heap.len(r)));
                }
                Insn::IALoad | Insn::LALoad | Insn::DALoad => {
                    let idx = pop_i(f);
                    let r = ops::arr(pop(f))?;
                    f.stack.push(self.heap.load(r, idx)?);
                }
                Insn::IAStore | Insn::LAStore | Insn::DAStore => {
                    let v = pop(f);
                    let idx = pop_i(f);
                    let r = ops::arr(pop(f))?;
                    self.heap.store(r, idx, v)?;
                }

                Insn::GetGlobal(g) => f.stack.push(self.globals[g as usize]),
                Insn::SetGlobal(g) => self.globals[g as usize] = pop(f),

                Insn::Call(raw) => {
                    let callee = MethodId(raw);
                    let argc = module.method(callee).n_params();
                    let at = f.stack.len() - argc;
                    let args: Vec<Value> = f.stack.split_off(at);
                    let compiled = if self.opts.mode == CompileMode::InterpOnly {
                        None
                    } else {
                        self.compiled_for(callee)
                    };
                    if let Some(art) = compiled {
                        if let Some(v) = self.run_compiled(&art, &args)? {
                            frames
                                .last_mut()
                                .unwrap_or_else(|| unreachable!())
                                .stack
                                .push(v);
                        }
                    } else {
                        self.enter(callee);
                        frames.push(self.frame_for(callee, &args));
                    }
                }

                Insn::Ret | Insn::IRet | Insn::LRet | Insn::DRet | Insn::ARet => {
                    let value = if matches!(insn, Insn::Ret) { None } else { Some(pop(f)) };
                    frames.pop();
                    match frames.last_mut() {
                        None => return Ok(value),
                        Some(caller) => {
                            if let Some(v) = value {
                                caller.stack.push(v);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "interp/tests.rs"]
mod tests;
