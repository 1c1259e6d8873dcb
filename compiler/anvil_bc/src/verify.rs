//! Bytecode verifier.
//!
//! Abstract interpretation per method: every reachable bci gets a stack map
//! (local and operand-stack kinds), merges at join points must agree, branch
//! targets must be in range, and execution can never fall off the end of the
//! code. Both the interpreter and the compiler assume verified input and do
//! not re-check any of this.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::insn::Insn;
use crate::kind::{ArrayKind, Kind};
use crate::module::{Method, Module};


/// Verification failure, located at a method and bci.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerifyError {
    pub method: String,
    pub bci: u32,
    pub kind: VerifyErrorKind,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerifyErrorKind {
    EmptyCode,
    TooManyParams,
    StackUnderflow,
    KindMismatch { expected: String, found: String },
    UninitializedLocal(u16),
    LocalOutOfRange(u16),
    BadBranchTarget(u32),
    FallsOffEnd,
    MergeConflict,
    BadCallTarget(u16),
    CallArity { expected: usize, found: usize },
    BadGlobal(u16),
    GlobalInitMismatch { global: String },
    ReturnMismatch { expected: String, found: String },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "verify error in `{}` at bci {}: ", self.method, self.bci)?;
        match &self.kind {
            VerifyErrorKind::EmptyCode => f.write_str("method has no code"),
            VerifyErrorKind::TooManyParams => f.write_str("params exceed max_locals"),
            VerifyErrorKind::StackUnderflow => f.write_str("operand stack underflow"),
            VerifyErrorKind::KindMismatch { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            VerifyErrorKind::UninitializedLocal(i) => {
                write!(f, "local {i} may be uninitialized")
            }
            VerifyErrorKind::LocalOutOfRange(i) => write!(f, "local {i} out of range"),
            VerifyErrorKind::BadBranchTarget(t) => write!(f, "branch target {t} out of range"),
            VerifyErrorKind::FallsOffEnd => f.write_str("execution can fall off the end"),
            VerifyErrorKind::MergeConflict => {
                f.write_str("incompatible operand stacks at merge point")
            }
            VerifyErrorKind::BadCallTarget(m) => write!(f, "call to unknown method {m}"),
            VerifyErrorKind::CallArity { expected, found } => {
                write!(f, "call expects {expected} args, found {found}")
            }
            VerifyErrorKind::BadGlobal(g) => write!(f, "unknown global {g}"),
            VerifyErrorKind::GlobalInitMismatch { global } => {
                write!(f, "initializer of global `{global}` does not fit its kind")
            }
            VerifyErrorKind::ReturnMismatch { expected, found } => {
                write!(f, "return of {found}, method returns {expected}")
            }
        }
    }
}

impl std::error::Error for VerifyError {}

/// Slot type during verification. `Null` is the type of the null constant
/// and merges with any reference type.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum VTy {
    I32,
    I64,
    F64,
    Ref(ArrayKind),
    Null,
}

impl VTy {
    fn of(kind: Kind) -> VTy {
        match kind {
            Kind::I32 => VTy::I32,
            Kind::I64 => VTy::I64,
            Kind::F64 => VTy::F64,
            Kind::Ref(ak) => VTy::Ref(ak),
        }
    }

    fn name(self) -> String {
        match self {
            VTy::I32 => "int".into(),
            VTy::I64 => "long".into(),
            VTy::F64 => "double".into(),
            VTy::Ref(ak) => ak.name().into(),
            VTy::Null => "null".into(),
        }
    }

    /// Merge two slot types; `None` means incompatible.
    fn merge(self, other: VTy) -> Option<VTy> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (VTy::Null, VTy::Ref(k)) | (VTy::Ref(k), VTy::Null) => Some(VTy::Ref(k)),
            _ => None,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
struct State {
    locals: Vec<Option<VTy>>,
    stack: Vec<VTy>,
}

impl State {
    /// Merge `other` into `self`. Locals that disagree die (become
    /// uninitialized); stacks that disagree are an error. Returns whether
    /// `self` changed.
    fn merge_from(&mut self, other: &State) -> Result<bool, VerifyErrorKind> {
        if self.stack.len() != other.stack.len() {
            return Err(VerifyErrorKind::MergeConflict);
        }
        let mut changed = false;
        for (mine, theirs) in self.locals.iter_mut().zip(&other.locals) {
            let merged = match (*mine, *theirs) {
                (Some(a), Some(b)) => a.merge(b),
                _ => None,
            };
            if *mine != merged {
                *mine = merged;
                changed = true;
            }
        }
        for (mine, theirs) in self.stack.iter_mut().zip(&other.stack) {
            match mine.merge(*theirs) {
                Some(m) => {
                    if *mine != m {
                        *mine = m;
                        changed = true;
                    }
                }
                None => return Err(VerifyErrorKind::MergeConflict),
            }
        }
        Ok(changed)
    }
}

/// Verify every method and global of a module.
pub fn verify(module: &Module) -> Result<(), VerifyError> {
    for global in &module.globals {
        if !global.init.fits(global.kind) {
            return Err(VerifyError {
                method: String::new(),
                bci: 0,
                kind: VerifyErrorKind::GlobalInitMismatch {
                    global: global.name.clone(),
                },
            });
        }
    }
    for method in &module.methods {
        MethodVerifier::new(module, method).run()?;
    }
    Ok(())
}

struct MethodVerifier<'a> {
    module: &'a Module,
    method: &'a Method,
    states: FxHashMap<u32, State>,
    work: Vec<u32>,
}

impl<'a> MethodVerifier<'a> {
    fn new(module: &'a Module, method: &'a Method) -> Self {
        MethodVerifier {
            module,
            method,
            states: FxHashMap::default(),
            work: Vec::new(),
        }
    }

    fn err(&self, bci: u32, kind: VerifyErrorKind) -> VerifyError {
        VerifyError {
            method: self.method.name.clone(),
            bci,
            kind,
        }
    }

    fn run(mut self) -> Result<(), VerifyError> {
        if self.method.code.is_empty() {
            return Err(self.err(0, VerifyErrorKind::EmptyCode));
        }
        if self.method.n_params() > self.method.max_locals as usize {
            return Err(self.err(0, VerifyErrorKind::TooManyParams));
        }

        let mut entry = State {
            locals: vec![None; self.method.max_locals as usize],
            stack: Vec::new(),
        };
        for (i, p) in self.method.params.iter().enumerate() {
            entry.locals[i] = Some(VTy::of(*p));
        }
        self.states.insert(0, entry);
        self.work.push(0);

        while let Some(bci) = self.work.pop() {
            let state = self.states[&bci].clone();
            self.step(bci, state)?;
        }
        Ok(())
    }

    /// Simulate the instruction at `bci` and merge into its successors.
    #[allow(clippy::too_many_lines)]
    fn step(&mut self, bci: u32, mut st: State) -> Result<(), VerifyError> {
        use VerifyErrorKind as E;
        let insn = self.method.code[bci as usize];

        macro_rules! pop {
            ($expect:expr) => {{
                let Some(top) = st.stack.pop() else {
                    return Err(self.err(bci, E::StackUnderflow));
                };
                let expect: VTy = $expect;
                if top.merge(expect).is_none() {
                    return Err(self.err(
                        bci,
                        E::KindMismatch {
                            expected: expect.name(),
                            found: top.name(),
                        },
                    ));
                }
                top
            }};
        }
        macro_rules! pop_any_ref {
            () => {{
                let Some(top) = st.stack.pop() else {
                    return Err(self.err(bci, E::StackUnderflow));
                };
                match top {
                    VTy::Ref(ak) => Some(ak),
                    VTy::Null => None,
                    other => {
                        return Err(self.err(
                            bci,
                            E::KindMismatch {
                                expected: "array reference".into(),
                                found: other.name(),
                            },
                        ))
                    }
                }
            }};
        }

        let load_local = |this: &Self, st: &State, idx: u16, want: Option<VTy>| {
            if idx as usize >= st.locals.len() {
                return Err(this.err(bci, E::LocalOutOfRange(idx)));
            }
            let Some(ty) = st.locals[idx as usize] else {
                return Err(this.err(bci, E::UninitializedLocal(idx)));
            };
            if let Some(w) = want {
                if ty.merge(w).is_none() {
                    return Err(this.err(
                        bci,
                        E::KindMismatch {
                            expected: w.name(),
                            found: ty.name(),
                        },
                    ));
                }
            }
            Ok(ty)
        };

        let mut branch: Option<u32> = None;
        let mut falls_through = true;

        match insn {
            Insn::IConst(_) => st.stack.push(VTy::I32),
            Insn::LConst(_) => st.stack.push(VTy::I64),
            Insn::DConst(_) => st.stack.push(VTy::F64),
            Insn::NullConst => st.stack.push(VTy::Null),

            Insn::ILoad(i) => {
                load_local(self, &st, i, Some(VTy::I32))?;
                st.stack.push(VTy::I32);
            }
            Insn::LLoad(i) => {
                load_local(self, &st, i, Some(VTy::I64))?;
                st.stack.push(VTy::I64);
            }
            Insn::DLoad(i) => {
                load_local(self, &st, i, Some(VTy::F64))?;
                st.stack.push(VTy::F64);
            }
            Insn::ALoad(i) => {
                let ty = load_local(self, &st, i, None)?;
                match ty {
                    VTy::Ref(_) | VTy::Null => st.stack.push(ty),
                    other => {
                        return Err(self.err(
                            bci,
                            E::KindMismatch {
                                expected: "array reference".into(),
                                found: other.name(),
                            },
                        ))
                    }
                }
            }
            Insn::IStore(i) | Insn::LStore(i) | Insn::DStore(i) | Insn::AStore(i) => {
                if i as usize >= st.locals.len() {
                    return Err(self.err(bci, E::LocalOutOfRange(i)));
                }
                let ty = match insn {
                    Insn::IStore(_) => pop!(VTy::I32),
                    Insn::LStore(_) => pop!(VTy::I64),
                    Insn::DStore(_) => pop!(VTy::F64),
                    _ => {
                        let ak = pop_any_ref!();
                        match ak {
                            Some(ak) => VTy::Ref(ak),
                            None => VTy::Null,
                        }
                    }
                };
                st.locals[i as usize] = Some(ty);
            }

            Insn::Pop => {
                if st.stack.pop().is_none() {
                    return Err(self.err(bci, E::StackUnderflow));
                }
            }
            Insn::Dup => {
                let Some(top) = st.stack.last().copied() else {
                    return Err(self.err(bci, E::StackUnderflow));
                };
                st.stack.push(top);
            }

            Insn::IAdd
            | Insn::ISub
            | Insn::IMul
            | Insn::IDiv
            | Insn::IRem
            | Insn::IAnd
            | Insn::IOr
            | Insn::IXor
            | Insn::IShl
            | Insn::IShr
            | Insn::IUShr => {
                pop!(VTy::I32);
                pop!(VTy::I32);
                st.stack.push(VTy::I32);
            }
            Insn::INeg => {
                pop!(VTy::I32);
                st.stack.push(VTy::I32);
            }
            Insn::LAdd
            | Insn::LSub
            | Insn::LMul
            | Insn::LDiv
            | Insn::LRem
            | Insn::LAnd
            | Insn::LOr
            | Insn::LXor => {
                pop!(VTy::I64);
                pop!(VTy::I64);
                st.stack.push(VTy::I64);
            }
            // Long shifts take an int count on top.
            Insn::LShl | Insn::LShr | Insn::LUShr => {
                pop!(VTy::I32);
                pop!(VTy::I64);
                st.stack.push(VTy::I64);
            }
            Insn::LNeg => {
                pop!(VTy::I64);
                st.stack.push(VTy::I64);
            }
            Insn::LCmp => {
                pop!(VTy::I64);
                pop!(VTy::I64);
                st.stack.push(VTy::I32);
            }
            Insn::DAdd | Insn::DSub | Insn::DMul | Insn::DDiv | Insn::DRem => {
                pop!(VTy::F64);
                pop!(VTy::F64);
                st.stack.push(VTy::F64);
            }
            Insn::DNeg => {
                pop!(VTy::F64);
                st.stack.push(VTy::F64);
            }
            Insn::DCmpL | Insn::DCmpG => {
                pop!(VTy::F64);
                pop!(VTy::F64);
                st.stack.push(VTy::I32);
            }

            Insn::I2L => {
                pop!(VTy::I32);
                st.stack.push(VTy::I64);
            }
            Insn::L2I => {
                pop!(VTy::I64);
                st.stack.push(VTy::I32);
            }
            Insn::I2D => {
                pop!(VTy::I32);
                st.stack.push(VTy::F64);
            }
            Insn::D2I => {
                pop!(VTy::F64);
                st.stack.push(VTy::I32);
            }
            Insn::L2D => {
                pop!(VTy::I64);
                st.stack.push(VTy::F64);
            }
            Insn::D2L => {
                pop!(VTy::F64);
                st.stack.push(VTy::I64);
            }

            Insn::Goto(t) => {
                branch = Some(t);
                falls_through = false;
            }
            Insn::IfEq(t)
            | Insn::IfNe(t)
            | Insn::IfLt(t)
            | Insn::IfGe(t)
            | Insn::IfGt(t)
            | Insn::IfLe(t) => {
                pop!(VTy::I32);
                branch = Some(t);
            }
            Insn::IfICmpEq(t)
            | Insn::IfICmpNe(t)
            | Insn::IfICmpLt(t)
            | Insn::IfICmpGe(t)
            | Insn::IfICmpGt(t)
            | Insn::IfICmpLe(t) => {
                pop!(VTy::I32);
                pop!(VTy::I32);
                branch = Some(t);
            }
            Insn::IfNull(t) | Insn::IfNonNull(t) => {
                pop_any_ref!();
                branch = Some(t);
            }

            Insn::NewArr(ak) => {
                pop!(VTy::I32);
                st.stack.push(VTy::Ref(ak));
            }
            Insn::ArrayLen => {
                pop_any_ref!();
                st.stack.push(VTy::I32);
            }
            Insn::IALoad | Insn::LALoad | Insn::DALoad => {
                pop!(VTy::I32);
                let want = match insn {
                    Insn::IALoad => ArrayKind::I32,
                    Insn::LALoad => ArrayKind::I64,
                    _ => ArrayKind::F64,
                };
                let got = pop_any_ref!();
                if let Some(got) = got {
                    if got != want {
                        return Err(self.err(
                            bci,
                            E::KindMismatch {
                                expected: want.name().into(),
                                found: got.name().into(),
                            },
                        ));
                    }
                }
                st.stack.push(VTy::of(want.elem_kind()));
            }
            Insn::IAStore | Insn::LAStore | Insn::DAStore => {
                let want = match insn {
                    Insn::IAStore => ArrayKind::I32,
                    Insn::LAStore => ArrayKind::I64,
                    _ => ArrayKind::F64,
                };
                pop!(VTy::of(want.elem_kind()));
                pop!(VTy::I32);
                let got = pop_any_ref!();
                if let Some(got) = got {
                    if got != want {
                        return Err(self.err(
                            bci,
                            E::KindMismatch {
                                expected: want.name().into(),
                                found: got.name().into(),
                            },
                        ));
                    }
                }
            }

            Insn::GetGlobal(g) => {
                let Some(global) = self.module.globals.get(g as usize) else {
                    return Err(self.err(bci, E::BadGlobal(g)));
                };
                st.stack.push(VTy::of(global.kind));
            }
            Insn::SetGlobal(g) => {
                let Some(global) = self.module.globals.get(g as usize) else {
                    return Err(self.err(bci, E::BadGlobal(g)));
                };
                pop!(VTy::of(global.kind));
            }

            Insn::Call(m) => {
                let Some(callee) = self.module.methods.get(m as usize) else {
                    return Err(self.err(bci, E::BadCallTarget(m)));
                };
                if st.stack.len() < callee.n_params() {
                    return Err(self.err(
                        bci,
                        E::CallArity {
                            expected: callee.n_params(),
                            found: st.stack.len(),
                        },
                    ));
                }
                // Args were pushed left to right; check right to left.
                for param in callee.params.iter().rev() {
                    pop!(VTy::of(*param));
                }
                if let Some(ret) = callee.ret {
                    st.stack.push(VTy::of(ret));
                }
            }

            Insn::Ret | Insn::IRet | Insn::LRet | Insn::DRet | Insn::ARet => {
                let found = match insn {
                    Insn::Ret => None,
                    Insn::IRet => Some(pop!(VTy::I32)),
                    Insn::LRet => Some(pop!(VTy::I64)),
                    Insn::DRet => Some(pop!(VTy::F64)),
                    _ => {
                        let ak = pop_any_ref!();
                        Some(match ak {
                            Some(ak) => VTy::Ref(ak),
                            None => VTy::Null,
                        })
                    }
                };
                let ok = match (self.method.ret, insn) {
                    (None, Insn::Ret) => true,
                    (Some(Kind::I32), Insn::IRet)
                    | (Some(Kind::I64), Insn::LRet)
                    | (Some(Kind::F64), Insn::DRet) => true,
                    (Some(Kind::Ref(want)), Insn::ARet) => {
                        matches!(found, Some(VTy::Null) | None)
                            || found == Some(VTy::Ref(want))
                    }
                    _ => false,
                };
                if !ok {
                    return Err(self.err(
                        bci,
                        E::ReturnMismatch {
                            expected: self
                                .method
                                .ret
                                .map_or_else(|| "void".into(), |k| k.name().into()),
                            found: found.map_or_else(|| "void".into(), VTy::name),
                        },
                    ));
                }
                falls_through = false;
            }
        }

        if let Some(t) = branch {
            if t as usize >= self.method.code.len() {
                return Err(self.err(bci, E::BadBranchTarget(t)));
            }
            self.flow_to(bci, t, st.clone())?;
        }
        if falls_through {
            let next = bci + 1;
            if next as usize >= self.method.code.len() {
                return Err(self.err(bci, E::FallsOffEnd));
            }
            self.flow_to(bci, next, st)?;
        }
        Ok(())
    }

    fn flow_to(&mut self, from: u32, to: u32, state: State) -> Result<(), VerifyError> {
        match self.states.get_mut(&to) {
            Some(existing) => {
                let changed = existing.merge_from(&state).map_err(|kind| VerifyError {
                    method: self.method.name.clone(),
                    bci: from,
                    kind,
                })?;
                if changed {
                    self.work.push(to);
                }
            }
            None => {
                self.states.insert(to, state);
                self.work.push(to);
            }
        }
        Ok(())
    }
}
