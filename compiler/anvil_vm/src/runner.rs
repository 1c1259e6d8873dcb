//! Executes compiled artifacts.
//!
//! The runner models the machine an artifact was allocated for: one
//! register file of [`K_REGS`] slots per class plus the frame's spill
//! slots, all holding [`Value`]s. Guards that fail and safepoint polls
//! that find the artifact no longer entrant capture the values named by
//! the deopt record, rebuild interpreter frames and hand control back to
//! the interpreter tier; everything else runs straight through.

use anvil_bc::Value;
use anvil_codegen::{
    Artifact, Cmp3Kind, CmpKind, ConvOp, DoubleOp, IntOp, K_REGS, LInsn, Loc, LongOp, Operand,
    RegClass, VReg,
};
use anvil_deopt::{Action, FrameRebuilder, InterpFrameImage, Reason};
use anvil_ir::RaiseKind;
use tracing::{debug, trace};

use crate::error::VmError;
use crate::interp::Machine;
use crate::ops;

const NREGS: usize = K_REGS as usize;

/// How a compiled execution ended, short of a hard error.
enum RunOutcome {
    Done(Option<Value>),
    Deopt(Vec<InterpFrameImage>),
}

/// Register file plus spill frame for one artifact activation.
struct RegFile {
    gpr: [Value; NREGS],
    fpr: [Value; NREGS],
    slots: Vec<Value>,
}

impl RegFile {
    fn new(frame_size: u32) -> RegFile {
        RegFile {
            gpr: [Value::I32(0); NREGS],
            fpr: [Value::I32(0); NREGS],
            slots: vec![Value::I32(0); frame_size as usize],
        }
    }

    fn read(&self, art: &Artifact, v: VReg) -> Value {
        match art.loc(v) {
            Loc::Reg(r) => match art.classes[v.index()] {
                RegClass::Gpr => self.gpr[r as usize],
                RegClass::Fpr => self.fpr[r as usize],
            },
            Loc::Slot(s) => self.slots[s as usize],
        }
    }

    fn write(&mut self, art: &Artifact, v: VReg, val: Value) {
        match art.loc(v) {
            Loc::Reg(r) => match art.classes[v.index()] {
                RegClass::Gpr => self.gpr[r as usize] = val,
                RegClass::Fpr => self.fpr[r as usize] = val,
            },
            Loc::Slot(s) => self.slots[s as usize] = val,
        }
    }
}

fn operand_i(art: &Artifact, regs: &RegFile, b: Operand) -> i32 {
    match b {
        Operand::Reg(r) => ops::int(regs.read(art, r)),
        Operand::Imm(imm) => imm,
    }
}

/// Condition code for a fused compare: -1/0/1 (pointer compares only
/// ever feed `Eq`/`Ne`, so unequal is reported as 1).
fn cmp_cc(art: &Artifact, regs: &RegFile, kind: CmpKind, a: VReg, b: Operand) -> i32 {
    match kind {
        CmpKind::I => ops::icmp(ops::int(regs.read(art, a)), operand_i(art, regs, b)),
        CmpKind::U => ops::ucmp(ops::int(regs.read(art, a)), operand_i(art, regs, b)),
        CmpKind::L => {
            let x = ops::long(regs.read(art, a));
            let y = match b {
                Operand::Reg(r) => ops::long(regs.read(art, r)),
                Operand::Imm(imm) => i64::from(imm),
            };
            ops::lcmp(x, y)
        }
        CmpKind::P => {
            let x = ops::refv(regs.read(art, a));
            let y = match b {
                Operand::Reg(r) => ops::refv(regs.read(art, r)),
                Operand::Imm(_) => unreachable!("pointer compares never fold an immediate"),
            };
            i32::from(x != y)
        }
    }
}

impl Machine<'_> {
    /// Run an artifact; on deoptimization, finish the call in the
    /// interpreter from the rebuilt frames.
    pub fn run_compiled(
        &mut self,
        art: &Artifact,
        args: &[Value],
    ) -> Result<Option<Value>, VmError> {
        trace!(mid = art.mid.raw(), "entering compiled code");
        match self.run_lir(art, args)? {
            RunOutcome::Done(v) => Ok(v),
            RunOutcome::Deopt(frames) => self.interpret_images(frames),
        }
    }

    fn run_lir(&mut self, art: &Artifact, args: &[Value]) -> Result<RunOutcome, VmError> {
        let mut regs = RegFile::new(art.frame_size);
        for (v, val) in art.params.iter().zip(args.iter()) {
            regs.write(art, *v, *val);
        }

        let mut block = 0usize;
        let mut at = 0usize;
        loop {
            let insn = &art.blocks[block].insns[at];
            at += 1;
            match insn {
                LInsn::Const { dst, value } => regs.write(art, *dst, *value),
                LInsn::Mov { dst, src } => {
                    let v = regs.read(art, *src);
                    regs.write(art, *dst, v);
                }

                LInsn::AluI { op, dst, a, b } => {
                    let x = ops::int(regs.read(art, *a));
                    let y = operand_i(art, &regs, *b);
                    let r = match op {
                        IntOp::Add => x.wrapping_add(y),
                        IntOp::Sub => x.wrapping_sub(y),
                        IntOp::Mul => x.wrapping_mul(y),
                        IntOp::Div => ops::idiv(x, y)?,
                        IntOp::Rem => ops::irem(x, y)?,
                        IntOp::And => x & y,
                        IntOp::Or => x | y,
                        IntOp::Xor => x ^ y,
                        IntOp::Shl => ops::ishl(x, y),
                        IntOp::Shr => ops::ishr(x, y),
                        IntOp::UShr => ops::iushr(x, y),
                        IntOp::Min => x.min(y),
                        IntOp::Max => x.max(y),
                    };
                    regs.write(art, *dst, Value::I32(r));
                }
                LInsn::AluL { op, dst, a, b } => {
                    let x = ops::long(regs.read(art, *a));
                    let r = match op {
                        // Shift counts are ints.
                        LongOp::Shl => ops::lshl(x, ops::int(regs.read(art, *b))),
                        LongOp::Shr => ops::lshr(x, ops::int(regs.read(art, *b))),
                        LongOp::UShr => ops::lushr(x, ops::int(regs.read(art, *b))),
                        _ => {
                            let y = ops::long(regs.read(art, *b));
                            match op {
                                LongOp::Add => x.wrapping_add(y),
                                LongOp::Sub => x.wrapping_sub(y),
                                LongOp::Mul => x.wrapping_mul(y),
                                LongOp::Div => ops::ldiv(x, y)?,
                                LongOp::Rem => ops::lrem(x, y)?,
                                LongOp::And => x & y,
                                LongOp::Or => x | y,
                                _ => x ^ y,
                            }
                        }
                    };
                    regs.write(art, *dst, Value::I64(r));
                }
                LInsn::AluD { op, dst, a, b } => {
                    let x = ops::dbl(regs.read(art, *a));
                    let y = ops::dbl(regs.read(art, *b));
                    let r = match op {
                        DoubleOp::Add => x + y,
                        DoubleOp::Sub => x - y,
                        DoubleOp::Mul => x * y,
                        DoubleOp::Div => x / y,
                        DoubleOp::Rem => x % y,
                    };
                    regs.write(art, *dst, Value::F64(r));
                }
                LInsn::NegD { dst, src } => {
                    let x = ops::dbl(regs.read(art, *src));
                    regs.write(art, *dst, Value::F64(-x));
                }

                LInsn::Cmp3 { kind, dst, a, b } => {
                    let r = match kind {
                        Cmp3Kind::L => {
                            ops::lcmp(ops::long(regs.read(art, *a)), ops::long(regs.read(art, *b)))
                        }
                        Cmp3Kind::Dl => {
                            ops::dcmp(ops::dbl(regs.read(art, *a)), ops::dbl(regs.read(art, *b)), -1)
                        }
                        Cmp3Kind::Dg => {
                            ops::dcmp(ops::dbl(regs.read(art, *a)), ops::dbl(regs.read(art, *b)), 1)
                        }
                    };
                    regs.write(art, *dst, Value::I32(r));
                }
                LInsn::Conv { op, dst, src } => {
                    let v = regs.read(art, *src);
                    let r = match op {
                        ConvOp::I2L => Value::I64(i64::from(ops::int(v))),
                        ConvOp::L2I => Value::I32(ops::long(v) as i32),
                        ConvOp::I2D => Value::F64(f64::from(ops::int(v))),
                        ConvOp::D2I => Value::I32(ops::d2i(ops::dbl(v))),
                        ConvOp::L2D => Value::F64(ops::long(v) as f64),
                        ConvOp::D2L => Value::I64(ops::d2l(ops::dbl(v))),
                    };
                    regs.write(art, *dst, r);
                }
                LInsn::SetCond { kind, test, dst, a, b } => {
                    let cc = cmp_cc(art, &regs, *kind, *a, *b);
                    regs.write(art, *dst, Value::I32(i32::from(test.eval(cc))));
                }

                LInsn::ArrayLen { dst, base } => {
                    let r = ops::arr(regs.read(art, *base))?;
                    regs.write(art, *dst, Value::I32(self.heap.len(r)));
                }
                LInsn::LoadArr { kind: _, dst, base, idx } => {
                    let r = ops::arr(regs.read(art, *base))?;
                    let i = ops::int(regs.read(art, *idx));
                    let v = self.heap.load(r, i)?;
                    regs.write(art, *dst, v);
                }
                LInsn::StoreArr { kind: _, base, idx, src } => {
                    let r = ops::arr(regs.read(art, *base))?;
                    let i = ops::int(regs.read(art, *idx));
                    let v = regs.read(art, *src);
                    self.heap.store(r, i, v)?;
                }
                LInsn::NewArr { kind, dst, len } => {
                    let n = ops::int(regs.read(art, *len));
                    let r = self.heap.alloc(*kind, n)?;
                    regs.write(art, *dst, Value::Ref(r));
                }

                LInsn::LoadGlobal { dst, global } => {
                    regs.write(art, *dst, self.globals[*global as usize]);
                }
                LInsn::StoreGlobal { global, src } => {
                    self.globals[*global as usize] = regs.read(art, *src);
                }

                LInsn::Call { mid, dst, args: call_args, deopt_id: _ } => {
                    let vals: Vec<Value> =
                        call_args.iter().map(|v| regs.read(art, *v)).collect();
                    let ret = self.call(*mid, &vals)?;
                    if let Some(d) = dst {
                        regs.write(art, *d, ret.unwrap_or_else(|| unreachable!()));
                    }
                }

                LInsn::GuardTrap { kind, test, a, b, deopt_id } => {
                    let cc = cmp_cc(art, &regs, *kind, *a, *b);
                    if test.eval(cc) {
                        return Ok(RunOutcome::Deopt(self.deopt(art, *deopt_id, &regs)?));
                    }
                }
                LInsn::Safepoint { deopt_id } => {
                    if !self.code.is_entrant(art.mid) {
                        return Ok(RunOutcome::Deopt(self.deopt(art, *deopt_id, &regs)?));
                    }
                }

                LInsn::Jump { target } => {
                    block = *target as usize;
                    at = 0;
                }
                LInsn::Branch { kind, test, a, b, on_true, on_false } => {
                    let cc = cmp_cc(art, &regs, *kind, *a, *b);
                    block = if test.eval(cc) { *on_true } else { *on_false } as usize;
                    at = 0;
                }
                LInsn::Ret { src } => {
                    return Ok(RunOutcome::Done(src.map(|v| regs.read(art, v))));
                }
                LInsn::Raise { kind, args: raise_args } => {
                    let arg = |i: usize| ops::int(regs.read(art, raise_args[i]));
                    return Err(match kind {
                        RaiseKind::NullDeref => VmError::NullDeref,
                        RaiseKind::IndexOutOfBounds => VmError::IndexOutOfBounds {
                            index: arg(0),
                            length: arg(1),
                        },
                        RaiseKind::DivByZero => VmError::DivByZero,
                        RaiseKind::NegativeArraySize => {
                            VmError::NegativeArraySize { len: arg(0) }
                        }
                    });
                }
                LInsn::Deopt { deopt_id } => {
                    return Ok(RunOutcome::Deopt(self.deopt(art, *deopt_id, &regs)?));
                }
            }
        }
    }

    /// Leave compiled code through a deopt record: update the trap
    /// profile, maybe invalidate the artifact, and rebuild the
    /// interpreter frames it describes.
    fn deopt(
        &mut self,
        art: &Artifact,
        id: u32,
        regs: &RegFile,
    ) -> Result<Vec<InterpFrameImage>, VmError> {
        let rec = &art.deopts[id as usize];
        let values: Vec<Value> = rec.values.iter().map(|v| regs.read(art, *v)).collect();

        if rec.reason == Reason::None {
            debug!(mid = art.mid.raw(), bci = rec.desc.bci, "leaving non-entrant code at safepoint");
        } else {
            let action = self.traps[art.mid.index()].record_trap(rec.desc.bci, rec.reason);
            debug!(
                mid = art.mid.raw(),
                bci = rec.desc.bci,
                reason = rec.reason.name(),
                action = action.name(),
                "deoptimizing"
            );
            if action.invalidates() {
                self.code.make_not_entrant(art.mid);
            }
            if action == Action::MakeNotCompilable {
                self.code.make_not_compilable(art.mid);
            }
        }

        FrameRebuilder::rebuild(&rec.desc, &values)
            .ok_or(VmError::CorruptArtifact { mid: art.mid })
    }
}
