//! Disassembler: renders a module as `.anv` source that reassembles to an
//! equal module.

use std::fmt::Write as _;

use crate::insn::Insn;
use crate::module::Module;
use crate::value::Value;

/// Render `module` as assemblable text.
pub fn disassemble(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {}", module.name);

    for global in &module.globals {
        let init = match global.init {
            Value::I32(v) => format!("{v}"),
            Value::I64(v) => format!("{v}"),
            Value::F64(v) => fmt_f64(v),
            _ => "null".into(),
        };
        let _ = writeln!(
            out,
            "\nglobal {}: {} = {}",
            global.name, global.kind, init
        );
    }

    for method in &module.methods {
        let params = method
            .params
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ");
        let ret = match method.ret {
            Some(k) => format!(" -> {k}"),
            None => String::new(),
        };
        let _ = writeln!(out, "\nfn {}({params}){ret} {{", method.name);
        let _ = writeln!(out, "  locals {}", method.max_locals);

        // Collect branch targets so we can emit labels.
        let mut targets: Vec<u32> = method
            .code
            .iter()
            .filter_map(Insn::branch_target)
            .collect();
        targets.sort_unstable();
        targets.dedup();
        let label_of = |bci: u32| -> Option<usize> { targets.binary_search(&bci).ok() };

        for (bci, insn) in method.code.iter().enumerate() {
            if let Some(l) = label_of(bci as u32) {
                let _ = writeln!(out, "L{l}:");
            }
            let _ = writeln!(out, "  {}", render(insn, &label_of, module));
        }
        // A label may point one past the last instruction only in malformed
        // code; verified code always branches to a real bci.
        let _ = writeln!(out, "}}");
    }
    out
}

fn fmt_f64(v: f64) -> String {
    if v.is_nan() {
        "nan".into()
    } else if v == f64::INFINITY {
        "inf".into()
    } else if v == f64::NEG_INFINITY {
        "-inf".into()
    } else if v == v.trunc() && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

#[allow(clippy::too_many_lines)]
fn render(insn: &Insn, label_of: &dyn Fn(u32) -> Option<usize>, module: &Module) -> String {
    let lbl = |t: u32| label_of(t).map_or_else(|| format!("{t}"), |l| format!("L{l}"));
    match *insn {
        Insn::IConst(v) => format!("iconst {v}"),
        Insn::LConst(v) => format!("lconst {v}"),
        Insn::DConst(bits) => {
            let v = f64::from_bits(bits);
            if v.is_nan() && bits != f64::NAN.to_bits() {
                // Non-canonical NaN: keep the payload bit-exact.
                format!("dconst 0x{bits:016x}")
            } else {
                format!("dconst {}", fmt_f64(v))
            }
        }
        Insn::NullConst => "aconst_null".into(),

        Insn::ILoad(i) => format!("iload {i}"),
        Insn::LLoad(i) => format!("lload {i}"),
        Insn::DLoad(i) => format!("dload {i}"),
        Insn::ALoad(i) => format!("aload {i}"),
        Insn::IStore(i) => format!("istore {i}"),
        Insn::LStore(i) => format!("lstore {i}"),
        Insn::DStore(i) => format!("dstore {i}"),
        Insn::AStore(i) => format!("astore {i}"),

        Insn::Pop => "pop".into(),
        Insn::Dup => "dup".into(),

        Insn::IAdd => "iadd".into(),
        Insn::ISub => "isub".into(),
        Insn::IMul => "imul".into(),
        Insn::IDiv => "idiv".into(),
        Insn::IRem => "irem".into(),
        Insn::INeg => "ineg".into(),
        Insn::IAnd => "iand".into(),
        Insn::IOr => "ior".into(),
        Insn::IXor => "ixor".into(),
        Insn::IShl => "ishl".into(),
        Insn::IShr => "ishr".into(),
        Insn::IUShr => "iushr".into(),

        Insn::LAdd => "ladd".into(),
        Insn::LSub => "lsub".into(),
        Insn::LMul => "lmul".into(),
        Insn::LDiv => "ldiv".into(),
        Insn::LRem => "lrem".into(),
        Insn::LNeg => "lneg".into(),
        Insn::LAnd => "land".into(),
        Insn::LOr => "lor".into(),
        Insn::LXor => "lxor".into(),
        Insn::LShl => "lshl".into(),
        Insn::LShr => "lshr".into(),
        Insn::LUShr => "lushr".into(),
        Insn::LCmp => "lcmp".into(),

        Insn::DAdd => "dadd".into(),
        Insn::DSub => "dsub".into(),
        Insn::DMul => "dmul".into(),
        Insn::DDiv => "ddiv".into(),
        Insn::DRem => "drem".into(),
        Insn::DNeg => "dneg".into(),
        Insn::DCmpL => "dcmpl".into(),
        Insn::DCmpG => "dcmpg".into(),

        Insn::I2L => "i2l".into(),
        Insn::L2I => "l2i".into(),
        Insn::I2D => "i2d".into(),
        Insn::D2I => "d2i".into(),
        Insn::L2D => "l2d".into(),
        Insn::D2L => "d2l".into(),

        Insn::Goto(t) => format!("goto {}", lbl(t)),
        Insn::IfEq(t) => format!("ifeq {}", lbl(t)),
        Insn::IfNe(t) => format!("ifne {}", lbl(t)),
        Insn::IfLt(t) => format!("iflt {}", lbl(t)),
        Insn::IfGe(t) => format!("ifge {}", lbl(t)),
        Insn::IfGt(t) => format!("ifgt {}", lbl(t)),
        Insn::IfLe(t) => format!("ifle {}", lbl(t)),
        Insn::IfICmpEq(t) => format!("if_icmpeq {}", lbl(t)),
        Insn::IfICmpNe(t) => format!("if_icmpne {}", lbl(t)),
        Insn::IfICmpLt(t) => format!("if_icmplt {}", lbl(t)),
        Insn::IfICmpGe(t) => format!("if_icmpge {}", lbl(t)),
        Insn::IfICmpGt(t) => format!("if_icmpgt {}", lbl(t)),
        Insn::IfICmpLe(t) => format!("if_icmple {}", lbl(t)),
        Insn::IfNull(t) => format!("ifnull {}", lbl(t)),
        Insn::IfNonNull(t) => format!("ifnonnull {}", lbl(t)),

        Insn::NewArr(ak) => format!("newarr {}", ak.elem_name()),
        Insn::ArrayLen => "arraylen".into(),
        Insn::IALoad => "iaload".into(),
        Insn::LALoad => "laload".into(),
        Insn::DALoad => "daload".into(),
        Insn::IAStore => "iastore".into(),
        Insn::LAStore => "lastore".into(),
        Insn::DAStore => "dastore".into(),

        Insn::GetGlobal(g) => format!("getglobal {}", module.globals[g as usize].name),
        Insn::SetGlobal(g) => format!("setglobal {}", module.globals[g as usize].name),
        Insn::Call(m) => format!("call {}", module.methods[m as usize].name),

        Insn::Ret => "ret".into(),
        Insn::IRet => "iret".into(),
        Insn::LRet => "lret".into(),
        Insn::DRet => "dret".into(),
        Insn::ARet => "aret".into(),
    }
}
