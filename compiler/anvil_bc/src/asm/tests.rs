use pretty_assertions::assert_eq;

use crate::{assemble, disassemble, ArrayKind, Insn, Kind, Value};

#[test]
fn assembles_minimal_function() {
    let module = assemble(
        "module t
         fn answer() -> int {
           iconst 42
           iret
         }",
    )
    .unwrap();
    assert_eq!(module.name, "t");
    assert_eq!(module.methods.len(), 1);
    let m = &module.methods[0];
    assert_eq!(m.name, "answer");
    assert_eq!(m.ret, Some(Kind::I32));
    assert_eq!(m.code, vec![Insn::IConst(42), Insn::IRet]);
}

#[test]
fn labels_backpatch_forward_and_backward() {
    let module = assemble(
        "module t
         fn f(n: int) -> int {
           locals 2
           iconst 0
           istore 1
         head:
           iload 0
           ifle done
           iload 0
           iload 1
           iadd
           istore 1
           iload 0
           iconst 1
           isub
           istore 0
           goto head
         done:
           iload 1
           iret
         }",
    )
    .unwrap();
    let code = &module.methods[0].code;
    // `ifle done` targets the iload after the loop.
    assert_eq!(code[3], Insn::IfLe(13));
    // `goto head` jumps back to the iload at bci 2.
    assert_eq!(code[12], Insn::Goto(2));
}

#[test]
fn calls_and_globals_resolve_forward() {
    let module = assemble(
        "module t
         fn main() -> int {
           getglobal bias
           call helper
           iadd
           iret
         }
         fn helper() -> int {
           iconst 1
           iret
         }
         global bias: int = 7
        ",
    )
    .unwrap();
    let code = &module.methods[0].code;
    assert_eq!(code[0], Insn::GetGlobal(0));
    assert_eq!(code[1], Insn::Call(1));
    assert_eq!(module.globals[0].init, Value::I32(7));
}

#[test]
fn array_types_and_literals() {
    let module = assemble(
        "module t
         fn f(a: double[]) -> double {
           locals 2
           dconst 1.5
           dconst -inf
           dadd
           dret
         }",
    )
    .unwrap();
    let m = &module.methods[0];
    assert_eq!(m.params, vec![Kind::Ref(ArrayKind::F64)]);
    assert_eq!(m.code[0], Insn::DConst(1.5f64.to_bits()));
    assert_eq!(m.code[1], Insn::DConst(f64::NEG_INFINITY.to_bits()));
}

#[test]
fn hex_dconst_keeps_nan_payload() {
    let module = assemble(
        "module t
         fn f() -> double {
           dconst 0x7ff8000000000001
           dret
         }",
    )
    .unwrap();
    assert_eq!(module.methods[0].code[0], Insn::DConst(0x7ff8_0000_0000_0001));
}

#[test]
fn unknown_label_is_an_error() {
    let err = assemble(
        "module t
         fn f() {
           goto nowhere
           ret
         }",
    )
    .unwrap_err();
    assert!(err.msg.contains("unknown label"), "{}", err.msg);
}

#[test]
fn unknown_instruction_reports_position() {
    let err = assemble(
        "module t
         fn f() {
           frobnicate
         }",
    )
    .unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.msg.contains("frobnicate"));
}

#[test]
fn disassemble_round_trips() {
    let src = "module round
         global total: long = 100

         fn main(n: int, xs: int[]) -> int {
           locals 3
           iconst 0
           istore 2
         head:
           iload 2
           iload 0
           if_icmpge out
           aload 1
           iload 2
           iaload
           pop
           iload 2
           iconst 1
           iadd
           istore 2
           goto head
         out:
           iload 2
           iret
         }";
    let first = assemble(src).unwrap();
    let text = disassemble(&first);
    let second = assemble(&text).unwrap();
    assert_eq!(first.methods, second.methods);
    assert_eq!(first.globals, second.globals);
    assert_eq!(first.name, second.name);
}

#[test]
fn nan_payload_round_trips_through_disassembly() {
    let src = "module t
         fn f() -> double {
           dconst 0x7ff800000000beef
           dret
         }";
    let first = assemble(src).unwrap();
    let second = assemble(&disassemble(&first)).unwrap();
    assert_eq!(first.methods, second.methods);
}
