use anvil_bc::{ArrayKind, Global, Insn, Kind, Method, MethodId, Module, Value};
use pretty_assertions::assert_eq;

use crate::error::VmError;
use crate::{CompileMode, Vm, VmOptions};

fn method(params: Vec<Kind>, ret: Option<Kind>, max_locals: u16, code: Vec<Insn>) -> Method {
    Method {
        name: "f".into(),
        params,
        ret,
        max_locals,
        code,
    }
}

fn vm_for(m: Method) -> Vm {
    let mut module = Module::new("t");
    module.push_method(m);
    Vm::with_options(
        module,
        VmOptions {
            mode: CompileMode::InterpOnly,
            ..VmOptions::default()
        },
    )
}

/// s = 0; for (i = 0; i < n; i++) s += i; return s;
fn summing_loop() -> Method {
    method(
        vec![Kind::I32],
        Some(Kind::I32),
        3,
        vec![
            Insn::IConst(0),
            Insn::IStore(1),
            Insn::IConst(0),
            Insn::IStore(2),
            Insn::ILoad(2), // 4: head
            Insn::ILoad(0),
            Insn::IfICmpGe(16),
            Insn::ILoad(1),
            Insn::ILoad(2),
            Insn::IAdd,
            Insn::IStore(1),
            Insn::ILoad(2),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(2),
            Insn::Goto(4),
            Insn::ILoad(1), // 16
            Insn::IRet,
        ],
    )
}

#[test]
fn summing_loop_computes_and_profiles() {
    let mut vm = vm_for(summing_loop());
    assert_eq!(vm.call("f", &[Value::I32(10)]).unwrap(), Some(Value::I32(45)));

    let p = vm.profile(MethodId(0));
    assert_eq!(p.invocations, 1);
    assert_eq!(p.backedges, 10);
    let b = p.branch(6).expect("loop exit compare was profiled");
    assert_eq!(b.taken, 1);
    assert_eq!(b.not_taken, 10);
}

#[test]
fn recursion_runs_on_the_frame_stack() {
    // fib(n) = n < 2 ? n : fib(n-1) + fib(n-2)
    let fib = method(
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![
            Insn::ILoad(0),
            Insn::IConst(2),
            Insn::IfICmpGe(5),
            Insn::ILoad(0),
            Insn::IRet,
            Insn::ILoad(0), // 5
            Insn::IConst(1),
            Insn::ISub,
            Insn::Call(0),
            Insn::ILoad(0),
            Insn::IConst(2),
            Insn::ISub,
            Insn::Call(0),
            Insn::IAdd,
            Insn::IRet,
        ],
    );
    let mut vm = vm_for(fib);
    assert_eq!(vm.call("f", &[Value::I32(10)]).unwrap(), Some(Value::I32(55)));
    assert!(vm.profile(MethodId(0)).invocations > 100, "every activation counts");
}

#[test]
fn arrays_fill_and_sum() {
    // a = new i32[n]; for i { a[i] = i*2 }; s = 0; for i { s += a[i] }; return s
    let f = method(
        vec![Kind::I32],
        Some(Kind::I32),
        4,
        vec![
            Insn::ILoad(0),
            Insn::NewArr(ArrayKind::I32),
            Insn::AStore(1),
            Insn::IConst(0),
            Insn::IStore(2),
            Insn::ILoad(2), // 5: first head
            Insn::ILoad(0),
            Insn::IfICmpGe(19),
            Insn::ALoad(1),
            Insn::ILoad(2),
            Insn::ILoad(2),
            Insn::IConst(2),
            Insn::IMul,
            Insn::IAStore,
            Insn::ILoad(2),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(2),
            Insn::Goto(5),
            Insn::IConst(0), // 19
            Insn::IStore(3),
            Insn::IConst(0),
            Insn::IStore(2),
            Insn::ILoad(2), // 23: second head
            Insn::ILoad(0),
            Insn::IfICmpGe(37),
            Insn::ILoad(3),
            Insn::ALoad(1),
            Insn::ILoad(2),
            Insn::IALoad,
            Insn::IAdd,
            Insn::IStore(3),
            Insn::ILoad(2),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::IStore(2),
            Insn::Goto(23),
            Insn::ILoad(3), // 37
            Insn::IRet,
        ],
    );
    let mut vm = vm_for(f);
    assert_eq!(vm.call("f", &[Value::I32(5)]).unwrap(), Some(Value::I32(20)));
}

#[test]
fn globals_persist_across_calls() {
    let mut module = Module::new("t");
    module.push_global(Global {
        name: "counter".into(),
        kind: Kind::I32,
        init: Value::I32(0),
    });
    module.push_method(method(
        vec![],
        None,
        0,
        vec![
            Insn::GetGlobal(0),
            Insn::IConst(1),
            Insn::IAdd,
            Insn::SetGlobal(0),
            Insn::Ret,
        ],
    ));
    let mut vm = Vm::with_options(
        module,
        VmOptions {
            mode: CompileMode::InterpOnly,
            ..VmOptions::default()
        },
    );
    vm.call("f", &[]).unwrap();
    vm.call("f", &[]).unwrap();
    assert_eq!(vm.global("counter"), Some(Value::I32(2)));
}

#[test]
fn integer_division_edge_cases() {
    let div = method(
        vec![Kind::I32, Kind::I32],
        Some(Kind::I32),
        2,
        vec![Insn::ILoad(0), Insn::ILoad(1), Insn::IDiv, Insn::IRet],
    );
    let mut vm = vm_for(div);
    assert_eq!(
        vm.call("f", &[Value::I32(7), Value::I32(0)]),
        Err(VmError::DivByZero)
    );
    assert_eq!(
        vm.call("f", &[Value::I32(i32::MIN), Value::I32(-1)]).unwrap(),
        Some(Value::I32(i32::MIN))
    );
}

#[test]
fn long_shift_counts_are_ints_and_masked() {
    let lsh = method(
        vec![Kind::I64, Kind::I32],
        Some(Kind::I64),
        2,
        vec![Insn::LLoad(0), Insn::ILoad(1), Insn::LShl, Insn::LRet],
    );
    let mut vm = vm_for(lsh);
    assert_eq!(
        vm.call("f", &[Value::I64(1), Value::I32(65)]).unwrap(),
        Some(Value::I64(2))
    );
}

#[test]
fn double_compares_disagree_only_on_nan() {
    let cmpg = method(
        vec![Kind::F64, Kind::F64],
        Some(Kind::I32),
        2,
        vec![Insn::DLoad(0), Insn::DLoad(1), Insn::DCmpG, Insn::IRet],
    );
    let mut vm = vm_for(cmpg);
    assert_eq!(
        vm.call("f", &[Value::F64(f64::NAN), Value::F64(0.0)]).unwrap(),
        Some(Value::I32(1))
    );
    assert_eq!(
        vm.call("f", &[Value::F64(1.0), Value::F64(2.0)]).unwrap(),
        Some(Value::I32(-1))
    );

    let cmpl = method(
        vec![Kind::F64, Kind::F64],
        Some(Kind::I32),
        2,
        vec![Insn::DLoad(0), Insn::DLoad(1), Insn::DCmpL, Insn::IRet],
    );
    let mut vm = vm_for(cmpl);
    assert_eq!(
        vm.call("f", &[Value::F64(f64::NAN), Value::F64(0.0)]).unwrap(),
        Some(Value::I32(-1))
    );
}

#[test]
fn null_dereference_is_an_error() {
    let f = method(
        vec![],
        Some(Kind::I32),
        0,
        vec![Insn::NullConst, Insn::ArrayLen, Insn::IRet],
    );
    let mut vm = vm_for(f);
    assert_eq!(vm.call("f", &[]), Err(VmError::NullDeref));
}

#[test]
fn out_of_bounds_carries_the_shape() {
    let f = method(
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![
            Insn::IConst(3),
            Insn::NewArr(ArrayKind::I32),
            Insn::ILoad(0),
            Insn::IALoad,
            Insn::IRet,
        ],
    );
    let mut vm = vm_for(f);
    assert_eq!(
        vm.call("f", &[Value::I32(5)]),
        Err(VmError::IndexOutOfBounds { index: 5, length: 3 })
    );
}
