use std::thread;
use std::time::Duration;

use anvil_bc::{Insn, Kind, Method, MethodId, Module, Value};
use anvil_deopt::Reason;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::{compare_tiers, CompileMode, Vm, VmOptions};

fn method(name: &str, params: Vec<Kind>, ret: Option<Kind>, max_locals: u16, code: Vec<Insn>) -> Method {
    Method {
        name: name.into(),
        params,
        ret,
        max_locals,
        code,
    }
}

fn summing_module() -> Module {
    let mut module = Module::new("t");
    module.push_method(method(
        "sum",
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
    ));
    module
}

fn wait_for_compiled(vm: &Vm, mid: MethodId) -> bool {
    for _ in 0..500 {
        if vm.has_compiled(mid) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn mixed_mode_promotes_hot_methods_without_changing_answers() {
    let mut vm = Vm::with_options(
        summing_module(),
        VmOptions {
            compile_threshold: 20,
            ..VmOptions::default()
        },
    );
    let mid = MethodId(0);
    for _ in 0..100 {
        assert_eq!(vm.call("sum", &[Value::I32(10)]).unwrap(), Some(Value::I32(45)));
    }
    assert!(wait_for_compiled(&vm, mid), "hot method was never compiled");
    for _ in 0..10 {
        assert_eq!(vm.call("sum", &[Value::I32(10)]).unwrap(), Some(Value::I32(45)));
    }
}

#[test]
fn pruned_branch_deopts_and_recovers() {
    // choose(flag) = flag != 0 ? 111 : 222
    let mut module = Module::new("t");
    let mid = module.push_method(method(
        "choose",
        vec![Kind::I32],
        Some(Kind::I32),
        1,
        vec![
            Insn::ILoad(0),
            Insn::IfNe(4),
            Insn::IConst(222),
            Insn::IRet,
            Insn::IConst(111), // 4
            Insn::IRet,
        ],
    ));
    let mut vm = Vm::with_options(
        module,
        VmOptions {
            // Qualify only after the branch profile is decisive enough
            // for the builder to prune the never-taken arm.
            compile_threshold: 150,
            ..VmOptions::default()
        },
    );

    for _ in 0..300 {
        assert_eq!(vm.call("choose", &[Value::I32(0)]).unwrap(), Some(Value::I32(222)));
    }
    assert!(wait_for_compiled(&vm, mid), "hot method was never compiled");

    // First time down the pruned arm: speculative code traps, the
    // interpreter finishes the call, and the answer is still right.
    assert_eq!(vm.call("choose", &[Value::I32(1)]).unwrap(), Some(Value::I32(111)));
    assert!(vm.trap_profile(mid).trapped_for(Reason::Unreached));
    assert!(vm.trap_profile(mid).total_traps() >= 1);

    // Both arms keep working afterwards.
    assert_eq!(vm.call("choose", &[Value::I32(0)]).unwrap(), Some(Value::I32(222)));
    assert_eq!(vm.call("choose", &[Value::I32(1)]).unwrap(), Some(Value::I32(111)));
}

#[test]
fn redefinition_takes_effect_in_compiled_code() {
    let mut module = Module::new("t");
    let mid = module.push_method(method(
        "k",
        vec![],
        Some(Kind::I32),
        0,
        vec![Insn::IConst(1), Insn::IRet],
    ));
    let mut vm = Vm::with_options(
        module,
        VmOptions {
            mode: CompileMode::Forced,
            ..VmOptions::default()
        },
    );
    assert_eq!(vm.call("k", &[]).unwrap(), Some(Value::I32(1)));
    assert!(vm.has_compiled(mid));

    vm.redefine_method(
        mid,
        method("k", vec![], Some(Kind::I32), 0, vec![Insn::IConst(2), Insn::IRet]),
    );
    assert_eq!(vm.call("k", &[]).unwrap(), Some(Value::I32(2)));
}

#[test]
fn disk_cache_survives_across_vm_instances() {
    let dir = tempfile::tempdir().unwrap();
    let opts = || VmOptions {
        mode: CompileMode::Forced,
        cache_dir: Some(dir.path().to_path_buf()),
        ..VmOptions::default()
    };

    let mut first = Vm::with_options(summing_module(), opts());
    assert_eq!(first.call("sum", &[Value::I32(10)]).unwrap(), Some(Value::I32(45)));
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert!(entries > 0, "artifact was written to the cache");

    let mut second = Vm::with_options(summing_module(), opts());
    assert_eq!(second.call("sum", &[Value::I32(10)]).unwrap(), Some(Value::I32(45)));
    assert_eq!(
        std::fs::read_dir(dir.path()).unwrap().count(),
        entries,
        "second run reused the cached artifact"
    );
}

/// (a*a + b) / (b | 1) + (a >> (b & 7)), all int ops; `b | 1` keeps the
/// divisor nonzero.
fn poly_module() -> Module {
    let mut module = Module::new("t");
    module.push_method(method(
        "poly",
        vec![Kind::I32, Kind::I32],
        Some(Kind::I32),
        2,
        vec![
            Insn::ILoad(0),
            Insn::ILoad(0),
            Insn::IMul,
            Insn::ILoad(1),
            Insn::IAdd,
            Insn::ILoad(1),
            Insn::IConst(1),
            Insn::IOr,
            Insn::IDiv,
            Insn::ILoad(0),
            Insn::ILoad(1),
            Insn::IConst(7),
            Insn::IAnd,
            Insn::IShr,
            Insn::IAdd,
            Insn::IRet,
        ],
    ));
    module
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tiers_agree_on_integer_arithmetic(a in any::<i32>(), b in any::<i32>()) {
        let module = poly_module();
        let report = compare_tiers(&module, "poly", &[Value::I32(a), Value::I32(b)]);
        prop_assert!(report.agree(), "interpreted {:?} vs compiled {:?}", report.interpreted, report.compiled);
    }

    #[test]
    fn tiers_agree_on_double_division(a in any::<f64>(), b in any::<f64>()) {
        let mut module = Module::new("t");
        module.push_method(method(
            "f",
            vec![Kind::F64, Kind::F64],
            Some(Kind::F64),
            2,
            vec![Insn::DLoad(0), Insn::DLoad(1), Insn::DDiv, Insn::DRet],
        ));
        let report = compare_tiers(&module, "f", &[Value::F64(a), Value::F64(b)]);
        prop_assert!(report.agree(), "interpreted {:?} vs compiled {:?}", report.interpreted, report.compiled);
    }
}
