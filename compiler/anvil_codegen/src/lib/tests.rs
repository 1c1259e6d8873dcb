use anvil_bc::{Insn, Kind, Method, MethodId, Module};
use anvil_parse::NoProfile;
use pretty_assertions::assert_eq;

use super::{compile, CompileError, CompileOptions, LInsn};

fn module(params: Vec<Kind>, ret: Option<Kind>, max_locals: u16, code: Vec<Insn>) -> (Module, MethodId) {
    let mut module = Module::new("t");
    let mid = module.push_method(Method {
        name: "f".into(),
        params,
        ret,
        max_locals,
        code,
    });
    (module, mid)
}

/// s = 0; for (i = 0; i < n; i++) s += i; return s;
fn summing_loop() -> (Module, MethodId) {
    module(
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

fn check_artifact(a: &super::Artifact) {
    assert_eq!(a.assignment.len(), a.classes.len());
    let nb = u32::try_from(a.blocks.len()).unwrap();
    for b in &a.blocks {
        assert!(b.insns.last().is_some_and(LInsn::is_terminator));
        for insn in &b.insns {
            match insn {
                LInsn::Jump { target } => assert!(*target < nb),
                LInsn::Branch { on_true, on_false, .. } => {
                    assert!(*on_true < nb && *on_false < nb);
                }
                LInsn::GuardTrap { deopt_id, .. }
                | LInsn::Safepoint { deopt_id }
                | LInsn::Deopt { deopt_id }
                | LInsn::Call { deopt_id, .. } => {
                    assert!((*deopt_id as usize) < a.deopts.len());
                }
                _ => {}
            }
        }
    }
    for rec in &a.deopts {
        assert_eq!(rec.values.len(), rec.desc.total_slots());
        for v in &rec.values {
            assert!(v.index() < a.classes.len());
        }
    }
}

#[test]
fn summing_loop_compiles_to_a_well_formed_artifact() {
    let (m, mid) = summing_loop();
    let a = compile(&m, mid, &NoProfile, &CompileOptions::default()).unwrap();

    assert_eq!(a.mid, mid);
    assert_eq!(a.params.len(), 1);
    check_artifact(&a);
    assert!(a.blocks.iter().any(|b| b.loop_depth >= 1), "main loop survives");
    assert!(a.blocks.iter().flat_map(|b| &b.insns).any(|i| matches!(i, LInsn::Ret { .. })));
    assert!(a.render().contains("artifact"));
}

#[test]
fn pipeline_runs_with_optimizations_off() {
    let (m, mid) = summing_loop();
    let opts = CompileOptions { loop_opts: false, ccp: false, ..CompileOptions::default() };
    let a = compile(&m, mid, &NoProfile, &opts).unwrap();
    check_artifact(&a);
}

#[test]
fn empty_body_reports_a_build_error() {
    let (m, mid) = module(vec![], None, 0, vec![]);
    let err = compile(&m, mid, &NoProfile, &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, CompileError::Build(_)));
    assert!(err.to_string().contains("malformed"));
}

#[test]
fn option_fingerprints_distinguish_configurations() {
    let a = CompileOptions::default();
    let b = CompileOptions { loop_opts: false, ..CompileOptions::default() };
    assert_ne!(a.fingerprint(), b.fingerprint());
    assert_eq!(a.fingerprint(), CompileOptions::default().fingerprint());
}

#[test]
fn calls_lower_with_arguments_and_a_result() {
    // g(x) = x + 1, f(n) = g(n) * 2 -- too big to matter here, but the
    // call must carry its argument and its result register.
    let mut m = Module::new("t");
    let callee = m.push_method(Method {
        name: "g".into(),
        params: vec![Kind::I32],
        ret: Some(Kind::I32),
        max_locals: 1,
        code: vec![Insn::ILoad(0), Insn::IConst(1), Insn::IAdd, Insn::IRet],
    });
    let mid = m.push_method(Method {
        name: "f".into(),
        params: vec![Kind::I32],
        ret: Some(Kind::I32),
        max_locals: 1,
        code: vec![
            Insn::ILoad(0),
            Insn::Call(callee.raw()),
            Insn::IConst(2),
            Insn::IMul,
            Insn::IRet,
        ],
    });
    // Keep the callee out of line so the call survives.
    let opts = CompileOptions {
        build: anvil_parse::BuildOpts { inline_insn_limit: 0, ..anvil_parse::BuildOpts::default() },
        ..CompileOptions::default()
    };
    let a = compile(&m, mid, &NoProfile, &opts).unwrap();
    check_artifact(&a);
    let call = a
        .blocks
        .iter()
        .flat_map(|b| &b.insns)
        .find_map(|i| match i {
            LInsn::Call { mid, dst, args, .. } => Some((*mid, *dst, args.len())),
            _ => None,
        })
        .expect("out-of-line call survives");
    assert_eq!(call.0, callee);
    assert!(call.1.is_some());
    assert_eq!(call.2, 1);
}
