use anvil_bc::{ArrayKind, Kind, Value};
use anvil_vm::{CompileMode, VmOptions};
use pretty_assertions::assert_eq;

use super::{load_module, parse_value, parse_vm_flag};

#[test]
fn literals_parse_against_their_kind() {
    assert_eq!(parse_value("42", Kind::I32), Ok(Value::I32(42)));
    assert_eq!(parse_value("-7", Kind::I32), Ok(Value::I32(-7)));
    assert_eq!(parse_value("42", Kind::I64), Ok(Value::I64(42)));
    assert_eq!(parse_value("42L", Kind::I64), Ok(Value::I64(42)));
    assert_eq!(parse_value("2.5", Kind::F64), Ok(Value::F64(2.5)));
    assert_eq!(parse_value("-inf", Kind::F64), Ok(Value::F64(f64::NEG_INFINITY)));
    assert_eq!(parse_value("null", Kind::Ref(ArrayKind::I32)), Ok(Value::Null));

    let nan = parse_value("nan", Kind::F64).unwrap();
    assert!(matches!(nan, Value::F64(v) if v.is_nan()));
}

#[test]
fn bad_literals_are_rejected() {
    assert!(parse_value("2.5", Kind::I32).is_err());
    assert!(parse_value("forty", Kind::I64).is_err());
    assert!(parse_value("0", Kind::Ref(ArrayKind::F64)).is_err());
}

#[test]
fn vm_flags_apply_to_the_options() {
    let mut opts = VmOptions::default();
    assert_eq!(parse_vm_flag("--mode=forced", &mut opts), Ok(true));
    assert_eq!(opts.mode, CompileMode::Forced);

    assert_eq!(parse_vm_flag("--threshold=500", &mut opts), Ok(true));
    assert_eq!(opts.compile_threshold, 500);

    assert_eq!(parse_vm_flag("--no-ccp", &mut opts), Ok(true));
    assert!(!opts.compile.ccp);

    assert_eq!(parse_vm_flag("--cache-dir=/tmp/anvil", &mut opts), Ok(true));
    assert!(opts.cache_dir.is_some());

    // Not a VM flag: the caller treats it as positional.
    assert_eq!(parse_vm_flag("input.anv", &mut opts), Ok(false));

    assert!(parse_vm_flag("--mode=turbo", &mut opts).is_err());
    assert!(parse_vm_flag("--threshold=soon", &mut opts).is_err());
}

#[test]
fn load_module_reports_position_and_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.anv");
    std::fs::write(&path, "module bad\n\nfn f() -> int {\n  locals 0\n  ???\n}\n").unwrap();

    let err = load_module(path.to_str().unwrap()).unwrap_err();
    assert!(err.contains("bad.anv"), "path is in the message: {err}");
    assert!(err.contains("5:"), "line is in the message: {err}");
}
