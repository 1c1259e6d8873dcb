//! End-to-end command flows over one realistic module.

use std::fs;
use std::path::PathBuf;

use anvil_bc::Value;
use anvil_vm::{CompileMode, VmOptions};
use anvilc::commands::{check_file, dis_file, run_file, run_tests, TestConfig};
use pretty_assertions::assert_eq;

const NORMS: &str = "\
module norms

global calls: int = 0

// Sum of squares of 0..n as a double.
fn sumsq(n: int) -> double {
  locals 3
  getglobal calls
  iconst 1
  iadd
  setglobal calls
  dconst 0.0
  dstore 1
  iconst 0
  istore 2
head:
  iload 2
  iload 0
  if_icmpge done
  dload 1
  iload 2
  i2d
  iload 2
  i2d
  dmul
  dadd
  dstore 1
  iload 2
  iconst 1
  iadd
  istore 2
  goto head
done:
  dload 1
  dret
}

fn mean(n: int) -> double {
  locals 1
  iload 0
  call sumsq
  iload 0
  i2d
  ddiv
  dret
}

// run: sumsq(4) -> 14.0
// run: mean(4) -> 3.5
// run: mean(0) -> nan
";

fn write_norms(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("norms.anv");
    fs::write(&path, NORMS).unwrap();
    path
}

#[test]
fn check_summarizes_the_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_norms(&dir);

    let summary = check_file(path.to_str().unwrap()).unwrap();
    assert_eq!(summary, "module `norms`: 2 function(s), 1 global(s)");
}

#[test]
fn disassembly_reassembles_and_runs_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_norms(&dir);

    let text = dis_file(path.to_str().unwrap()).unwrap();
    let round = dir.path().join("round.anv");
    fs::write(&round, text).unwrap();

    let opts = || VmOptions {
        mode: CompileMode::InterpOnly,
        ..VmOptions::default()
    };
    let args = ["6".to_string()];
    let a = run_file(path.to_str().unwrap(), "mean", &args, opts()).unwrap();
    let b = run_file(round.to_str().unwrap(), "mean", &args, opts()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn forced_mode_runs_compiled_code_and_fills_the_disk_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_norms(&dir);
    let cache = dir.path().join("cache");

    let opts = || VmOptions {
        mode: CompileMode::Forced,
        cache_dir: Some(cache.clone()),
        ..VmOptions::default()
    };
    let args = ["4".to_string()];
    let result = run_file(path.to_str().unwrap(), "mean", &args, opts()).unwrap();
    assert_eq!(result, Some(Value::F64(3.5)));
    let entries = fs::read_dir(&cache).unwrap().count();
    assert!(entries > 0, "artifacts were persisted");

    // Second run hits the cache instead of growing it.
    let result = run_file(path.to_str().unwrap(), "mean", &args, opts()).unwrap();
    assert_eq!(result, Some(Value::F64(3.5)));
    assert_eq!(fs::read_dir(&cache).unwrap().count(), entries);
}

#[test]
fn golden_directives_in_the_module_all_pass() {
    let dir = tempfile::tempdir().unwrap();
    write_norms(&dir);

    let summary = run_tests(dir.path().to_str().unwrap(), &TestConfig::default());
    assert_eq!(summary.files, 1);
    assert_eq!(summary.cases, 3);
    assert!(summary.ok(), "{:?}", summary.reports);
}
