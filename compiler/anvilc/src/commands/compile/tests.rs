use std::fs;
use std::path::PathBuf;

use pretty_assertions::assert_eq;

use super::{compile_file, CompileConfig, IrPhase};

const SUMMING: &str = "\
module demo

fn sum(n: int) -> int {
  locals 3
  iconst 0
  istore 1
  iconst 0
  istore 2
head:
  iload 2
  iload 0
  if_icmpge done
  iload 1
  iload 2
  iadd
  istore 1
  iload 2
  iconst 1
  iadd
  istore 2
  goto head
done:
  iload 1
  iret
}
";

fn write_summing(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("sum.anv");
    fs::write(&path, SUMMING).unwrap();
    path
}

#[test]
fn default_config_prints_one_stats_line_per_method() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_summing(&dir);

    let out = compile_file(path.to_str().unwrap(), &[], &CompileConfig::default()).unwrap();
    assert_eq!(out.lines().count(), 1);
    assert!(out.starts_with("compiled `sum`:"), "{out}");
}

#[test]
fn every_requested_phase_gets_a_section() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_summing(&dir);
    let config = CompileConfig {
        phases: IrPhase::parse("all").unwrap(),
        lir: true,
        ..CompileConfig::default()
    };

    let out = compile_file(path.to_str().unwrap(), &[], &config).unwrap();
    for section in ["== parse `sum`", "== gvn `sum`", "== loop `sum`", "== ccp `sum`", "== sched `sum`", "== lir `sum`"] {
        assert!(out.contains(section), "missing {section}:\n{out}");
    }
}

#[test]
fn unknown_methods_and_phases_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_summing(&dir);

    let err = compile_file(
        path.to_str().unwrap(),
        &["nope".to_string()],
        &CompileConfig::default(),
    )
    .unwrap_err();
    assert!(err.contains("no function named `nope`"), "{err}");

    assert_eq!(IrPhase::parse("backend"), None);
}
