//! `anvil test`: golden tests over a directory of `.anv` files.
//!
//! Test cases are `// run:` comment directives inside the module they
//! exercise:
//!
//! ```text
//! // run: sum(10) -> 45
//! // run: div(7, 0) -> error: division by zero
//! // run: bump()
//! ```
//!
//! Arguments and expected results are parsed against the assembled
//! function's signature. Every case executes through both tiers; the
//! tiers must agree bit-for-bit with each other and the result must
//! match the directive.

use std::fs;
use std::path::{Path, PathBuf};

use anvil_bc::{Module, Value};
use anvil_vm::compare_tiers;
use rayon::prelude::*;

use super::{load_module, parse_value};

#[derive(Clone, Debug, Eq, PartialEq)]
enum Expect {
    /// `-> literal`
    Value(String),
    /// `-> error: substring`
    Error(String),
    /// No arrow: the call must complete without a result.
    Void,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Directive {
    name: String,
    args: Vec<String>,
    expect: Expect,
}

#[derive(Clone, Debug)]
pub struct TestConfig {
    /// Only run files whose path contains this substring.
    pub filter: Option<String>,
    pub parallel: bool,
    pub verbose: bool,
}

impl Default for TestConfig {
    fn default() -> TestConfig {
        TestConfig {
            filter: None,
            parallel: true,
            verbose: false,
        }
    }
}

/// Outcome for one `.anv` file.
#[derive(Clone, Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub cases: usize,
    pub failures: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct TestSummary {
    pub files: usize,
    pub cases: usize,
    pub reports: Vec<FileReport>,
}

impl TestSummary {
    pub fn failed(&self) -> usize {
        self.reports.iter().map(|r| r.failures.len()).sum()
    }

    pub fn ok(&self) -> bool {
        self.failed() == 0
    }
}

/// Run every `.anv` file under `path` (a file or a directory).
pub fn run_tests(path: &str, config: &TestConfig) -> TestSummary {
    let mut files = Vec::new();
    collect_anv_files(Path::new(path), &mut files);
    files.sort();
    if let Some(filter) = &config.filter {
        files.retain(|p| p.to_string_lossy().contains(filter.as_str()));
    }

    let reports: Vec<FileReport> = if config.parallel && files.len() > 1 {
        rayon::ThreadPoolBuilder::new()
            .build_scoped(rayon::ThreadBuilder::run, |pool| {
                pool.install(|| files.par_iter().map(|p| run_golden_file(p)).collect())
            })
            .unwrap_or_else(|_| files.iter().map(|p| run_golden_file(p)).collect())
    } else {
        files.iter().map(|p| run_golden_file(p)).collect()
    };

    let cases = reports.iter().map(|r| r.cases).sum();
    TestSummary {
        files: files.len(),
        cases,
        reports,
    }
}

fn collect_anv_files(path: &Path, out: &mut Vec<PathBuf>) {
    if path.is_file() {
        if path.extension().is_some_and(|e| e == "anv") {
            out.push(path.to_path_buf());
        }
        return;
    }
    let Ok(entries) = fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        collect_anv_files(&entry.path(), out);
    }
}

fn run_golden_file(path: &Path) -> FileReport {
    let mut report = FileReport {
        path: path.to_path_buf(),
        cases: 0,
        failures: Vec::new(),
    };
    let display = path.display().to_string();
    let src = match fs::read_to_string(path) {
        Ok(src) => src,
        Err(e) => {
            report.failures.push(format!("{display}: {e}"));
            return report;
        }
    };
    let module = match load_module(&display) {
        Ok(module) => module,
        Err(msg) => {
            report.failures.push(msg);
            return report;
        }
    };

    for (line, parsed) in directives(&src) {
        report.cases += 1;
        let outcome = match parsed {
            Ok(d) => run_case(&module, &d),
            Err(msg) => Err(msg),
        };
        if let Err(msg) = outcome {
            report.failures.push(format!("{display}:{line}: {msg}"));
        }
    }
    if report.cases == 0 {
        report
            .failures
            .push(format!("{display}: no `// run:` directives"));
    }
    report
}

/// Every `// run:` line with its 1-based line number.
fn directives(src: &str) -> Vec<(usize, Result<Directive, String>)> {
    src.lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let rest = line.trim().strip_prefix("// run:")?;
            Some((i + 1, parse_directive(rest.trim())))
        })
        .collect()
}

fn parse_directive(text: &str) -> Result<Directive, String> {
    let (call, expect) = match text.split_once("->") {
        Some((call, expect)) => (call.trim(), Some(expect.trim())),
        None => (text.trim(), None),
    };

    let open = call
        .find('(')
        .ok_or_else(|| "expected `name(args...)`".to_string())?;
    if !call.ends_with(')') {
        return Err("expected `)` closing the argument list".into());
    }
    let name = call[..open].trim();
    if name.is_empty() {
        return Err("expected a function name".into());
    }
    let inner = call[open + 1..call.len() - 1].trim();
    let args = if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(|a| a.trim().to_string()).collect()
    };

    let expect = match expect {
        None => Expect::Void,
        Some(e) => match e.strip_prefix("error:") {
            Some(msg) => Expect::Error(msg.trim().to_string()),
            None => Expect::Value(e.to_string()),
        },
    };
    Ok(Directive {
        name: name.to_string(),
        args,
        expect,
    })
}

fn run_case(module: &Module, d: &Directive) -> Result<(), String> {
    let Some(mid) = module.method_id(&d.name) else {
        return Err(format!("no function named `{}`", d.name));
    };
    let method = module.method(mid);
    if d.args.len() != method.params.len() {
        return Err(format!(
            "`{}` takes {} argument(s), got {}",
            d.name,
            method.params.len(),
            d.args.len()
        ));
    }
    let args = d
        .args
        .iter()
        .zip(&method.params)
        .map(|(raw, &kind)| parse_value(raw, kind))
        .collect::<Result<Vec<_>, _>>()?;

    let tiers = compare_tiers(module, &d.name, &args);
    if !tiers.agree() {
        return Err(format!(
            "tiers disagree: interpreted {}, compiled {}",
            render_outcome(&tiers.interpreted),
            render_outcome(&tiers.compiled)
        ));
    }

    match (&d.expect, tiers.interpreted) {
        (Expect::Error(want), Err(e)) => {
            let got = e.to_string();
            if got.contains(want.as_str()) {
                Ok(())
            } else {
                Err(format!("expected error containing `{want}`, got `{got}`"))
            }
        }
        (Expect::Error(want), Ok(v)) => Err(format!(
            "expected error containing `{want}`, got {}",
            render_outcome(&Ok(v))
        )),
        (_, Err(e)) => Err(format!("unexpected error: {e}")),
        (Expect::Void, Ok(None)) => Ok(()),
        (Expect::Void, Ok(Some(v))) => Err(format!("expected no result, got {v}")),
        (Expect::Value(want), Ok(got)) => {
            let Some(ret) = method.ret else {
                return Err(format!("`{}` returns nothing", d.name));
            };
            let want = parse_value(want, ret)?;
            match got {
                Some(v) if value_matches(v, want) => Ok(()),
                Some(v) => Err(format!("expected {want}, got {v}")),
                None => Err(format!("expected {want}, got no result")),
            }
        }
    }
}

/// Any NaN matches a `nan` expectation; everything else is bit-exact.
fn value_matches(got: Value, want: Value) -> bool {
    match (got, want) {
        (Value::F64(a), Value::F64(b)) if a.is_nan() && b.is_nan() => true,
        _ => got == want,
    }
}

fn render_outcome(outcome: &Result<Option<Value>, anvil_vm::VmError>) -> String {
    match outcome {
        Ok(Some(v)) => v.to_string(),
        Ok(None) => "no result".into(),
        Err(e) => format!("error `{e}`"),
    }
}
