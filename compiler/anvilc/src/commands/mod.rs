//! CLI commands.
//!
//! Each command is a library function returning `Result` so the binary
//! can own printing and exit codes, and so the commands stay testable.

mod check;
mod compile;
mod dis;
mod run;
mod test;

pub use check::check_file;
pub use compile::{compile_file, CompileConfig, IrPhase};
pub use dis::dis_file;
pub use run::run_file;
pub use test::{run_tests, FileReport, TestConfig, TestSummary};

use std::fs;
use std::path::PathBuf;

use anvil_bc::{assemble, verify, Kind, Module, Value};
use anvil_vm::{CompileMode, VmOptions};

/// Read, assemble and verify an `.anv` file.
pub fn load_module(path: &str) -> Result<Module, String> {
    let src = fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
    let module = assemble(&src).map_err(|e| format!("{path}:{e}"))?;
    verify(&module).map_err(|e| format!("{path}: {e}"))?;
    Ok(module)
}

/// Parse a source-form literal into a value of the given kind.
///
/// Integers are decimal, doubles accept `inf`/`nan`, and the only
/// reference literal is `null`.
pub fn parse_value(text: &str, kind: Kind) -> Result<Value, String> {
    let text = text.trim();
    match kind {
        Kind::I32 => text
            .parse::<i32>()
            .map(Value::I32)
            .map_err(|_| format!("`{text}` is not an int")),
        Kind::I64 => text
            .trim_end_matches('L')
            .parse::<i64>()
            .map(Value::I64)
            .map_err(|_| format!("`{text}` is not a long")),
        Kind::F64 => text
            .parse::<f64>()
            .map(Value::F64)
            .map_err(|_| format!("`{text}` is not a double")),
        Kind::Ref(_) => {
            if text == "null" {
                Ok(Value::Null)
            } else {
                Err(format!("`{text}` is not a reference; only `null` is writable"))
            }
        }
    }
}

/// Apply one `--flag` to the VM options. Returns `Ok(false)` when the
/// argument is not a recognized VM flag, so callers can treat it as
/// positional.
pub fn parse_vm_flag(arg: &str, opts: &mut VmOptions) -> Result<bool, String> {
    if let Some(v) = arg.strip_prefix("--mode=") {
        opts.mode = match v {
            "mixed" => CompileMode::Mixed,
            "forced" => CompileMode::Forced,
            "interp" => CompileMode::InterpOnly,
            _ => return Err(format!("unknown mode `{v}` (mixed, forced, interp)")),
        };
    } else if let Some(v) = arg.strip_prefix("--threshold=") {
        opts.compile_threshold = v
            .parse()
            .map_err(|_| format!("`{v}` is not a threshold"))?;
    } else if let Some(v) = arg.strip_prefix("--workers=") {
        opts.compile_workers = v
            .parse()
            .map_err(|_| format!("`{v}` is not a worker count"))?;
    } else if let Some(v) = arg.strip_prefix("--cache-dir=") {
        opts.cache_dir = Some(PathBuf::from(v));
    } else if let Some(v) = arg.strip_prefix("--inline-limit=") {
        opts.compile.build.inline_insn_limit = v
            .parse()
            .map_err(|_| format!("`{v}` is not an instruction count"))?;
    } else if arg == "--no-loop-opts" {
        opts.compile.loop_opts = false;
    } else if arg == "--no-ccp" {
        opts.compile.ccp = false;
    } else {
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests;
