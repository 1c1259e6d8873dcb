//! `anvil run`: assemble a module and call one of its functions.

use anvil_bc::Value;
use anvil_vm::{Vm, VmOptions};

use super::{load_module, parse_value};

/// Run `entry` with arguments parsed against its signature.
pub fn run_file(
    path: &str,
    entry: &str,
    raw_args: &[String],
    opts: VmOptions,
) -> Result<Option<Value>, String> {
    let module = load_module(path)?;
    let Some(mid) = module.method_id(entry) else {
        return Err(format!("{path}: no function named `{entry}`"));
    };
    let method = module.method(mid);
    if raw_args.len() != method.params.len() {
        return Err(format!(
            "`{entry}` takes {} argument(s), got {}",
            method.params.len(),
            raw_args.len()
        ));
    }
    let args = raw_args
        .iter()
        .zip(&method.params)
        .map(|(raw, &kind)| parse_value(raw, kind))
        .collect::<Result<Vec<_>, _>>()?;

    let mut vm = Vm::with_options(module, opts);
    vm.call_id(mid, &args).map_err(|e| e.to_string())
}
