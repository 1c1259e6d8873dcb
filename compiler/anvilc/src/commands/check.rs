//! `anvil check`: assemble and verify without running.

use super::load_module;

/// Check `path`, returning a one-line summary of what verified.
pub fn check_file(path: &str) -> Result<String, String> {
    let module = load_module(path)?;
    Ok(format!(
        "module `{}`: {} function(s), {} global(s)",
        module.name,
        module.methods.len(),
        module.globals.len()
    ))
}
