//! `anvil dis`: print the canonical disassembly of a module.

use anvil_bc::disassemble;

use super::load_module;

pub fn dis_file(path: &str) -> Result<String, String> {
    let module = load_module(path)?;
    Ok(disassemble(&module))
}
