//! Anvil CLI
//!
//! The `anvil` binary wraps the VM and compiler crates: `run` assembles
//! and executes a module, `test` runs golden tests over a directory of
//! `.anv` files, `compile` stops the optimizing pipeline at any phase
//! and prints the IR or LIR, and `check`/`dis` verify and disassemble.

pub mod commands;

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=anvil_vm=debug` or `RUST_LOG=anvil_codegen=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true))
                .with(filter)
                .init();
        }
    });
}
