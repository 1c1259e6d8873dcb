//! `anvil compile`: run the optimizing pipeline and print what it built.
//!
//! The pipeline phases are public in the compiler crates precisely so
//! this command can stop after any of them and render the graph. With
//! no `--print-ir`/`--print-lir` flags only the per-method stats line
//! is produced.

use std::fmt::Write as _;

use anvil_bc::{MethodId, Module};
use anvil_codegen::{emit, schedule, CompileOptions};
use anvil_ir::GraphPrinter;
use anvil_opt::{Ccp, IterGvn};
use anvil_parse::{build, NoProfile};

use super::load_module;

/// A point in the pipeline after which the IR can be printed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IrPhase {
    /// Graph construction from bytecode.
    Build,
    /// After iterative value numbering.
    Gvn,
    /// After the loop portfolio.
    Loops,
    /// After conditional constant propagation.
    Ccp,
    /// The block schedule from global code motion.
    Sched,
}

impl IrPhase {
    /// Parse a `--print-ir=` argument; `all` selects every phase.
    pub fn parse(text: &str) -> Option<Vec<IrPhase>> {
        Some(match text {
            "parse" => vec![IrPhase::Build],
            "gvn" => vec![IrPhase::Gvn],
            "loop" => vec![IrPhase::Loops],
            "ccp" => vec![IrPhase::Ccp],
            "sched" => vec![IrPhase::Sched],
            "all" => vec![
                IrPhase::Build,
                IrPhase::Gvn,
                IrPhase::Loops,
                IrPhase::Ccp,
                IrPhase::Sched,
            ],
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            IrPhase::Build => "parse",
            IrPhase::Gvn => "gvn",
            IrPhase::Loops => "loop",
            IrPhase::Ccp => "ccp",
            IrPhase::Sched => "sched",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CompileConfig {
    pub phases: Vec<IrPhase>,
    pub lir: bool,
    pub opts: CompileOptions,
}

/// Compile the named methods (or every method when the list is empty)
/// and return the rendered report.
pub fn compile_file(
    path: &str,
    methods: &[String],
    config: &CompileConfig,
) -> Result<String, String> {
    let module = load_module(path)?;
    let mids: Vec<MethodId> = if methods.is_empty() {
        (0..module.methods.len())
            .map(|i| MethodId(u16::try_from(i).unwrap_or(u16::MAX)))
            .collect()
    } else {
        methods
            .iter()
            .map(|name| {
                module
                    .method_id(name)
                    .ok_or_else(|| format!("{path}: no function named `{name}`"))
            })
            .collect::<Result<_, _>>()?
    };

    let mut out = String::new();
    for mid in mids {
        compile_one(&module, mid, config, &mut out)?;
    }
    Ok(out)
}

fn compile_one(
    module: &Module,
    mid: MethodId,
    config: &CompileConfig,
    out: &mut String,
) -> Result<(), String> {
    let name = module.method(mid).name.clone();
    let wants = |p: IrPhase| config.phases.contains(&p);
    let fail = |e: &dyn std::fmt::Display| format!("{name}: {e}");

    let mut g = build(module, mid, &NoProfile, config.opts.build).map_err(|e| fail(&e))?;
    if wants(IrPhase::Build) {
        section(out, IrPhase::Build, &name, &GraphPrinter::new(&g).print());
    }

    let mut igvn = IterGvn::new();
    igvn.optimize(&mut g).map_err(|e| fail(&e))?;
    if wants(IrPhase::Gvn) {
        section(out, IrPhase::Gvn, &name, &GraphPrinter::new(&g).print());
    }

    if config.opts.loop_opts {
        anvil_loop::optimize(&mut g, &mut igvn, &config.opts.loops).map_err(|e| fail(&e))?;
        if wants(IrPhase::Loops) {
            section(out, IrPhase::Loops, &name, &GraphPrinter::new(&g).print());
        }
    }
    if config.opts.ccp {
        Ccp::analyze_and_apply(&mut g, &mut igvn).map_err(|e| fail(&e))?;
        if wants(IrPhase::Ccp) {
            section(out, IrPhase::Ccp, &name, &GraphPrinter::new(&g).print());
        }
    }
    if wants(IrPhase::Sched) {
        let sched = schedule(&g);
        section(out, IrPhase::Sched, &name, &sched.render(&g));
    }

    let artifact = emit(&g, mid);
    if config.lir {
        let _ = writeln!(out, "== lir `{name}`");
        push_body(out, &artifact.render());
    }
    let _ = writeln!(
        out,
        "compiled `{name}`: {} node(s), {} block(s), {} vreg(s), {} spill(s)",
        artifact.stats.ir_nodes, artifact.stats.blocks, artifact.stats.vregs, artifact.stats.spills
    );
    Ok(())
}

fn section(out: &mut String, phase: IrPhase, name: &str, body: &str) {
    let _ = writeln!(out, "== {} `{name}`", phase.name());
    push_body(out, body);
}

fn push_body(out: &mut String, body: &str) {
    out.push_str(body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
}

#[cfg(test)]
#[path = "compile/tests.rs"]
mod tests;
