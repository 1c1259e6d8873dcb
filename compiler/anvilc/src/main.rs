//! Anvil VM CLI
//!
//! Tiered execution: every module starts in the interpreter and hot
//! functions are promoted to optimized code.

use anvil_vm::VmOptions;
use anvilc::commands::{
    check_file, compile_file, dis_file, parse_vm_flag, run_file, run_tests, CompileConfig,
    IrPhase, TestConfig,
};

fn main() {
    anvilc::init_tracing();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let command = &args[1];

    match command.as_str() {
        "run" => {
            if args.len() < 3 {
                eprintln!("Usage: anvil run <file.anv> [args...] [options]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --main=<name>       Entry function (default: main)");
                eprintln!("  --mode=<mode>       Tiering: mixed, forced, interp (default: mixed)");
                eprintln!("  --threshold=<n>     Invocation count that triggers compilation");
                eprintln!("  --workers=<n>       Background compiler threads");
                eprintln!("  --cache-dir=<path>  Persist compiled artifacts across runs");
                eprintln!("  --inline-limit=<n>  Max callee size considered for inlining");
                eprintln!("  --no-loop-opts      Skip the loop optimization portfolio");
                eprintln!("  --no-ccp            Skip conditional constant propagation");
                std::process::exit(1);
            }

            let mut opts = VmOptions::default();
            let mut entry = "main".to_string();
            let mut positional = Vec::new();
            for arg in args.iter().skip(2) {
                if let Some(name) = arg.strip_prefix("--main=") {
                    entry = name.to_string();
                } else {
                    match parse_vm_flag(arg, &mut opts) {
                        Ok(true) => {}
                        Ok(false) => positional.push(arg.clone()),
                        Err(msg) => fail(&msg),
                    }
                }
            }
            let Some((path, fn_args)) = positional.split_first() else {
                fail("missing file path");
            };

            match run_file(path, &entry, fn_args, opts) {
                Ok(Some(value)) => println!("{value}"),
                Ok(None) => {}
                Err(msg) => fail(&msg),
            }
        }
        "test" => {
            let mut path: Option<String> = None;
            let mut config = TestConfig::default();

            for arg in args.iter().skip(2) {
                if let Some(filter) = arg.strip_prefix("--filter=") {
                    config.filter = Some(filter.to_string());
                } else if arg == "--no-parallel" {
                    config.parallel = false;
                } else if arg == "--verbose" || arg == "-v" {
                    config.verbose = true;
                } else if !arg.starts_with('-') && path.is_none() {
                    path = Some(arg.clone());
                }
            }

            let path = path.unwrap_or_else(|| ".".to_string());
            let summary = run_tests(&path, &config);
            if summary.files == 0 {
                fail(&format!("no .anv files under `{path}`"));
            }
            for report in &summary.reports {
                if report.failures.is_empty() {
                    if config.verbose {
                        println!("ok   {} ({} cases)", report.path.display(), report.cases);
                    }
                } else {
                    println!("FAIL {}", report.path.display());
                    for failure in &report.failures {
                        println!("  {failure}");
                    }
                }
            }
            println!(
                "{} file(s), {} case(s), {} failure(s)",
                summary.files,
                summary.cases,
                summary.failed()
            );
            if !summary.ok() {
                std::process::exit(1);
            }
        }
        "compile" => {
            if args.len() < 3 {
                eprintln!("Usage: anvil compile <file.anv> [functions...] [options]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --print-ir=<phase>  Print the IR: parse, gvn, loop, ccp, sched, all");
                eprintln!("  --print-lir         Print the allocated LIR");
                eprintln!("  --no-loop-opts      Skip the loop optimization portfolio");
                eprintln!("  --no-ccp            Skip conditional constant propagation");
                std::process::exit(1);
            }

            let mut config = CompileConfig::default();
            let mut positional = Vec::new();
            for arg in args.iter().skip(2) {
                if let Some(phase) = arg.strip_prefix("--print-ir=") {
                    let Some(mut phases) = IrPhase::parse(phase) else {
                        fail(&format!(
                            "unknown phase `{phase}` (parse, gvn, loop, ccp, sched, all)"
                        ));
                    };
                    config.phases.append(&mut phases);
                } else if arg == "--print-lir" {
                    config.lir = true;
                } else if arg == "--no-loop-opts" {
                    config.opts.loop_opts = false;
                } else if arg == "--no-ccp" {
                    config.opts.ccp = false;
                } else if !arg.starts_with('-') {
                    positional.push(arg.clone());
                } else {
                    fail(&format!("unknown option `{arg}`"));
                }
            }
            let Some((path, methods)) = positional.split_first() else {
                fail("missing file path");
            };

            match compile_file(path, methods, &config) {
                Ok(report) => print!("{report}"),
                Err(msg) => fail(&msg),
            }
        }
        "check" => {
            if args.len() < 3 {
                eprintln!("Usage: anvil check <file.anv>");
                std::process::exit(1);
            }
            match check_file(&args[2]) {
                Ok(summary) => println!("{summary}"),
                Err(msg) => fail(&msg),
            }
        }
        "dis" => {
            if args.len() < 3 {
                eprintln!("Usage: anvil dis <file.anv>");
                std::process::exit(1);
            }
            match dis_file(&args[2]) {
                Ok(text) => print!("{text}"),
                Err(msg) => fail(&msg),
            }
        }
        "--help" | "-h" | "help" => {
            print_usage();
        }
        _ => {
            eprintln!("error: unknown command '{command}'");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("error: {msg}");
    std::process::exit(1);
}

fn print_usage() {
    println!("Anvil bytecode VM and optimizing compiler");
    println!();
    println!("Usage: anvil <command> [arguments]");
    println!();
    println!("Commands:");
    println!("  run <file.anv> [args]   Assemble a module and call its entry function");
    println!("  test [path]             Run `// run:` golden tests over .anv files");
    println!("  compile <file.anv>      Run the optimizing pipeline, print IR/LIR");
    println!("  check <file.anv>        Assemble and verify without running");
    println!("  dis <file.anv>          Print the canonical disassembly");
    println!();
    println!("Run a command without arguments for its options.");
}
