#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Pipeline benchmarks: assembly, the optimizing compiler, and both
//! execution tiers on the same workload.

use anvil_bc::{assemble, MethodId, Value};
use anvil_codegen::{compile, CompileOptions};
use anvil_parse::NoProfile;
use anvil_vm::{CompileMode, Vm, VmOptions};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Loop-heavy workload: sum of i*i for i in 0..n.
const SUMSQ: &str = "\
module bench

fn sumsq(n: int) -> int {
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
  iload 2
  imul
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

fn generate_n_functions(n: usize) -> String {
    let mut src = String::from("module bench\n");
    for i in 0..n {
        src.push_str(&format!(
            "\nfn f{i}(x: int) -> int {{\n  locals 1\n  iload 0\n  iconst {i}\n  iadd\n  iret\n}}\n"
        ));
    }
    src
}

fn bench_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble");
    for n in [10usize, 100, 1000] {
        let src = generate_n_functions(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &src, |b, src| {
            b.iter(|| assemble(black_box(src)).unwrap());
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let module = assemble(SUMSQ).unwrap();
    let opts = CompileOptions::default();
    c.bench_function("compile/sumsq", |b| {
        b.iter(|| compile(black_box(&module), MethodId(0), &NoProfile, &opts).unwrap());
    });
}

fn bench_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("run");
    let arg = [Value::I32(1000)];

    let mut interp = Vm::with_options(
        assemble(SUMSQ).unwrap(),
        VmOptions {
            mode: CompileMode::InterpOnly,
            ..VmOptions::default()
        },
    );
    group.bench_function("interpreted", |b| {
        b.iter(|| interp.call("sumsq", black_box(&arg)).unwrap());
    });

    let mut forced = Vm::with_options(
        assemble(SUMSQ).unwrap(),
        VmOptions {
            mode: CompileMode::Forced,
            ..VmOptions::default()
        },
    );
    group.bench_function("compiled", |b| {
        b.iter(|| forced.call("sumsq", black_box(&arg)).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_assemble, bench_compile, bench_tiers);
criterion_main!(benches);
