//! Benchmarks for line-level condition tracking.
//!
//! Run with:
//! ```bash
//! cargo bench --bench condition_space
//! ```

use std::fs;
use std::path::Path;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use variant_composer::condition::ConditionSpace;
use variant_composer::preprocess::{Preprocessor, PreprocessorOptions, BUILTIN_MACROS};
use variant_composer::reference::Ref;

/// Random and/or combination of `defined(CONFIG_i)` atoms.
fn random_condition(space: &mut ConditionSpace, rng: &mut ChaCha8Rng, num_vars: usize, num_ops: usize) -> Ref {
    let atoms: Vec<Ref> = (0..num_vars)
        .map(|i| space.defined(&format!("CONFIG_{}", i)))
        .collect();
    let bdd = space.bdd();
    let mut result = bdd.one();
    for _ in 0..num_ops {
        let mut atom = atoms[rng.random_range(0..num_vars)];
        if rng.random_bool(0.5) {
            atom = -atom;
        }
        result = if rng.random_bool(0.5) {
            bdd.apply_and(result, atom)
        } else {
            bdd.apply_or(result, atom)
        };
    }
    result
}

/// A C file with `depth` levels of nested conditionals, `width` groups per level.
fn nested_source(depth: usize, width: usize) -> String {
    fn group(out: &mut String, level: usize, depth: usize, width: usize, counter: &mut usize) {
        for _ in 0..width {
            *counter += 1;
            let n = *counter;
            out.push_str(&format!("#if defined(CONFIG_{}) && !defined(CONFIG_{})\n", n % 32, (n * 7) % 32));
            out.push_str(&format!("int a{};\n", n));
            if level + 1 < depth {
                group(out, level + 1, depth, width, counter);
            }
            out.push_str("#elif CONFIG_ALT\n");
            out.push_str(&format!("int b{};\n", n));
            out.push_str("#endif\n");
        }
    }

    let mut out = String::new();
    let mut counter = 0;
    group(&mut out, 0, depth, width, &mut counter);
    out
}

fn bench_to_formula(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition/to_formula");

    for num_vars in [8, 12, 16] {
        group.bench_with_input(BenchmarkId::new("vars", num_vars), &num_vars, |b, &num_vars| {
            let mut space = ConditionSpace::new();
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            let f = random_condition(&mut space, &mut rng, num_vars, 200);
            b.iter(|| space.to_formula(f, |name| name.to_string()));
        });
    }

    group.finish();
}

fn bench_preprocess(c: &mut Criterion) {
    // Unterminated groups and opaque conditions are reported here.
    let _ = simplelog::SimpleLogger::init(log::LevelFilter::Warn, simplelog::Config::default());

    let mut group = c.benchmark_group("condition/preprocess");
    group.sample_size(20);

    let dir = tempfile::tempdir().unwrap();
    let options = PreprocessorOptions::default();
    let is_free = |_: &str| false;

    for (depth, width) in [(2, 8), (3, 6), (4, 4)] {
        let text = nested_source(depth, width);
        let path = dir.path().join(format!("nested-{}-{}.c", depth, width));
        fs::write(&path, &text).unwrap();
        group.throughput(Throughput::Elements(text.lines().count() as u64));

        group.bench_with_input(
            BenchmarkId::new("nested", format!("{}x{}", depth, width)),
            &path,
            |b, path| {
                b.iter(|| {
                    let mut space = ConditionSpace::new();
                    let mut preprocessor = Preprocessor::new(&mut space, &options, &is_free);
                    preprocessor.inject(Path::new("<builtin>"), BUILTIN_MACROS);
                    preprocessor.run(path).unwrap().len()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_to_formula, bench_preprocess);
criterion_main!(benches);
