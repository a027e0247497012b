//! Planning Benchmark Suite
//!
//! Times sharding-plan generation, DLRM graph assembly and dry-run compile
//! for the Criteo table sizes and for synthetic wide table lists.
//!
//! Run with: `cargo bench --bench plan_bench`

use std::hint::black_box;
use std::time::{Duration, Instant};

use dlrmforge::config::TrainingConfig;
use dlrmforge::dlrm::{DlrmBuilder, CRITEO_1TB_SLOT_SIZES, CRITEO_40M_SLOT_SIZES};
use dlrmforge::engine::{DryRunEngine, TrainingEngine};
use dlrmforge::sharding::generate_plan;

/// Time `iterations` calls of `f` after a short warmup and print the mean,
/// median and worst call.
fn time_calls<R>(label: &str, iterations: usize, mut f: impl FnMut() -> R) {
    for _ in 0..iterations.min(10) {
        black_box(f());
    }

    let mut samples: Vec<Duration> = (0..iterations)
        .map(|_| {
            let start = Instant::now();
            black_box(f());
            start.elapsed()
        })
        .collect();
    if samples.is_empty() {
        println!("{}: no samples", label);
        return;
    }
    samples.sort_unstable();

    let mean = samples.iter().sum::<Duration>() / samples.len() as u32;
    let micros = |d: Duration| d.as_secs_f64() * 1e6;
    println!(
        "{:<40} mean {:>10.3} us   median {:>10.3} us   max {:>10.3} us",
        label,
        micros(mean),
        micros(samples[samples.len() / 2]),
        micros(samples[samples.len() - 1])
    );
}

fn synthetic_sizes(n: usize) -> Vec<u64> {
    // every third table is small
    (0..n as u64)
        .map(|i| if i % 3 == 0 { 1000 + i } else { 100_000 + i * 7 })
        .collect()
}

fn main() {
    println!("dlrmforge planning benchmarks\n");

    for gpus in [1, 8, 64] {
        time_calls(&format!("generate_plan criteo40m x{}", gpus), 1000, || {
            generate_plan(&CRITEO_40M_SLOT_SIZES, gpus)
        });
    }
    time_calls("generate_plan criteo1tb x8", 1000, || {
        generate_plan(&CRITEO_1TB_SLOT_SIZES, 8)
    });

    for tables in [256, 4096] {
        let sizes = synthetic_sizes(tables);
        time_calls(&format!("generate_plan synthetic{} x16", tables), 100, || {
            generate_plan(&sizes, 16)
        });
    }

    let builder = DlrmBuilder::new(CRITEO_40M_SLOT_SIZES.to_vec()).num_gpus(8);
    time_calls("dlrm build_graph criteo40m", 200, || {
        builder.build_graph().map(|g| g.len())
    });

    let config = TrainingConfig::reference();
    match dlrmforge::build_model(&config) {
        Ok(model) => time_calls("dry-run compile reference", 200, || {
            DryRunEngine::new().compile(&model).is_ok()
        }),
        Err(e) => eprintln!("skipping compile benchmark: {}", e),
    }
}
