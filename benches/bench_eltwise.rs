//! Elementwise kernel benchmarks.
//!
//! Transforms: relu, exp, tanh, soft_relu
//! Sizes: 1K, 16K, 256K, 4M
//! Compares: scalar reference vs JIT kernel (single call and rayon dispatch)
//! Reports: memory throughput (bytes read + written)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use eltwise_jit::reference::eltwise_fwd;
use eltwise_jit::{device_profile, run_parallel, EltwiseAlg, EltwiseDesc, EltwiseKernel};

const ELEM_SIZES: &[usize] = &[1024, 16384, 262144, 4 * 1024 * 1024];
const ALGS: &[EltwiseAlg] = &[EltwiseAlg::Relu, EltwiseAlg::Exp, EltwiseAlg::Tanh, EltwiseAlg::SoftRelu];

fn size_label(n: usize) -> String {
    match n {
        1024 => "1K".into(),
        16384 => "16K".into(),
        262144 => "256K".into(),
        4194304 => "4M".into(),
        _ => format!("{n}"),
    }
}

fn random_f32_vec(n: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n).map(|_| rng.gen_range(-8.0f32..8.0)).collect()
}

fn rw_bytes(n: usize) -> u64 {
    (n * 2 * std::mem::size_of::<f32>()) as u64
}

/// Scalar reference baseline
fn bench_scalar(c: &mut Criterion) {
    let mut group = c.benchmark_group("eltwise/scalar");
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(3));

    for &alg in ALGS {
        for &n in &ELEM_SIZES[..3] {
            group.throughput(Throughput::Bytes(rw_bytes(n)));
            let input = random_f32_vec(n);
            let mut output = vec![0.0f32; n];
            group.bench_with_input(BenchmarkId::new(alg.name(), size_label(n)), &n, |bench, _| {
                bench.iter(|| {
                    for (o, &x) in output.iter_mut().zip(&input) {
                        *o = eltwise_fwd(alg, x, 0.0, 0.0);
                    }
                    black_box(&output);
                });
            });
        }
    }
    group.finish();
}

/// One kernel call on the calling thread, per width class
fn bench_jit_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("eltwise/jit_single");
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(3));

    for width in device_profile().supported_widths() {
        for &alg in ALGS {
            let kernel = EltwiseKernel::build_for(&EltwiseDesc::new(alg, 0.0, 0.0), width).unwrap();
            for &n in &ELEM_SIZES[..3] {
                group.throughput(Throughput::Bytes(rw_bytes(n)));
                let input = random_f32_vec(n);
                let mut output = vec![0.0f32; n];
                let id = BenchmarkId::new(format!("{}/{}", alg.name(), width), size_label(n));
                group.bench_with_input(id, &n, |bench, &n| {
                    bench.iter(|| {
                        unsafe {
                            kernel.invoke(
                                black_box(input.as_ptr() as *const u8),
                                std::ptr::null(),
                                black_box(output.as_mut_ptr() as *mut u8),
                                n,
                            );
                        }
                        black_box(&output);
                    });
                });
            }
        }
    }
    group.finish();
}

/// Partitioned dispatch over the rayon pool
fn bench_jit_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("eltwise/jit_parallel");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(5));

    for &alg in ALGS {
        let kernel = EltwiseKernel::build(&EltwiseDesc::new(alg, 0.0, 0.0)).unwrap();
        for &n in &ELEM_SIZES[2..] {
            group.throughput(Throughput::Bytes(rw_bytes(n)));
            let input = random_f32_vec(n);
            let mut output = vec![0.0f32; n];
            group.bench_with_input(BenchmarkId::new(alg.name(), size_label(n)), &n, |bench, _| {
                bench.iter(|| {
                    run_parallel(&kernel, black_box(&input), None, &mut output).unwrap();
                    black_box(&output);
                });
            });
        }
    }
    group.finish();
}

/// Code generation latency
fn bench_jit_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("eltwise/jit_compile");
    group.sample_size(20);

    for &alg in ALGS {
        let desc = EltwiseDesc::new(alg, 0.0, 0.0);
        group.bench_function(BenchmarkId::new(alg.name(), "best"), |bench| {
            bench.iter(|| black_box(EltwiseKernel::build(black_box(&desc)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    name = eltwise_benches;
    config = Criterion::default();
    targets =
        bench_scalar,
        bench_jit_single,
        bench_jit_parallel,
        bench_jit_compile,
);
criterion_main!(eltwise_benches);
