//! Segment reference, window and eviction benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segio_bench::utils::{file_io, random_segments};
use segio_core::{Io, IoConfig, IoContext, IoFlags, RwMode};

/// Benchmark referencing an already mapped segment.
fn bench_segment_ref_hot(c: &mut Criterion) {
    let ctx = IoContext::new(IoConfig::default());
    let io = Io::create_temporary(&ctx, 0, 1 << 16, 64, IoFlags::empty()).unwrap();
    io.segment(0).unwrap();

    c.bench_function("segment_ref_hot", |b| {
        b.iter(|| {
            let seg = io.segment(black_box(0)).unwrap();
            black_box(seg.as_ptr());
        });
    });
}

/// Benchmark referencing random segments of a file-backed io.
fn bench_segment_ref_random(c: &mut Criterion) {
    let (_dir, io) = file_io(1 << 16, 256, IoFlags::EXPIRE_SEGMENT);
    let segments = random_segments(1024, 256);
    let mut i = 0usize;

    c.bench_function("segment_ref_random", |b| {
        b.iter(|| {
            let segno = segments[i % segments.len()];
            i += 1;
            let seg = io.segment(black_box(segno)).unwrap();
            black_box(seg.as_ptr());
        });
    });
}

/// Benchmark mapping and unmapping a segment repeatedly.
fn bench_map_unmap_cycle(c: &mut Criterion) {
    let (_dir, io) = file_io(1 << 16, 4, IoFlags::EXPIRE_SEGMENT);

    c.bench_function("map_unmap_cycle", |b| {
        b.iter(|| {
            drop(io.segment(black_box(1)).unwrap());
            io.seg_expire(1, 0).unwrap();
        });
    });
}

/// Benchmark windows inside one segment and across segments.
fn bench_windows(c: &mut Criterion) {
    let ctx = IoContext::new(IoConfig::default());
    let io = Io::create_temporary(&ctx, 0, 1 << 16, 16, IoFlags::empty()).unwrap();
    let mut group = c.benchmark_group("win_map");

    for size in [256u32, 4096, 70 * 1024].iter() {
        group.throughput(Throughput::Bytes(u64::from(*size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let win = io
                    .win_map(black_box(1), black_box(100), size, RwMode::ReadOnly)
                    .unwrap();
                black_box(win.as_slice().len());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_segment_ref_hot,
    bench_segment_ref_random,
    bench_map_unmap_cycle,
    bench_windows,
);
criterion_main!(benches);
