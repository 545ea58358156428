//! Journal-array record benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segio_bench::utils::{file_io, random_data};
use segio_core::{IoFlags, JaEntryInfo};

/// Benchmark record writes below and above the inline limit.
fn bench_write_ja(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_ja");
    let (_dir, io) = file_io(1 << 16, 64, IoFlags::empty());

    for size in [64usize, 256, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let value = random_data(size);
            b.iter(|| {
                io.write_ja(black_box(1), 2, 0, black_box(&value)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark record reads.
fn bench_read_ja(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_ja");
    let (_dir, io) = file_io(1 << 16, 64, IoFlags::empty());

    for size in [64usize, 256, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let value = random_data(size);
            io.write_ja(7, 3, 0, &value).unwrap();
            let einfo = JaEntryInfo::new(1, size as u32);

            b.iter(|| {
                let record = io
                    .read_ja(&einfo, 1, black_box(7), 3, 0, size as u32)
                    .unwrap();
                black_box(record);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_write_ja, bench_read_ja);
criterion_main!(benches);
