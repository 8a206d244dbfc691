//! Offset encoding benchmarks.
//!
//! Measures the cost of running every strategy over partitions with
//! different completion shapes.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roaring::RoaringTreemap;
use strand_core::Offset;
use strand_offsets::{OffsetMapCodec, OffsetSimultaneousEncoder};

/// Completion shape of the benchmarked range.
#[derive(Clone, Copy, Debug)]
enum Shape {
    /// Every offset independently incomplete with probability 1/2.
    Scattered,
    /// Blocks of 500 alternate between complete and incomplete.
    Blocks,
    /// A single incomplete offset at the base.
    HeadOfLine,
}

fn incompletes(shape: Shape, length: u64) -> RoaringTreemap {
    let mut rng = StdRng::seed_from_u64(42);
    match shape {
        Shape::Scattered => (0..length).filter(|_| rng.gen_bool(0.5)).collect(),
        Shape::Blocks => (0..length).filter(|o| (o / 500) % 2 == 0).collect(),
        Shape::HeadOfLine => std::iter::once(0).collect(),
    }
}

fn bench_simultaneous(c: &mut Criterion) {
    let mut group = c.benchmark_group("simultaneous_encode");
    for length in [1_000u64, 10_000, 30_000] {
        for shape in [Shape::Scattered, Shape::Blocks, Shape::HeadOfLine] {
            let set = incompletes(shape, length);
            group.throughput(Throughput::Elements(length));
            group.bench_with_input(
                BenchmarkId::new(format!("{shape:?}"), length),
                &set,
                |b, set| {
                    b.iter(|| {
                        let encoder = OffsetSimultaneousEncoder::new(
                            Offset::new(0),
                            Some(Offset::new(length - 1)),
                            black_box(set),
                        );
                        black_box(encoder.pack_smallest())
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let codec = OffsetMapCodec::new(1 << 20, 1 << 19, strand_core::InvalidMetadataPolicy::Fail);
    let set = incompletes(Shape::Scattered, 10_000);
    let Ok(metadata) = codec.encode(Offset::new(0), Some(Offset::new(9_999)), &set) else {
        return;
    };
    c.bench_function("decode_scattered_10000", |b| {
        b.iter(|| black_box(codec.decode(Offset::new(0), black_box(&metadata))));
    });
}

criterion_group!(benches, bench_simultaneous, bench_decode);
criterion_main!(benches);
