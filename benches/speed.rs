use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};

use sktrs::{Geometry, HashKind, SketchCollector};

fn bench_collect(c: &mut Criterion) {
    let tuples: Vec<u32> = (0..1_000_000u32).collect();

    let mut group = c.benchmark_group("collect");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(10);
    group.throughput(Throughput::Bytes(tuples.len() as u64 * 4));

    for kind in HashKind::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &tuples, |b, tuples| {
            b.iter(|| {
                let mut collector = SketchCollector::new(Geometry::DEFAULT, kind);
                collector.collect(tuples);
                collector.estimate_cardinality()
            })
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let tuples: Vec<u32> = (0..1_000_000u32).collect();
    let mut a = SketchCollector::new(Geometry::DEFAULT, HashKind::Murmur128);
    a.collect(&tuples[..500_000]);
    let mut b = SketchCollector::new(Geometry::DEFAULT, HashKind::Murmur128);
    b.collect(&tuples[500_000..]);

    c.bench_function("merge", |bencher| {
        bencher.iter(|| {
            let mut master = a.clone();
            master.merge(&b).unwrap();
            master
        })
    });
}

criterion_group!(benches, bench_collect, bench_merge);
criterion_main!(benches);
