//! Benchmarks for selector parsing, key expression matching and reply aggregation.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dataspace_core::net::keyexpr;
use dataspace_core::prelude::*;
use dataspace_core::workspace::ReplyAggregator;

const SELECTORS: [(&str, &str); 4] = [
    ("plain", "/demo/a/b"),
    ("wildcards", "/demo/**/sensors/*"),
    ("properties", "/demo/a?(starttime=0;stoptime=now)"),
    ("full", "/demo/*?x>1(n=3)#field"),
];

fn bench_selector_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector_parsing");
    for (label, text) in SELECTORS {
        group.bench_with_input(BenchmarkId::from_parameter(label), text, |b, input| {
            b.iter(|| black_box(Selector::new(input).ok()));
        });
    }
    group.bench_function("path_canonicalize", |b| {
        b.iter(|| black_box(Path::new("//demo///a/b//c/").ok()));
    });
    group.finish();
}

fn bench_keyexpr_intersection(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyexpr_intersection");
    for (label, expr, path) in [
        ("exact", "/demo/a/b", "/demo/a/b"),
        ("star", "/demo/*/b", "/demo/a/b"),
        ("double_star", "/demo/**/z", "/demo/a/b/c/d/e/z"),
        ("miss", "/demo/**/z", "/demo/a/b/c/d/e/y"),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(label), &(expr, path), |b, &(e, p)| {
            b.iter(|| black_box(keyexpr::intersect(e, p)));
        });
    }
    group.finish();
}

fn replies(paths: usize, per_path: usize) -> Vec<Data> {
    let mut out = Vec::with_capacity(paths * per_path);
    for p in 0..paths {
        let path = Path::new(format!("/bench/{}", p)).unwrap();
        for i in 0..per_path {
            // Interleave so the aggregator has to sort.
            let time = ((i * 7919) % per_path) as u64;
            out.push(Data::new(path.clone(), Value::Int(i as i64), Timestamp::new(time, [1; 16])));
        }
    }
    out
}

fn bench_reply_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_aggregation");
    for (paths, per_path) in [(100, 1), (100, 10), (10, 1_000)] {
        let input = replies(paths, per_path);
        group.throughput(Throughput::Elements(input.len() as u64));
        for series in [false, true] {
            let label = format!("{}x{}/{}", paths, per_path, if series { "series" } else { "snapshot" });
            group.bench_with_input(BenchmarkId::from_parameter(label), &input, |b, data| {
                b.iter(|| {
                    let mut agg = ReplyAggregator::new();
                    for d in data.iter().cloned() {
                        agg.push(d);
                    }
                    black_box(agg.finish(series))
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_selector_parsing, bench_keyexpr_intersection, bench_reply_aggregation);
criterion_main!(benches);
