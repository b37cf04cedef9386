use std::time::SystemTime;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kk_core::{is_match, parse_filter, KeywordEntry, Matcher, Normalize, Snapshot};

const CATEGORIES: [&str; 4] = ["self-harm", "suicide", "eating-disorder", "wellness"];

fn build_snapshot(count: usize) -> Snapshot {
    let entries = (0..count)
        .map(|i| {
            KeywordEntry::new(
                format!("keyword{i} phrase{}", i % 7),
                [CATEGORIES[i % CATEGORIES.len()]],
            )
        })
        .chain(std::iter::once(KeywordEntry::new("sewerslide", ["self-harm"])))
        .collect();
    Snapshot::new("bench", entries, SystemTime::now()).expect("non-empty snapshot")
}

fn sample_text() -> String {
    "I have been feeling pretty low lately and honestly it's all a bit much. ".repeat(8)
}

fn bench_indexed_match(c: &mut Criterion) {
    let snapshot = build_snapshot(5_000);
    let matcher = Matcher::new(&snapshot, Normalize::DEFAULT);
    let accept_all = parse_filter("").expect("empty filter");
    let wellness = parse_filter("category=wellness").expect("category filter");
    let text = sample_text();

    c.bench_function("indexed_no_match_5000_entries", |b| {
        b.iter(|| black_box(matcher.is_match(black_box(&text), &accept_all)));
    });

    c.bench_function("indexed_match_with_filter", |b| {
        b.iter(|| black_box(matcher.is_match(black_box("keyword3 phrase3 now"), &wellness)));
    });
}

fn bench_linear_match(c: &mut Criterion) {
    let snapshot = build_snapshot(5_000);
    let text = sample_text();

    c.bench_function("linear_no_match_5000_entries", |b| {
        b.iter(|| black_box(is_match(black_box(&text), snapshot.entries(), Normalize::DEFAULT)));
    });
}

fn bench_index_build(c: &mut Criterion) {
    let snapshot = build_snapshot(5_000);

    c.bench_function("index_build_5000_entries", |b| {
        b.iter(|| black_box(kk_core::KeywordIndex::build(snapshot.entries(), Normalize::DEFAULT)));
    });
}

criterion_group!(benches, bench_indexed_match, bench_linear_match, bench_index_build);
criterion_main!(benches);
