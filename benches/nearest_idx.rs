use criterion::{criterion_group, criterion_main, Criterion};

use almanac::series::{nearest_idx, nearest_idx_from};
use almanac::types::DateTime;

fn minute_timestamps() -> Vec<DateTime> {
    //Ten sessions of minute samples
    (0..(10 * 391)).map(|i| DateTime::from(i * 60)).collect()
}

fn full_scan_walk(timestamps: &[DateTime]) {
    for i in (0..timestamps.len()).step_by(7) {
        let query = DateTime::from(i as i64 * 60 + 30);
        let _ = nearest_idx(query, timestamps);
    }
}

fn hinted_walk(timestamps: &[DateTime]) {
    let mut hint = 0;
    for i in (0..timestamps.len()).step_by(7) {
        let query = DateTime::from(i as i64 * 60 + 30);
        if let Ok(idx) = nearest_idx_from(query, timestamps, hint) {
            hint = idx;
        }
    }
}

fn benchmarks(c: &mut Criterion) {
    let timestamps = minute_timestamps();
    c.bench_function("nearest idx full scan", |b| {
        b.iter(|| full_scan_walk(&timestamps))
    });
    c.bench_function("nearest idx hinted", |b| b.iter(|| hinted_walk(&timestamps)));
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
