//! Benchmarks for record crypto and folder planning
//!
//! Run with: cargo bench -p weave-core

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use weave_core::crypto::OLDSYNC_INFO;
use weave_core::sync::{folders, Envelope};
use weave_core::{hkdf, HistoryRecord, KeyBundle};

// ============================================================================
// Key Derivation
// ============================================================================

fn bench_key_derivation(c: &mut Criterion) {
    let secret = [7u8; 32];

    c.bench_function("hkdf_64_bytes", |b| {
        b.iter(|| black_box(hkdf(&secret, None, OLDSYNC_INFO.as_bytes(), 64).unwrap()))
    });

    c.bench_function("key_bundle_from_master_key", |b| {
        b.iter(|| black_box(KeyBundle::from_master_key(&secret, OLDSYNC_INFO).unwrap()))
    });
}

// ============================================================================
// Envelope
// ============================================================================

fn record_with_title(len: usize) -> HistoryRecord {
    HistoryRecord::new(
        "bench-guid-1",
        "https://example.com/some/long/path?query=1",
        &"t".repeat(len),
        1_700_000_000.0,
    )
}

fn bench_envelope(c: &mut Criterion) {
    let keys = KeyBundle::generate();
    let mut group = c.benchmark_group("envelope");

    for len in [16usize, 1024, 16 * 1024] {
        let record = record_with_title(len);
        group.throughput(Throughput::Bytes(len as u64));

        group.bench_with_input(BenchmarkId::new("seal", len), &record, |b, record| {
            b.iter(|| black_box(Envelope::seal(record, &keys).unwrap()))
        });

        let envelope = Envelope::seal(&record, &keys).unwrap();
        group.bench_with_input(BenchmarkId::new("open", len), &envelope, |b, envelope| {
            b.iter(|| black_box(envelope.open::<HistoryRecord>(&keys).unwrap()))
        });
    }

    group.finish();
}

// ============================================================================
// Folder Planning
// ============================================================================

fn bench_folder_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("folder_plan");

    for depth in [10usize, 100, 1000] {
        // A chain: folder i holds folder i + 1
        let pending: Vec<String> = (0..depth).map(|i| format!("folder{}", i)).collect();
        let children: HashMap<String, Vec<String>> = (0..depth)
            .map(|i| (format!("folder{}", i), vec![format!("folder{}", i + 1)]))
            .collect();

        group.bench_with_input(BenchmarkId::new("chain", depth), &pending, |b, pending| {
            b.iter(|| {
                black_box(
                    folders::plan(pending, |guid| {
                        Ok(children.get(guid).cloned().unwrap_or_default())
                    })
                    .unwrap(),
                )
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_key_derivation, bench_envelope, bench_folder_plan);
criterion_main!(benches);
