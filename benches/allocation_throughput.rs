//! Benchmarks for contract-number allocation.
//!
//! Run with: cargo bench
//! View results in: target/criterion/report/index.html

use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use contractor::allocator::{AllocatorConfig, Clock, FixedClock, SequenceAllocator};
use contractor::contracts::CounterStore;
use contractor::documents::{ContractRequest, Template};
use contractor::storage::{CounterBackend, CounterBackendKind};

fn create_allocator(kind: CounterBackendKind) -> (SequenceAllocator<CounterBackend>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(CounterBackend::open(kind, dir.path()).unwrap());
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(
        NaiveDate::from_ymd_opt(2025, 9, 23).unwrap(),
    ));
    (
        SequenceAllocator::new(store, clock, AllocatorConfig::default()),
        dir,
    )
}

// =============================================================================
// Allocation Benchmarks
// =============================================================================

fn bench_allocate_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_single");
    group.throughput(Throughput::Elements(1));

    for kind in [
        CounterBackendKind::Memory,
        CounterBackendKind::RocksDb,
        CounterBackendKind::Sqlite,
        CounterBackendKind::File,
    ] {
        let (allocator, _dir) = create_allocator(kind);
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, _| {
            b.iter(|| black_box(allocator.next_number().unwrap()));
        });
    }

    group.finish();
}

fn bench_allocate_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_contended");
    let threads = 4;
    let per_thread = 100;
    group.throughput(Throughput::Elements((threads * per_thread) as u64));

    for kind in [CounterBackendKind::RocksDb, CounterBackendKind::Sqlite] {
        let (allocator, _dir) = create_allocator(kind);
        let allocator = Arc::new(allocator);
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, _| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let a = Arc::clone(&allocator);
                        thread::spawn(move || {
                            for _ in 0..per_thread {
                                black_box(a.next_number().unwrap());
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

// =============================================================================
// Rendering Benchmarks
// =============================================================================

fn bench_render_contract(c: &mut Criterion) {
    let template = Template::default_contract();
    let request = ContractRequest {
        client_full_name: Some("Иванов Иван Иванович".into()),
        passport_full: Some("4510 123456".into()),
        inn: Some("770123456789".into()),
        client_address: Some("Москва, ул. Тверская, д. 1".into()),
        bank_name: Some("ПАО Сбербанк".into()),
        bank_account: Some("40817810099910004312".into()),
        bank_bik: Some("044525225".into()),
        ..Default::default()
    };

    c.bench_function("render_default_contract", |b| {
        b.iter(|| {
            let fields = request.template_fields("20250923-001", "«23» сентября 2025 г.");
            black_box(template.render(&fields))
        });
    });
}

fn bench_seed_lookup(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = CounterBackend::open(CounterBackendKind::RocksDb, dir.path()).unwrap();
    for day in 1..=30 {
        store
            .seed(&format!("contract_counter_202509{:02}", day), day)
            .unwrap();
    }

    c.bench_function("rocksdb_current", |b| {
        b.iter(|| black_box(store.current("contract_counter_20250915").unwrap()));
    });
}

criterion_group!(
    benches,
    bench_allocate_single,
    bench_allocate_contended,
    bench_render_contract,
    bench_seed_lookup,
);
criterion_main!(benches);
