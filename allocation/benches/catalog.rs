//! Catalog Benchmarks
//!
//! Cost of deriving ticket statuses and serving the public views:
//! - `derive_statuses` over growing ranges with mixed sold and held tickets
//! - `TicketInventory::catalog` against the in-memory store
//!
//! Run with: `cargo bench --bench catalog`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use chrono::Duration as ChronoDuration;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use raffle::{AllocationOrchestrator, AllocationPolicy, derive_statuses};
use raffle_core::{
    AllocationId, Hold, InventorySnapshot, ParticipantInfo, ReservationId, SoldTicket,
    TicketNumber, TicketRange,
};
use raffle_testing::fixtures::{buyer, evidence};
use raffle_testing::mocks::test_epoch;
use raffle_testing::{InMemoryTicketStore, ManualClock};
use std::sync::Arc;

/// Every third ticket sold, every fifth held (half of those expired).
fn mixed_snapshot(range: TicketRange) -> InventorySnapshot {
    let now = test_epoch();
    let mut snapshot = InventorySnapshot::default();
    for number in range.iter() {
        let n = number.value();
        if n % 3 == 0 {
            snapshot.sold.insert(
                number,
                SoldTicket {
                    number,
                    allocation_id: AllocationId::new(),
                    buyer: buyer("owner"),
                    evidence: evidence("owner"),
                },
            );
        } else if n % 5 == 0 {
            let ttl = if n % 10 == 0 { -60 } else { 60 };
            snapshot.holds.insert(
                number,
                Hold {
                    number,
                    reservation_id: ReservationId::new(),
                    holder: buyer("holder"),
                    created_at: now,
                    expires_at: now + ChronoDuration::seconds(ttl),
                },
            );
        }
    }
    snapshot
}

fn benchmark_derive_statuses(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive_statuses");
    let now = test_epoch();

    for size in [100u32, 1_000, 10_000] {
        let range = TicketRange::new(1, size).expect("valid range");
        let snapshot = mixed_snapshot(range);
        group.throughput(Throughput::Elements(u64::from(size)));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(derive_statuses(range.iter(), black_box(&snapshot), now)));
        });
    }

    group.finish();
}

fn benchmark_catalog(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    let range = TicketRange::new(1, 1_000).expect("valid range");
    let raffle = AllocationOrchestrator::new(
        Arc::new(InMemoryTicketStore::new()),
        Arc::new(ManualClock::starting_at_test_epoch()),
        AllocationPolicy::new(range),
    );

    runtime.block_on(async {
        for i in 0..100u32 {
            let tickets: Vec<TicketNumber> =
                (i * 5 + 1..=i * 5 + 3).map(TicketNumber::new).collect();
            raffle
                .submit_allocation(
                    &buyer(&format!("buyer{i}")),
                    &tickets,
                    ParticipantInfo::general(format!("Buyer {i}")),
                    Some("receipts/bench.pdf"),
                )
                .await
                .expect("setup allocation");
        }
    });

    group.throughput(Throughput::Elements(1_000));
    group.bench_function("full_range", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(raffle.catalog().await.expect("catalog"));
        });
    });

    group.bench_function("transparency", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(raffle.inventory().transparency().await.expect("transparency"));
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_derive_statuses, benchmark_catalog);
criterion_main!(benches);
