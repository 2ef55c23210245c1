//! Concurrent submission tests.
//!
//! Many tasks race through `submit_allocation` on one shared orchestrator.
//! The store adds a little latency to every call so the read-only checks of
//! competing attempts interleave before their commits.
//!
//! Run with: `cargo test -p raffle --test concurrency`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

mod common;

use common::{Harness, numbers, participant, receipt};
use raffle::AllocationError;
use raffle_core::{TicketNumber, TicketStatus};
use raffle_testing::fixtures::buyer;
use std::collections::HashSet;
use std::time::Duration;

/// Scenario B: two buyers race for ticket 7.
#[tokio::test]
async fn test_two_buyers_racing_for_one_ticket() {
    let h = Harness::new();
    h.store.set_latency(Duration::from_millis(5));

    let handles: Vec<_> = ["x", "y"]
        .into_iter()
        .map(|name| {
            let raffle = h.raffle.clone();
            tokio::spawn(async move {
                raffle
                    .submit_allocation(
                        &buyer(name),
                        &numbers(&[7, if name == "x" { 8 } else { 9 }]),
                        participant(name),
                        Some(receipt(name).as_str()),
                    )
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    let confirmed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(confirmed, 1, "exactly one buyer gets ticket 7");

    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(
        matches!(loser, AllocationError::AlreadySold { tickets } if tickets.contains(TicketNumber::new(7))),
        "unexpected loser error: {loser}"
    );

    let catalog = h.raffle.catalog().await.unwrap();
    assert_eq!(catalog[6].ticket_number, TicketNumber::new(7));
    assert_eq!(catalog[6].status, TicketStatus::Sold);
}

#[tokio::test]
async fn test_disjoint_submissions_all_succeed() {
    let h = Harness::new();
    h.store.set_latency(Duration::from_millis(2));

    let handles: Vec<_> = (0..10u32)
        .map(|i| {
            let raffle = h.raffle.clone();
            tokio::spawn(async move {
                let name = format!("buyer{i}");
                let base = 1 + i * 5;
                raffle
                    .submit_allocation(
                        &buyer(&name),
                        &numbers(&[base, base + 1, base + 2, base + 3, base + 4]),
                        participant(&name),
                        Some(receipt(&name).as_str()),
                    )
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        result
            .expect("task panicked")
            .expect("disjoint submission must succeed");
    }

    let summary = h.raffle.inventory().summary().await.unwrap();
    assert_eq!(summary.sold, 50);
    assert_eq!(summary.available, 50);
}

#[tokio::test]
async fn test_overlapping_submissions_have_one_winner() {
    let h = Harness::new();
    h.store.set_latency(Duration::from_millis(2));

    let handles: Vec<_> = (0..20u32)
        .map(|i| {
            let raffle = h.raffle.clone();
            tokio::spawn(async move {
                let name = format!("buyer{i}");
                raffle
                    .submit_allocation(
                        &buyer(&name),
                        &numbers(&[40, 41, 60 + i]),
                        participant(&name),
                        Some(receipt(&name).as_str()),
                    )
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for result in futures::future::join_all(handles).await {
        match result.expect("task panicked") {
            Ok(_) => winners += 1,
            Err(AllocationError::AlreadySold { .. } | AllocationError::AlreadyReserved { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);

    // The winner got its whole set; nobody got a partial one.
    let raw = h.store.raw_inventory().unwrap();
    assert_eq!(raw.sold.len(), 3);
    let owners: HashSet<_> = raw.sold.values().map(|t| t.allocation_id).collect();
    assert_eq!(owners.len(), 1);
}

#[tokio::test]
async fn test_concurrent_retries_by_one_identity_make_one_allocation() {
    let h = Harness::new();
    h.store.set_latency(Duration::from_millis(2));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let raffle = h.raffle.clone();
            tokio::spawn(async move {
                raffle
                    .submit_allocation(
                        &buyer("x"),
                        &numbers(&[70, 71]),
                        participant("x"),
                        Some(receipt("x").as_str()),
                    )
                    .await
            })
        })
        .collect();

    let receipts: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked").expect("retry must not fail"))
        .collect();

    let ids: HashSet<_> = receipts.iter().map(|r| r.allocation_id).collect();
    assert_eq!(ids.len(), 1);
    assert_eq!(receipts.iter().filter(|r| !r.replayed).count(), 1);
    assert_eq!(h.store.allocations().unwrap().len(), 1);
}
