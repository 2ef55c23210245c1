//! Shared setup for the allocation integration tests.

#![allow(dead_code)]

use raffle::{AllocationOrchestrator, AllocationPolicy};
use raffle_core::{ParticipantInfo, TicketNumber};
use raffle_testing::fixtures::small_range;
use raffle_testing::{InMemoryTicketStore, ManualClock};
use std::sync::Arc;

/// An orchestrator over tickets 1..=100 with a handle on its store and clock.
pub struct Harness {
    pub raffle: AllocationOrchestrator,
    pub store: Arc<InMemoryTicketStore>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(AllocationPolicy::new(small_range()))
    }

    pub fn with_policy(policy: AllocationPolicy) -> Self {
        raffle_testing::init_test_tracing();
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = ManualClock::starting_at_test_epoch();
        let raffle = AllocationOrchestrator::new(store.clone(), Arc::new(clock.clone()), policy);
        Self {
            raffle,
            store,
            clock,
        }
    }
}

/// Raw request numbers.
pub fn numbers(raw: &[u32]) -> Vec<TicketNumber> {
    raw.iter().copied().map(TicketNumber::new).collect()
}

/// A valid participant for `name`.
pub fn participant(name: &str) -> ParticipantInfo {
    ParticipantInfo::general(format!("{name} Participant"))
}

/// A receipt reference for `name`.
pub fn receipt(name: &str) -> String {
    format!("receipts/{name}.pdf")
}
