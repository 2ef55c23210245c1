//! # Raffle Testing
//!
//! Testing utilities for the raffle allocation crates.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemoryTicketStore`], a serializable in-process [`TicketStore`]
//!   with failure injection
//! - Fixtures and proptest strategies for domain types
//!
//! ## Example
//!
//! ```
//! use raffle_testing::{fixtures, InMemoryTicketStore, ManualClock};
//! use raffle_core::{Clock, TicketStore};
//!
//! # tokio_test::block_on(async {
//! let clock = ManualClock::starting_at_test_epoch();
//! let store = InMemoryTicketStore::new();
//! let expires = clock.now() + chrono::Duration::minutes(5);
//! let hold = store
//!     .upsert_hold(&fixtures::buyer("x"), &fixtures::tickets(&[1, 2]), clock.now(), expires)
//!     .await
//!     .unwrap();
//! assert_eq!(hold.tickets.len(), 2);
//! # });
//! ```
//!
//! [`TicketStore`]: raffle_core::TicketStore

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod store;

use chrono::{DateTime, Utc};
use raffle_core::environment::Clock;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, PoisonError, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use raffle_testing::mocks::FixedClock;
    /// use raffle_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the
    /// components and keep another to step past reservation expiry.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Create a clock frozen at the shared test epoch.
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_epoch())
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// The shared test epoch (2025-01-01 00:00:00 UTC).
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1_735_689_600)
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }
}

/// Ready-made domain values for tests.
pub mod fixtures {
    use raffle_core::{BuyerId, EvidenceRef, ParticipantInfo, TicketRange, TicketSet};

    /// A buyer identity shaped like the e-mail addresses used upstream.
    #[must_use]
    pub fn buyer(name: &str) -> BuyerId {
        BuyerId::new(format!("{name}@example.com"))
    }

    /// Ticket set from raw numbers.
    #[must_use]
    pub fn tickets(numbers: &[u32]) -> TicketSet {
        TicketSet::from_numbers(numbers.iter().copied())
    }

    /// A proof-of-payment reference under the uploads prefix.
    ///
    /// # Panics
    ///
    /// Panics if `name` is blank.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn evidence(name: &str) -> EvidenceRef {
        EvidenceRef::parse(Some(&format!("receipts/{name}.pdf")))
            .expect("fixture evidence is never blank")
    }

    /// A general-public participant.
    #[must_use]
    pub fn participant(name: &str) -> ParticipantInfo {
        ParticipantInfo::general(name)
    }

    /// The range most tests run against (1..=100).
    ///
    /// # Panics
    ///
    /// Never; the bounds are ordered.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn small_range() -> TicketRange {
        TicketRange::new(1, 100).expect("1 <= 100")
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::collection::btree_set;
    use proptest::prelude::*;
    use raffle_core::{TicketNumber, TicketRange, TicketSet};

    /// Non-empty ticket sets of at most `max_len` numbers drawn from `range`.
    pub fn ticket_sets(range: TicketRange, max_len: usize) -> impl Strategy<Value = TicketSet> {
        btree_set(range.first().value()..=range.last().value(), 1..=max_len)
            .prop_map(|numbers| numbers.into_iter().map(TicketNumber::new).collect())
    }
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Respects `RUST_LOG`; output goes through the test harness capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock, ManualClock};
pub use store::InMemoryTicketStore;
