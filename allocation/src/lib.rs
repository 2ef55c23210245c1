//! # Raffle
//!
//! Ticket allocation for a raffle: a finite, numbered inventory sold to
//! registered participants with the guarantee that no number is ever sold
//! twice, even under concurrent purchase attempts from several processes.
//!
//! ## Components
//!
//! - [`TicketInventory`]: derived status of every ticket (available,
//!   reserved, sold), the public catalog and the transparency list
//! - [`ReservationLedger`]: short-lived holds that keep a checkout's numbers
//!   away from other buyers, plus the optional [`ReservationReclaimer`]
//! - [`AllocationOrchestrator`]: the claim and purchase flow ending in one
//!   atomic commit
//!
//! All conflict arbitration happens in the [`TicketStore`]; the components
//! keep no shared mutable state of their own.
//!
//! ## Example
//!
//! ```
//! use raffle::{AllocationOrchestrator, AllocationPolicy};
//! use raffle_core::{BuyerId, ParticipantInfo, TicketNumber, TicketRange};
//! use raffle_testing::{InMemoryTicketStore, ManualClock};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let policy = AllocationPolicy::new(TicketRange::new(1, 100).unwrap());
//! let raffle = AllocationOrchestrator::new(
//!     Arc::new(InMemoryTicketStore::new()),
//!     Arc::new(ManualClock::starting_at_test_epoch()),
//!     policy,
//! );
//!
//! let buyer = BuyerId::new("ana@example.com");
//! let tickets = [TicketNumber::new(7), TicketNumber::new(8)];
//! raffle.claim(&buyer, &tickets).await.unwrap();
//!
//! let receipt = raffle
//!     .submit_allocation(&buyer, &tickets, ParticipantInfo::general("Ana"), Some("receipts/ana.pdf"))
//!     .await
//!     .unwrap();
//! assert!(!receipt.replayed);
//! # });
//! ```
//!
//! [`TicketStore`]: raffle_core::TicketStore

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod config;
mod deadline;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
mod validation;

pub use bootstrap::RaffleService;
pub use config::{AllocationPolicy, Config, ConfigError, PostgresConfig, RaffleConfig};
pub use error::{AllocationError, Result, ValidationError};
pub use inventory::{
    derive_statuses, CatalogEntry, InventorySummary, TicketInventory, TransparencyEntry,
};
pub use ledger::{ReservationLedger, ReservationReclaimer};
pub use orchestrator::{
    AllocationAttempt, AllocationOrchestrator, AllocationPhase, AllocationReceipt,
};
