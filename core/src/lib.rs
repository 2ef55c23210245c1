//! # Raffle Core
//!
//! Domain vocabulary and the durable store contract for selling a finite,
//! numbered inventory of raffle tickets without ever selling a number twice.
//!
//! ## Core Concepts
//!
//! - **Ticket**: a number within the configured [`TicketRange`]
//! - **Reservation**: a soft, time-bounded hold of tickets by one identity
//! - **Allocation**: the durable record of a confirmed sale
//! - **Store**: the [`TicketStore`] that arbitrates every conflicting write
//!
//! Ticket status is never stored. It is derived by overlaying sold tickets
//! and then active holds on an otherwise free range.
//!
//! [`TicketRange`]: types::TicketRange
//! [`TicketStore`]: store::TicketStore

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod environment;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use environment::{Clock, SystemClock};
pub use store::{StoreError, StoreFuture, TicketStore};
pub use types::*;
