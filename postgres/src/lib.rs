//! `PostgreSQL` ticket store for raffle allocation.
//!
//! This crate provides [`PostgresTicketStore`], the production implementation
//! of the [`TicketStore`](raffle_core::TicketStore) contract. It uses sqlx and
//! supports:
//!
//! - Per-ticket row locks taken in ascending order, so overlapping writers
//!   serialize and disjoint writers do not block each other
//! - Atomic allocation commits (sold rows, allocation row and hold cleanup in
//!   one transaction)
//! - A partial unique index enforcing one confirmed allocation per buyer
//! - Bounded lock waits mapped to [`StoreError::Unavailable`](raffle_core::StoreError::Unavailable)
//!
//! # Example
//!
//! ```ignore
//! use raffle_postgres::PostgresTicketStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresTicketStore::connect("postgres://localhost/raffle").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod store;

pub use store::PostgresTicketStore;
