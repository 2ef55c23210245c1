//! Durable store contract for ticket allocation.
//!
//! The store is the only place where conflicting claims are arbitrated. There
//! is no cross-process lock manager: every write that can race with another
//! writer is expressed as a single conditional write or transaction here, so
//! two service instances sharing one store behave exactly like one.
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `raffle-postgres`): production store
//! - `InMemoryTicketStore` (in `raffle-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return explicit `Pin<Box<dyn Future>>` instead of using `async fn`
//! so components can share one `Arc<dyn TicketStore>`.

use crate::types::{
    Allocation, BuyerId, InventorySnapshot, NewAllocation, Reservation, TicketSet,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by every [`TicketStore`] method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Some of the requested tickets are already sold.
    #[error("Tickets already sold: {tickets}")]
    Sold {
        /// The sold tickets among those requested.
        tickets: TicketSet,
    },

    /// Some of the requested tickets are held by another identity.
    #[error("Tickets held by another buyer: {tickets}")]
    Held {
        /// The tickets held by someone else.
        tickets: TicketSet,
    },

    /// The buyer already owns a confirmed allocation.
    #[error("Buyer {buyer} already has a confirmed allocation")]
    DuplicateBuyer {
        /// The buyer.
        buyer: BuyerId,
    },

    /// The store could not be reached or gave up (timeouts, lock waits,
    /// serialization failures). Nothing was committed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded.
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Only [`StoreError::Unavailable`] is worth retrying unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Durable store for tickets, holds and allocations.
///
/// # Atomicity
///
/// [`upsert_hold`](TicketStore::upsert_hold) and
/// [`commit_allocation`](TicketStore::commit_allocation) are all-or-nothing
/// over the whole ticket set. When they fail, nothing they attempted is
/// observable afterwards.
///
/// # Granularity
///
/// Writes must serialize per ticket number: two calls over disjoint sets may
/// proceed concurrently; two calls over intersecting sets resolve to at most
/// one success.
pub trait TicketStore: Send + Sync {
    /// Read sold tickets and holds active at `now` in one consistent view.
    ///
    /// `None` reads the whole inventory; `Some(set)` restricts to those numbers.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the read could not complete
    /// - `Corrupt`: a stored row could not be decoded
    fn snapshot<'a>(
        &'a self,
        tickets: Option<&'a TicketSet>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, InventorySnapshot>;

    /// Create or refresh `holder`'s hold on every ticket in `tickets`.
    ///
    /// Tickets already held by the same holder are re-held with the new
    /// expiry; holds of other holders that expired at or before `now` are
    /// overwritten.
    ///
    /// # Errors
    ///
    /// - `Sold`: at least one ticket is sold (names all of them)
    /// - `Held`: at least one ticket is actively held by someone else
    /// - `Unavailable`: nothing was written
    fn upsert_hold<'a>(
        &'a self,
        holder: &'a BuyerId,
        tickets: &'a TicketSet,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Reservation>;

    /// Drop `holder`'s holds on `tickets`. Returns how many holds were removed.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: nothing was removed
    fn release_hold<'a>(
        &'a self,
        holder: &'a BuyerId,
        tickets: &'a TicketSet,
    ) -> StoreFuture<'a, usize>;

    /// Sell every ticket in `allocation` and record it as confirmed.
    ///
    /// In one indivisible step: reject tickets actively held by other
    /// holders, mark each ticket sold, insert the allocation as confirmed,
    /// and clear the buyer's own holds on those tickets.
    ///
    /// # Errors
    ///
    /// - `Held` / `Sold`: another claimant owns some of the tickets
    /// - `DuplicateBuyer`: the buyer already has a confirmed allocation
    /// - `Unavailable`: the transaction was rolled back
    fn commit_allocation<'a>(
        &'a self,
        allocation: NewAllocation,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Allocation>;

    /// The buyer's confirmed allocation, if any.
    ///
    /// # Errors
    ///
    /// - `Unavailable` / `Corrupt`
    fn confirmed_allocation<'a>(
        &'a self,
        buyer: &'a BuyerId,
    ) -> StoreFuture<'a, Option<Allocation>>;

    /// Every confirmed allocation, oldest first.
    ///
    /// # Errors
    ///
    /// - `Unavailable` / `Corrupt`
    fn confirmed_allocations(&self) -> StoreFuture<'_, Vec<Allocation>>;

    /// Delete holds that expired at or before `now`. Housekeeping only:
    /// expired holds never block anyone whether or not they are purged.
    ///
    /// # Errors
    ///
    /// - `Unavailable`
    fn purge_expired_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize>;
}
