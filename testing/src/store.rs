//! In-memory [`TicketStore`] for tests.
//!
//! Every operation runs under one mutex, which makes the store trivially
//! serializable. Commits are staged on a copy of the state and swapped in
//! only when every step succeeded, so an injected mid-commit failure leaves
//! the store exactly as it was.

use chrono::{DateTime, Utc};
use raffle_core::{
    Allocation, AllocationStatus, BuyerId, Hold, InventorySnapshot, NewAllocation, Reservation,
    ReservationId, SoldTicket, StoreError, StoreFuture, TicketSet, TicketStore,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct StoreState {
    inventory: InventorySnapshot,
    allocations: Vec<Allocation>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_next_commit: AtomicBool,
    latency_ms: AtomicUsize,
}

/// In-memory ticket store.
///
/// Clones share the same underlying state, like pool handles to one database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketStore {
    state: Arc<Mutex<StoreState>>,
    faults: Arc<Faults>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next commit after it has sold its first ticket.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Delay every call by `latency` before it touches the state.
    pub fn set_latency(&self, latency: Duration) {
        let millis = usize::try_from(latency.as_millis()).unwrap_or(usize::MAX);
        self.faults.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of store calls made so far (including failed ones).
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every allocation recorded, in commit order.
    ///
    /// # Errors
    ///
    /// Returns error if the state lock is poisoned.
    pub fn allocations(&self) -> Result<Vec<Allocation>, StoreError> {
        Ok(self.lock()?.allocations.clone())
    }

    /// Raw view of sold tickets and all holds, expired ones included.
    ///
    /// # Errors
    ///
    /// Returns error if the state lock is poisoned.
    pub fn raw_inventory(&self) -> Result<InventorySnapshot, StoreError> {
        Ok(self.lock()?.inventory.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("Mutex lock failed".to_string()))
    }

    async fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.faults.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency as u64)).await;
        }

        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_claim(
    inventory: &InventorySnapshot,
    claimant: &BuyerId,
    tickets: &TicketSet,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let sold = inventory.sold_among(tickets);
    if !sold.is_empty() {
        return Err(StoreError::Sold { tickets: sold });
    }
    let held = inventory.held_by_others(tickets, claimant, now);
    if !held.is_empty() {
        return Err(StoreError::Held { tickets: held });
    }
    Ok(())
}

impl TicketStore for InMemoryTicketStore {
    fn snapshot<'a>(
        &'a self,
        tickets: Option<&'a TicketSet>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, InventorySnapshot> {
        Box::pin(async move {
            self.enter().await?;
            let state = self.lock()?;
            let wanted = |n: &raffle_core::TicketNumber| tickets.is_none_or(|set| set.contains(*n));

            Ok(InventorySnapshot {
                sold: state
                    .inventory
                    .sold
                    .iter()
                    .filter(|(n, _)| wanted(n))
                    .map(|(n, sold)| (*n, sold.clone()))
                    .collect(),
                holds: state
                    .inventory
                    .holds
                    .iter()
                    .filter(|(n, hold)| wanted(n) && hold.is_active_at(now))
                    .map(|(n, hold)| (*n, hold.clone()))
                    .collect(),
            })
        })
    }

    fn upsert_hold<'a>(
        &'a self,
        holder: &'a BuyerId,
        tickets: &'a TicketSet,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Reservation> {
        Box::pin(async move {
            self.enter().await?;
            let mut state = self.lock()?;
            check_claim(&state.inventory, holder, tickets, now)?;

            let reservation_id = ReservationId::new();
            for number in tickets.iter() {
                state.inventory.holds.insert(
                    number,
                    Hold {
                        number,
                        reservation_id,
                        holder: holder.clone(),
                        created_at: now,
                        expires_at,
                    },
                );
            }

            Ok(Reservation {
                id: reservation_id,
                holder: holder.clone(),
                tickets: tickets.clone(),
                created_at: now,
                expires_at,
            })
        })
    }

    fn release_hold<'a>(
        &'a self,
        holder: &'a BuyerId,
        tickets: &'a TicketSet,
    ) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            self.enter().await?;
            let mut state = self.lock()?;
            let before = state.inventory.holds.len();
            state
                .inventory
                .holds
                .retain(|n, hold| !(tickets.contains(*n) && &hold.holder == holder));
            Ok(before - state.inventory.holds.len())
        })
    }

    fn commit_allocation<'a>(
        &'a self,
        allocation: NewAllocation,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Allocation> {
        Box::pin(async move {
            self.enter().await?;
            let mut state = self.lock()?;
            check_claim(&state.inventory, &allocation.buyer, &allocation.tickets, now)?;

            if state
                .allocations
                .iter()
                .any(|a| a.buyer == allocation.buyer && a.status == AllocationStatus::Confirmed)
            {
                return Err(StoreError::DuplicateBuyer {
                    buyer: allocation.buyer,
                });
            }

            let mut staged = state.clone();
            for number in allocation.tickets.iter() {
                staged.inventory.sold.insert(
                    number,
                    SoldTicket {
                        number,
                        allocation_id: allocation.id,
                        buyer: allocation.buyer.clone(),
                        evidence: allocation.evidence.clone(),
                    },
                );
                if self.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
                    // `staged` is dropped; nothing reaches `state`.
                    return Err(StoreError::Unavailable(
                        "injected failure during commit".to_string(),
                    ));
                }
            }

            let buyer = allocation.buyer.clone();
            let tickets = allocation.tickets.clone();
            staged
                .inventory
                .holds
                .retain(|n, hold| !(tickets.contains(*n) && hold.holder == buyer));

            let confirmed = allocation.confirmed_at(now);
            staged.allocations.push(confirmed.clone());
            *state = staged;

            Ok(confirmed)
        })
    }

    fn confirmed_allocation<'a>(
        &'a self,
        buyer: &'a BuyerId,
    ) -> StoreFuture<'a, Option<Allocation>> {
        Box::pin(async move {
            self.enter().await?;
            let state = self.lock()?;
            Ok(state
                .allocations
                .iter()
                .find(|a| &a.buyer == buyer && a.status == AllocationStatus::Confirmed)
                .cloned())
        })
    }

    fn confirmed_allocations(&self) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(async move {
            self.enter().await?;
            let state = self.lock()?;
            Ok(state
                .allocations
                .iter()
                .filter(|a| a.status == AllocationStatus::Confirmed)
                .cloned()
                .collect())
        })
    }

    fn purge_expired_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            self.enter().await?;
            let mut state = self.lock()?;
            let before = state.inventory.holds.len();
            state.inventory.holds.retain(|_, hold| hold.is_active_at(now));
            Ok(before - state.inventory.holds.len())
        })
    }
}
