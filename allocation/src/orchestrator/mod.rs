//! Allocation Orchestrator: the end-to-end claim flow.
//!
//! `submit_allocation` walks an attempt through
//! `Requested -> Validating -> Reserved -> AwaitingEvidence -> Confirmed`.
//! Every step before the commit is read-only, so a failure there leaves no
//! trace. The commit itself is the single store operation
//! [`TicketStore::commit_allocation`], which either sells the whole set or
//! nothing.
//!
//! Conflicts are terminal and never retried here. A client retry after a
//! storage failure is safe: a confirmed allocation for the same identity and
//! the same ticket set is returned again instead of a second one being made.

mod phase;

pub use phase::{AllocationAttempt, AllocationPhase};

use crate::config::AllocationPolicy;
use crate::deadline::bounded;
use crate::error::{AllocationError, Result};
use crate::inventory::{CatalogEntry, TicketInventory};
use crate::ledger::ReservationLedger;
use crate::metrics;
use crate::validation::{check_identity, check_participant, ticket_set_from_request};
use raffle_core::{
    Allocation, AllocationId, AllocationStatus, BuyerId, Clock, EvidenceRef, NewAllocation,
    ParticipantInfo, Reservation, TicketNumber, TicketSet, TicketStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Successful outcome of [`AllocationOrchestrator::submit_allocation`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReceipt {
    /// The confirmed allocation
    pub allocation_id: AllocationId,
    /// Always `Confirmed`
    pub status: AllocationStatus,
    /// Tickets sold
    pub tickets: TicketSet,
    /// `true` when an earlier identical submission had already been confirmed
    pub replayed: bool,
}

impl AllocationReceipt {
    fn for_allocation(allocation: &Allocation, replayed: bool) -> Self {
        Self {
            allocation_id: allocation.id,
            status: allocation.status,
            tickets: allocation.tickets.clone(),
            replayed,
        }
    }
}

/// Drives claims and purchases over the inventory and ledger.
#[derive(Clone)]
pub struct AllocationOrchestrator {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    policy: AllocationPolicy,
    inventory: TicketInventory,
    ledger: ReservationLedger,
}

impl AllocationOrchestrator {
    /// Wire an orchestrator, its inventory and its ledger to one store.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, policy: AllocationPolicy) -> Self {
        Self {
            inventory: TicketInventory::new(Arc::clone(&store), Arc::clone(&clock), policy),
            ledger: ReservationLedger::new(Arc::clone(&store), Arc::clone(&clock), policy),
            store,
            clock,
            policy,
        }
    }

    /// The read side.
    #[must_use]
    pub const fn inventory(&self) -> &TicketInventory {
        &self.inventory
    }

    /// The hold bookkeeping.
    #[must_use]
    pub const fn ledger(&self) -> &ReservationLedger {
        &self.ledger
    }

    /// The rules this orchestrator runs with.
    #[must_use]
    pub const fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    /// Start checkout: hold `tickets` for `identity` for the default TTL.
    ///
    /// # Errors
    ///
    /// - `Validation`: malformed request
    /// - `DuplicateIdentity`: the identity already bought
    /// - `AlreadySold` / `AlreadyReserved`: names the conflicting numbers
    /// - `StorageUnavailable`: nothing was held
    #[tracing::instrument(skip(self, identity, tickets), fields(buyer = %identity))]
    pub async fn claim(
        &self,
        identity: &BuyerId,
        tickets: &[TicketNumber],
    ) -> Result<Reservation> {
        check_identity(identity)?;
        let tickets = ticket_set_from_request(&self.policy, tickets)?;

        if self.confirmed(identity).await?.is_some() {
            tracing::warn!("Claim refused: identity already has an allocation");
            return Err(AllocationError::DuplicateIdentity {
                buyer: identity.clone(),
            });
        }

        self.ledger
            .hold(&tickets, identity, self.ledger.default_ttl())
            .await
    }

    /// Validate a purchase and commit it atomically.
    ///
    /// # Errors
    ///
    /// - `Validation`: malformed request, before any store access
    /// - `DuplicateIdentity`: the identity already bought a different set
    /// - `AlreadySold` / `AlreadyReserved`: names the conflicting numbers
    /// - `EvidenceMissing`: no proof of payment; nothing was written
    /// - `StorageUnavailable`: nothing was committed; safe to resubmit
    #[tracing::instrument(skip(self, identity, tickets, participant, evidence), fields(buyer = %identity))]
    pub async fn submit_allocation(
        &self,
        identity: &BuyerId,
        tickets: &[TicketNumber],
        participant: ParticipantInfo,
        evidence: Option<&str>,
    ) -> Result<AllocationReceipt> {
        let mut attempt = AllocationAttempt::new(identity.clone(), TicketSet::new());
        let result = self
            .run_attempt(&mut attempt, tickets, participant, evidence)
            .await;

        match &result {
            Ok(receipt) => {
                let outcome = if receipt.replayed { "replayed" } else { "confirmed" };
                tracing::info!(
                    allocation_id = %receipt.allocation_id,
                    tickets = %receipt.tickets,
                    replayed = receipt.replayed,
                    "Allocation confirmed"
                );
                metrics::record_allocation(outcome);
            }
            Err(e) => {
                attempt.reject(e);
                tracing::warn!(
                    kind = e.kind(),
                    error = %e,
                    tickets = %attempt.tickets(),
                    "Allocation rejected"
                );
                metrics::record_allocation(e.kind());
            }
        }
        tracing::debug!(trail = ?attempt.trail(), "Allocation attempt finished");

        result
    }

    async fn run_attempt(
        &self,
        attempt: &mut AllocationAttempt,
        requested: &[TicketNumber],
        participant: ParticipantInfo,
        evidence: Option<&str>,
    ) -> Result<AllocationReceipt> {
        let identity = attempt.buyer().clone();
        attempt.advance(AllocationPhase::Validating);

        check_identity(&identity)?;
        let tickets = ticket_set_from_request(&self.policy, requested)?;
        attempt.set_tickets(tickets.clone());
        check_participant(&self.policy, &participant)?;

        if let Some(existing) = self.confirmed(&identity).await? {
            return replay(attempt, &existing);
        }

        let now = self.clock.now();
        let snapshot = bounded(
            self.policy.store_timeout,
            "snapshot",
            self.store.snapshot(Some(&tickets), now),
        )
        .await?;
        let sold = snapshot.sold_among(&tickets);
        if !sold.is_empty() {
            let conflict = AllocationError::AlreadySold { tickets: sold };
            let own = snapshot
                .sold
                .values()
                .filter(|ticket| tickets.contains(ticket.number))
                .all(|ticket| ticket.buyer == identity);
            if own {
                return self.settle_own_race(attempt, conflict).await;
            }
            return Err(conflict);
        }
        let held = snapshot.held_by_others(&tickets, &identity, now);
        if !held.is_empty() {
            return Err(AllocationError::AlreadyReserved { tickets: held });
        }
        attempt.advance(AllocationPhase::Reserved);

        attempt.advance(AllocationPhase::AwaitingEvidence);
        let evidence = EvidenceRef::parse(evidence).ok_or(AllocationError::EvidenceMissing)?;

        let allocation = NewAllocation {
            id: AllocationId::new(),
            buyer: identity.clone(),
            tickets: tickets.clone(),
            participant,
            evidence,
        };
        let started = Instant::now();
        let committed = bounded(
            self.policy.store_timeout,
            "commit_allocation",
            self.store.commit_allocation(allocation, self.clock.now()),
        )
        .await;

        let allocation = match committed {
            Ok(allocation) => allocation,
            Err(
                conflict @ (AllocationError::AlreadySold { .. }
                | AllocationError::DuplicateIdentity { .. }),
            ) => return self.settle_own_race(attempt, conflict).await,
            Err(e) => return Err(e),
        };

        metrics::record_sale(tickets.len(), started.elapsed().as_secs_f64());
        attempt.advance(AllocationPhase::Confirmed);
        Ok(AllocationReceipt::for_allocation(&allocation, false))
    }

    /// A concurrent submission by the same identity may have committed first;
    /// its allocation then answers this attempt through the replay rule. A
    /// failed re-read cannot rule that out, so it is reported as is.
    async fn settle_own_race(
        &self,
        attempt: &mut AllocationAttempt,
        conflict: AllocationError,
    ) -> Result<AllocationReceipt> {
        match self.confirmed(attempt.buyer()).await? {
            Some(existing) => replay(attempt, &existing),
            None => Err(conflict),
        }
    }

    /// The identity's confirmed allocation, if any.
    ///
    /// # Errors
    ///
    /// - `Validation`: blank identity
    /// - `StorageUnavailable` / `Corrupt`: the read failed
    pub async fn query_mine(&self, identity: &BuyerId) -> Result<Option<Allocation>> {
        check_identity(identity)?;
        self.confirmed(identity).await
    }

    /// Every ticket in the range with its status.
    ///
    /// # Errors
    ///
    /// - `StorageUnavailable` / `Corrupt`: the snapshot failed
    pub async fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        self.inventory.catalog().await
    }

    async fn confirmed(&self, identity: &BuyerId) -> Result<Option<Allocation>> {
        bounded(
            self.policy.store_timeout,
            "confirmed_allocation",
            self.store.confirmed_allocation(identity),
        )
        .await
    }
}

impl std::fmt::Debug for AllocationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationOrchestrator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// An identity's existing allocation answers a resubmission of the same set
/// and refuses any other.
fn replay(attempt: &mut AllocationAttempt, existing: &Allocation) -> Result<AllocationReceipt> {
    if existing.tickets != *attempt.tickets() {
        return Err(AllocationError::DuplicateIdentity {
            buyer: existing.buyer.clone(),
        });
    }

    tracing::debug!(allocation_id = %existing.id, "Resubmission of a confirmed allocation");
    for next in [
        AllocationPhase::Reserved,
        AllocationPhase::AwaitingEvidence,
        AllocationPhase::Confirmed,
    ] {
        attempt.advance(next);
    }
    Ok(AllocationReceipt::for_allocation(existing, true))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use raffle_core::{DateTime, InventorySnapshot, StoreError, StoreFuture, Utc};
    use raffle_testing::fixtures::{buyer, small_range};
    use raffle_testing::{InMemoryTicketStore, ManualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loses every commit to a sale it cannot see, and fails every
    /// confirmed-allocation read after the first when `reread_fails` is set.
    struct LostRaceStore {
        inner: InMemoryTicketStore,
        reads: AtomicUsize,
        reread_fails: bool,
    }

    impl LostRaceStore {
        fn new(reread_fails: bool) -> Self {
            Self {
                inner: InMemoryTicketStore::new(),
                reads: AtomicUsize::new(0),
                reread_fails,
            }
        }
    }

    impl TicketStore for LostRaceStore {
        fn snapshot<'a>(
            &'a self,
            tickets: Option<&'a TicketSet>,
            now: DateTime<Utc>,
        ) -> StoreFuture<'a, InventorySnapshot> {
            self.inner.snapshot(tickets, now)
        }

        fn upsert_hold<'a>(
            &'a self,
            holder: &'a BuyerId,
            tickets: &'a TicketSet,
            now: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> StoreFuture<'a, Reservation> {
            self.inner.upsert_hold(holder, tickets, now, expires_at)
        }

        fn release_hold<'a>(
            &'a self,
            holder: &'a BuyerId,
            tickets: &'a TicketSet,
        ) -> StoreFuture<'a, usize> {
            self.inner.release_hold(holder, tickets)
        }

        fn commit_allocation<'a>(
            &'a self,
            allocation: NewAllocation,
            _now: DateTime<Utc>,
        ) -> StoreFuture<'a, Allocation> {
            Box::pin(async move {
                Err(StoreError::Sold {
                    tickets: allocation.tickets,
                })
            })
        }

        fn confirmed_allocation<'a>(
            &'a self,
            buyer: &'a BuyerId,
        ) -> StoreFuture<'a, Option<Allocation>> {
            if self.reads.fetch_add(1, Ordering::SeqCst) > 0 && self.reread_fails {
                return Box::pin(async {
                    Err(StoreError::Unavailable("connection reset".to_string()))
                });
            }
            self.inner.confirmed_allocation(buyer)
        }

        fn confirmed_allocations(&self) -> StoreFuture<'_, Vec<Allocation>> {
            self.inner.confirmed_allocations()
        }

        fn purge_expired_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, usize> {
            self.inner.purge_expired_holds(now)
        }
    }

    fn orchestrator(store: LostRaceStore) -> AllocationOrchestrator {
        AllocationOrchestrator::new(
            Arc::new(store),
            Arc::new(ManualClock::starting_at_test_epoch()),
            AllocationPolicy::new(small_range()),
        )
    }

    async fn submit(raffle: &AllocationOrchestrator) -> Result<AllocationReceipt> {
        raffle
            .submit_allocation(
                &buyer("x"),
                &[TicketNumber::new(7)],
                ParticipantInfo::general("Ana Lopez"),
                Some("receipts/x.pdf"),
            )
            .await
    }

    #[tokio::test]
    async fn lost_commit_reports_the_conflict_when_nothing_was_confirmed() {
        let err = submit(&orchestrator(LostRaceStore::new(false))).await.unwrap_err();

        assert!(matches!(err, AllocationError::AlreadySold { .. }));
        assert_eq!(err.tickets().unwrap().to_vec(), vec![7]);
    }

    #[tokio::test]
    async fn lost_commit_with_failed_reread_stays_retryable() {
        let err = submit(&orchestrator(LostRaceStore::new(true))).await.unwrap_err();

        assert_eq!(err.kind(), "storage_unavailable");
        assert!(err.is_retryable());
    }
}
