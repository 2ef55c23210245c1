//! Reservation Ledger: short-lived holds on ticket numbers.
//!
//! Expiry is lazy. A hold stops blocking others the instant its expiry is
//! reached, whether or not its record still exists; the
//! [`ReservationReclaimer`] only tidies up stale records.

use crate::config::AllocationPolicy;
use crate::deadline::bounded;
use crate::error::Result;
use crate::metrics;
use crate::validation::{check_identity, check_ticket_set};
use chrono::{DateTime, TimeDelta, Utc};
use raffle_core::{BuyerId, Clock, Reservation, TicketSet, TicketStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Creates, refreshes and releases holds.
#[derive(Clone)]
pub struct ReservationLedger {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    policy: AllocationPolicy,
}

impl ReservationLedger {
    /// Create a ledger.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, policy: AllocationPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// The checkout hold duration.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.policy.reservation_ttl
    }

    /// Hold every ticket in `tickets` for `holder` until `now + ttl`.
    ///
    /// Re-holding tickets the holder already holds extends them. A zero
    /// `ttl` produces a hold that is already inert.
    ///
    /// # Errors
    ///
    /// - `Validation`: bad count, out-of-range numbers or blank holder
    /// - `AlreadySold` / `AlreadyReserved`: names the conflicting numbers
    /// - `StorageUnavailable`: nothing was held
    #[tracing::instrument(skip(self, holder, tickets), fields(holder = %holder, tickets = %tickets))]
    pub async fn hold(
        &self,
        tickets: &TicketSet,
        holder: &BuyerId,
        ttl: Duration,
    ) -> Result<Reservation> {
        let result = self.try_hold(tickets, holder, ttl).await;
        match &result {
            Ok(reservation) => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    expires_at = %reservation.expires_at,
                    "Tickets held"
                );
                metrics::record_hold("held");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Hold refused");
                metrics::record_hold(e.kind());
            }
        }
        result
    }

    async fn try_hold(
        &self,
        tickets: &TicketSet,
        holder: &BuyerId,
        ttl: Duration,
    ) -> Result<Reservation> {
        check_identity(holder)?;
        check_ticket_set(&self.policy, tickets)?;

        let now = self.clock.now();
        let expires_at = expiry(now, ttl);
        bounded(
            self.policy.store_timeout,
            "upsert_hold",
            self.store.upsert_hold(holder, tickets, now, expires_at),
        )
        .await
    }

    /// Release `holder`'s holds on `tickets` early.
    ///
    /// Returns how many holds were removed; releasing nothing is not an error.
    ///
    /// # Errors
    ///
    /// - `Validation`: blank holder
    /// - `StorageUnavailable`: nothing was released
    #[tracing::instrument(skip(self, holder, tickets), fields(holder = %holder, tickets = %tickets))]
    pub async fn release(&self, holder: &BuyerId, tickets: &TicketSet) -> Result<usize> {
        check_identity(holder)?;
        if tickets.is_empty() {
            return Ok(0);
        }

        let released = bounded(
            self.policy.store_timeout,
            "release_hold",
            self.store.release_hold(holder, tickets),
        )
        .await?;

        tracing::debug!(released, "Holds released");
        metrics::record_released(released);
        Ok(released)
    }

    /// Delete expired hold records.
    ///
    /// # Errors
    ///
    /// - `StorageUnavailable`: nothing was purged
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let purged = bounded(
            self.policy.store_timeout,
            "purge_expired_holds",
            self.store.purge_expired_holds(now),
        )
        .await?;

        if purged > 0 {
            tracing::debug!(purged, "Expired holds purged");
        }
        metrics::record_reclaimed(purged);
        Ok(purged)
    }
}

impl std::fmt::Debug for ReservationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationLedger")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Background task that purges expired holds on an interval.
///
/// Stops when the shutdown channel fires or its sender is dropped.
#[derive(Debug)]
pub struct ReservationReclaimer {
    ledger: ReservationLedger,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl ReservationReclaimer {
    /// Create a reclaimer.
    #[must_use]
    pub const fn new(
        ledger: ReservationLedger,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            ledger,
            interval,
            shutdown,
        }
    }

    /// Spawn the purge loop, or return `None` when the interval is zero.
    #[must_use]
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if self.interval.is_zero() {
            tracing::info!("Reservation reclaimer disabled");
            return None;
        }
        Some(tokio::spawn(self.run()))
    }

    async fn run(mut self) {
        tracing::info!(interval = ?self.interval, "Reservation reclaimer started");

        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.ledger.purge_expired().await {
                        tracing::warn!(error = %e, "Expired hold purge failed");
                    }
                }
                _ = self.shutdown.recv() => {
                    tracing::info!("Reservation reclaimer shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::error::AllocationError;
    use raffle_core::{AllocationId, NewAllocation};
    use raffle_testing::fixtures::{buyer, evidence, participant, small_range, tickets};
    use raffle_testing::{InMemoryTicketStore, ManualClock};

    fn ledger() -> (ReservationLedger, Arc<InMemoryTicketStore>, ManualClock) {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = ManualClock::starting_at_test_epoch();
        let ledger = ReservationLedger::new(
            store.clone(),
            Arc::new(clock.clone()),
            AllocationPolicy::new(small_range()),
        );
        (ledger, store, clock)
    }

    #[tokio::test]
    async fn same_holder_rehold_extends_expiry() {
        let (ledger, _store, clock) = ledger();
        let x = buyer("x");

        let first = ledger
            .hold(&tickets(&[1, 2]), &x, Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(TimeDelta::seconds(30));
        let second = ledger
            .hold(&tickets(&[2, 3]), &x, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(second.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn zero_ttl_hold_never_blocks() {
        let (ledger, _store, _clock) = ledger();

        ledger
            .hold(&tickets(&[5]), &buyer("x"), Duration::ZERO)
            .await
            .unwrap();
        let reservation = ledger
            .hold(&tickets(&[5]), &buyer("y"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(reservation.holder, buyer("y"));
    }

    #[tokio::test]
    async fn conflicting_hold_names_the_contested_numbers() {
        let (ledger, _store, _clock) = ledger();
        ledger
            .hold(&tickets(&[1, 2, 3]), &buyer("x"), Duration::from_secs(300))
            .await
            .unwrap();

        let err = ledger
            .hold(&tickets(&[3, 4, 5]), &buyer("y"), Duration::from_secs(300))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AllocationError::AlreadyReserved {
                tickets: tickets(&[3])
            }
        );
    }

    #[tokio::test]
    async fn hold_on_sold_ticket_names_the_sold_numbers() {
        let (ledger, store, clock) = ledger();
        store
            .commit_allocation(
                NewAllocation {
                    id: AllocationId::new(),
                    buyer: buyer("x"),
                    tickets: tickets(&[7]),
                    participant: participant("Ana Lopez"),
                    evidence: evidence("x"),
                },
                clock.now(),
            )
            .await
            .unwrap();

        let err = ledger
            .hold(&tickets(&[7, 8]), &buyer("y"), Duration::from_secs(300))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AllocationError::AlreadySold {
                tickets: tickets(&[7])
            }
        );
        assert!(store.raw_inventory().unwrap().holds.is_empty());
    }

    #[tokio::test]
    async fn release_only_touches_the_holders_own_tickets() {
        let (ledger, store, _clock) = ledger();
        ledger
            .hold(&tickets(&[1, 2]), &buyer("x"), Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(ledger.release(&buyer("y"), &tickets(&[1, 2])).await.unwrap(), 0);
        assert_eq!(ledger.release(&buyer("x"), &tickets(&[1])).await.unwrap(), 1);
        assert_eq!(store.raw_inventory().unwrap().holds.len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_expired_records() {
        let (ledger, store, clock) = ledger();
        ledger
            .hold(&tickets(&[1]), &buyer("x"), Duration::from_secs(10))
            .await
            .unwrap();
        ledger
            .hold(&tickets(&[2]), &buyer("y"), Duration::from_secs(600))
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(10));
        assert_eq!(ledger.purge_expired().await.unwrap(), 1);
        assert_eq!(store.raw_inventory().unwrap().holds.len(), 1);
    }

    #[tokio::test]
    async fn reclaimer_with_zero_interval_is_not_spawned() {
        let (ledger, _store, _clock) = ledger();
        let (_tx, rx) = broadcast::channel(1);
        assert!(ReservationReclaimer::new(ledger, Duration::ZERO, rx).spawn().is_none());
    }

    #[test]
    fn huge_ttl_saturates() {
        let now = raffle_testing::mocks::test_epoch();
        assert_eq!(expiry(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
