//! Ticket Inventory: the read side.
//!
//! A ticket's status is never stored. It is derived by overlaying sold
//! tickets on the configured range, then active holds, and everything left
//! is available. Every answer comes from one store snapshot, so a number can
//! never show up as both sold and available.

use crate::config::AllocationPolicy;
use crate::deadline::bounded;
use crate::error::{Result, ValidationError};
use chrono::{DateTime, Utc};
use raffle_core::{
    Clock, InventorySnapshot, TicketNumber, TicketSet, TicketStatus, TicketStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One row of the public catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Ticket number
    pub ticket_number: TicketNumber,
    /// Current status
    pub status: TicketStatus,
}

/// One row of the public list of confirmed sales.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparencyEntry {
    /// Sold ticket
    pub ticket_number: TicketNumber,
    /// Name of the participant who bought it
    pub participant_name: String,
    /// When the allocation was confirmed
    pub allocated_at: DateTime<Utc>,
}

/// Status counts over the whole range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySummary {
    /// Tickets in the range
    pub total: usize,
    /// Free to claim
    pub available: usize,
    /// Held by an active reservation
    pub reserved: usize,
    /// Permanently sold
    pub sold: usize,
}

/// Derive each number's status from a snapshot.
///
/// Sold wins over held; holds are re-checked against `now` so an expired
/// hold never blocks even if the store returned it.
pub fn derive_statuses(
    numbers: impl IntoIterator<Item = TicketNumber>,
    snapshot: &InventorySnapshot,
    now: DateTime<Utc>,
) -> BTreeMap<TicketNumber, TicketStatus> {
    numbers
        .into_iter()
        .map(|number| {
            let status = if snapshot.sold.contains_key(&number) {
                TicketStatus::Sold
            } else if snapshot
                .holds
                .get(&number)
                .is_some_and(|hold| hold.is_active_at(now))
            {
                TicketStatus::Reserved
            } else {
                TicketStatus::Available
            };
            (number, status)
        })
        .collect()
}

/// Authoritative view of every ticket number's status.
#[derive(Clone)]
pub struct TicketInventory {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    policy: AllocationPolicy,
}

impl TicketInventory {
    /// Create an inventory over `policy.range`.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, policy: AllocationPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// The rules this inventory runs with.
    #[must_use]
    pub const fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    /// Status of each requested number.
    ///
    /// # Errors
    ///
    /// - `Validation`: some numbers are outside the configured range
    /// - `StorageUnavailable` / `Corrupt`: the snapshot failed
    pub async fn query_status(
        &self,
        tickets: &TicketSet,
    ) -> Result<BTreeMap<TicketNumber, TicketStatus>> {
        let outside: TicketSet = tickets
            .iter()
            .filter(|n| !self.policy.range.contains(*n))
            .collect();
        if !outside.is_empty() {
            return Err(ValidationError::OutOfRange {
                tickets: outside,
                range: self.policy.range,
            }
            .into());
        }
        if tickets.is_empty() {
            return Ok(BTreeMap::new());
        }

        let now = self.clock.now();
        let snapshot = bounded(
            self.policy.store_timeout,
            "snapshot",
            self.store.snapshot(Some(tickets), now),
        )
        .await?;
        Ok(derive_statuses(tickets.iter(), &snapshot, now))
    }

    /// Every number in the range with its status, ascending.
    ///
    /// # Errors
    ///
    /// - `StorageUnavailable` / `Corrupt`: the snapshot failed
    pub async fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        let now = self.clock.now();
        let snapshot = bounded(
            self.policy.store_timeout,
            "snapshot",
            self.store.snapshot(None, now),
        )
        .await?;

        Ok(derive_statuses(self.policy.range.iter(), &snapshot, now)
            .into_iter()
            .map(|(ticket_number, status)| CatalogEntry {
                ticket_number,
                status,
            })
            .collect())
    }

    /// Confirmed sales with the buyer's participant name, by ticket number.
    ///
    /// # Errors
    ///
    /// - `StorageUnavailable` / `Corrupt`: the read failed
    pub async fn transparency(&self) -> Result<Vec<TransparencyEntry>> {
        let allocations = bounded(
            self.policy.store_timeout,
            "confirmed_allocations",
            self.store.confirmed_allocations(),
        )
        .await?;

        let mut entries: Vec<TransparencyEntry> = allocations
            .iter()
            .flat_map(|allocation| {
                allocation.tickets.iter().map(|ticket_number| TransparencyEntry {
                    ticket_number,
                    participant_name: allocation.participant.name.clone(),
                    allocated_at: allocation.created_at,
                })
            })
            .collect();
        entries.sort_by_key(|entry| entry.ticket_number);
        Ok(entries)
    }

    /// Status counts over the whole range.
    ///
    /// # Errors
    ///
    /// - `StorageUnavailable` / `Corrupt`: the snapshot failed
    pub async fn summary(&self) -> Result<InventorySummary> {
        let catalog = self.catalog().await?;
        Ok(catalog.iter().fold(
            InventorySummary {
                total: catalog.len(),
                ..InventorySummary::default()
            },
            |mut summary, entry| {
                match entry.status {
                    TicketStatus::Available => summary.available += 1,
                    TicketStatus::Reserved => summary.reserved += 1,
                    TicketStatus::Sold => summary.sold += 1,
                }
                summary
            },
        ))
    }
}

impl std::fmt::Debug for TicketInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketInventory")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
