//! Domain types for raffle ticket allocation.
//!
//! Value objects (ticket numbers, identities, evidence references), the
//! reservation and allocation records, and the read-side snapshot that the
//! inventory overlays to derive each ticket's status.

use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Ticket numbers
// ============================================================================

/// One unit of the finite numbered inventory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// Creates a ticket number.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw number.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for TicketNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The configured inclusive range of sellable ticket numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRange {
    first: TicketNumber,
    last: TicketNumber,
}

impl TicketRange {
    /// Creates a range, or `None` when `first > last`.
    #[must_use]
    pub const fn new(first: u32, last: u32) -> Option<Self> {
        if first > last {
            return None;
        }
        Some(Self {
            first: TicketNumber(first),
            last: TicketNumber(last),
        })
    }

    /// Lowest ticket number in the range.
    #[must_use]
    pub const fn first(&self) -> TicketNumber {
        self.first
    }

    /// Highest ticket number in the range.
    #[must_use]
    pub const fn last(&self) -> TicketNumber {
        self.last
    }

    /// Whether `number` is part of the inventory.
    #[must_use]
    pub const fn contains(&self, number: TicketNumber) -> bool {
        number.0 >= self.first.0 && number.0 <= self.last.0
    }

    /// Number of tickets in the range.
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.last.0 - self.first.0) as usize + 1
    }

    /// A range always holds at least one ticket.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over every ticket number in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = TicketNumber> {
        (self.first.0..=self.last.0).map(TicketNumber)
    }
}

impl fmt::Display for TicketRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.first, self.last)
    }
}

/// A deduplicated, ascending set of ticket numbers.
///
/// Ascending order matters beyond display: stores lock ticket rows in this
/// order so two overlapping writers can never wait on each other in a cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketSet(BTreeSet<TicketNumber>);

impl TicketSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Builds a set from raw numbers, dropping duplicates.
    pub fn from_numbers(numbers: impl IntoIterator<Item = u32>) -> Self {
        numbers.into_iter().map(TicketNumber).collect()
    }

    /// Adds a number, returning `false` if it was already present.
    pub fn insert(&mut self, number: TicketNumber) -> bool {
        self.0.insert(number)
    }

    /// Number of distinct tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no tickets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `number` is in the set.
    #[must_use]
    pub fn contains(&self, number: TicketNumber) -> bool {
        self.0.contains(&number)
    }

    /// Iterate in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = TicketNumber> + '_ {
        self.0.iter().copied()
    }

    /// Raw numbers in ascending order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u32> {
        self.0.iter().map(|n| n.0).collect()
    }

    /// Numbers present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).copied().collect())
    }
}

impl FromIterator<TicketNumber> for TicketSet {
    fn from_iter<I: IntoIterator<Item = TicketNumber>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TicketSet {
    type Item = &'a TicketNumber;
    type IntoIter = std::collections::btree_set::Iter<'a, TicketNumber>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for TicketSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{joined}")
    }
}

// ============================================================================
// Identities and references
// ============================================================================

/// The verified buyer identity established upstream (opaque).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuyerId(String);

impl BuyerId {
    /// Wraps an identity string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identity is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for BuyerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to proof of payment, produced by an upstream upload step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRef(String);

impl EvidenceRef {
    /// Parses an optional reference; absent or blank values yield `None`.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let trimmed = raw?.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Borrow the reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ReservationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationId(Uuid);

impl AllocationId {
    /// Creates a new random `AllocationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `AllocationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AllocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Participant
// ============================================================================

/// Participant category declared with a purchase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantCategory {
    /// Anyone from the general public.
    GeneralPublic,
    /// Enrolled student; must present a control number.
    Student,
}

impl ParticipantCategory {
    /// Whether a control number is mandatory for this category.
    #[must_use]
    pub const fn requires_control_number(self) -> bool {
        matches!(self, Self::Student)
    }
}

/// Participant details carried with a purchase and stored on the allocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Display name
    pub name: String,
    /// Contact phone (optional)
    pub phone: Option<String>,
    /// Participant category
    pub category: ParticipantCategory,
    /// Campus the participant belongs to (optional)
    pub campus: Option<String>,
    /// Institutional control number (mandatory for students)
    pub control_number: Option<String>,
}

impl ParticipantInfo {
    /// A general-public participant with only a name.
    #[must_use]
    pub fn general(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: None,
            category: ParticipantCategory::GeneralPublic,
            campus: None,
            control_number: None,
        }
    }

    /// A student participant with a control number.
    #[must_use]
    pub fn student(name: impl Into<String>, control_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: None,
            category: ParticipantCategory::Student,
            campus: None,
            control_number: Some(control_number.into()),
        }
    }

    /// The control number, if present and not blank.
    #[must_use]
    pub fn control_number(&self) -> Option<&str> {
        self.control_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// A time-bounded, soft hold on ticket numbers for a single holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Identity holding the tickets
    pub holder: BuyerId,
    /// Held ticket numbers
    pub tickets: TicketSet,
    /// When the hold was (last) taken
    pub created_at: DateTime<Utc>,
    /// When the hold stops blocking others
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Active strictly before `expires_at`; at the expiry instant it is inert.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A single ticket's hold, as stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Held ticket
    pub number: TicketNumber,
    /// Reservation the hold belongs to
    pub reservation_id: ReservationId,
    /// Identity holding the ticket
    pub holder: BuyerId,
    /// When the hold was taken
    pub created_at: DateTime<Utc>,
    /// When the hold stops blocking others
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    /// Same rule as [`Reservation::is_active_at`].
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// ============================================================================
// Allocations
// ============================================================================

/// Lifecycle status of an allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    /// Not yet decided
    Pending,
    /// Sale committed; immutable from here on
    Confirmed,
    /// Attempt refused
    Rejected,
}

impl AllocationStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(StoreError::Corrupt(format!("Invalid allocation status: {s}"))),
        }
    }
}

/// Durable record binding a buyer to a set of tickets and a payment proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Allocation identifier
    pub id: AllocationId,
    /// Buyer identity
    pub buyer: BuyerId,
    /// Tickets sold under this allocation
    pub tickets: TicketSet,
    /// Participant details
    pub participant: ParticipantInfo,
    /// Proof of payment
    pub evidence: EvidenceRef,
    /// Lifecycle status
    pub status: AllocationStatus,
    /// When the allocation was recorded
    pub created_at: DateTime<Utc>,
}

/// Everything the store needs to commit a sale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAllocation {
    /// Pre-generated identifier
    pub id: AllocationId,
    /// Buyer identity
    pub buyer: BuyerId,
    /// Tickets to sell (validated, non-empty)
    pub tickets: TicketSet,
    /// Participant details
    pub participant: ParticipantInfo,
    /// Proof of payment
    pub evidence: EvidenceRef,
}

impl NewAllocation {
    /// The confirmed record this commit produces.
    #[must_use]
    pub fn confirmed_at(self, created_at: DateTime<Utc>) -> Allocation {
        Allocation {
            id: self.id,
            buyer: self.buyer,
            tickets: self.tickets,
            participant: self.participant,
            evidence: self.evidence,
            status: AllocationStatus::Confirmed,
            created_at,
        }
    }
}

/// A ticket permanently sold under a confirmed allocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoldTicket {
    /// The ticket
    pub number: TicketNumber,
    /// Allocation that owns it
    pub allocation_id: AllocationId,
    /// Buyer it was sold to
    pub buyer: BuyerId,
    /// Proof of payment
    pub evidence: EvidenceRef,
}

// ============================================================================
// Status
// ============================================================================

/// Publicly visible status of a ticket number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Free to claim
    Available,
    /// Held by an active reservation
    Reserved,
    /// Permanently sold
    Sold,
}

impl TicketStatus {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Sold => "sold",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One consistent read of sold tickets and active holds.
///
/// Stores only put *active* holds here, but consumers still never trust a
/// hold without checking it against their own clock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    /// Sold tickets by number
    pub sold: BTreeMap<TicketNumber, SoldTicket>,
    /// Holds by number
    pub holds: BTreeMap<TicketNumber, Hold>,
}

impl InventorySnapshot {
    /// Requested tickets that are already sold.
    #[must_use]
    pub fn sold_among(&self, tickets: &TicketSet) -> TicketSet {
        tickets
            .iter()
            .filter(|n| self.sold.contains_key(n))
            .collect()
    }

    /// Requested tickets held at `now` by anyone other than `holder`.
    #[must_use]
    pub fn held_by_others(
        &self,
        tickets: &TicketSet,
        holder: &BuyerId,
        now: DateTime<Utc>,
    ) -> TicketSet {
        tickets
            .iter()
            .filter(|n| {
                self.holds
                    .get(n)
                    .is_some_and(|hold| hold.is_active_at(now) && &hold.holder != holder)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Duration;

    #[test]
    fn ticket_set_deduplicates_and_orders() {
        let set = TicketSet::from_numbers([5, 3, 5, 1]);
        assert_eq!(set.to_vec(), vec![1, 3, 5]);
        assert_eq!(set.to_string(), "1, 3, 5");
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!(TicketRange::new(10, 1).is_none());
        let range = TicketRange::new(1, 10).unwrap();
        assert_eq!(range.len(), 10);
        assert!(range.contains(TicketNumber::new(10)));
        assert!(!range.contains(TicketNumber::new(11)));
        assert!(!range.contains(TicketNumber::new(0)));
    }

    #[test]
    fn evidence_blank_is_absent() {
        assert!(EvidenceRef::parse(None).is_none());
        assert!(EvidenceRef::parse(Some("   ")).is_none());
        assert_eq!(
            EvidenceRef::parse(Some(" receipts/abc.pdf ")).unwrap().as_str(),
            "receipts/abc.pdf"
        );
    }

    #[test]
    fn reservation_is_inert_at_expiry_instant() {
        let now = Utc::now();
        let reservation = Reservation {
            id: ReservationId::new(),
            holder: BuyerId::new("x@example.com"),
            tickets: TicketSet::from_numbers([1]),
            created_at: now,
            expires_at: now,
        };
        assert!(!reservation.is_active_at(now));
        assert!(!reservation.is_active_at(now + Duration::seconds(1)));
        assert!(reservation.is_active_at(now - Duration::milliseconds(1)));
    }

    #[test]
    fn status_round_trips_through_storage_names() {
        for status in [
            AllocationStatus::Pending,
            AllocationStatus::Confirmed,
            AllocationStatus::Rejected,
        ] {
            assert_eq!(AllocationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(matches!(
            AllocationStatus::parse("confirmado"),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn ticket_status_serializes_lowercase() {
        let json = serde_json::to_string(&TicketStatus::Available).unwrap();
        assert_eq!(json, "\"available\"");
    }

    #[test]
    fn student_control_number_must_not_be_blank() {
        let mut info = ParticipantInfo::student("Ana Torres", "  ");
        assert!(info.control_number().is_none());
        info.control_number = Some("19210456".to_string());
        assert_eq!(info.control_number(), Some("19210456"));
        assert!(info.category.requires_control_number());
    }

    #[test]
    fn held_by_others_ignores_own_and_expired_holds() {
        let now = Utc::now();
        let me = BuyerId::new("me");
        let other = BuyerId::new("other");
        let mut snapshot = InventorySnapshot::default();
        for (n, holder, ttl) in [(1, &me, 60), (2, &other, 60), (3, &other, 0)] {
            snapshot.holds.insert(
                TicketNumber::new(n),
                Hold {
                    number: TicketNumber::new(n),
                    reservation_id: ReservationId::new(),
                    holder: holder.clone(),
                    created_at: now,
                    expires_at: now + Duration::seconds(ttl),
                },
            );
        }
        let held = snapshot.held_by_others(&TicketSet::from_numbers([1, 2, 3]), &me, now);
        assert_eq!(held.to_vec(), vec![2]);
    }

    proptest::proptest! {
        #[test]
        fn ticket_set_is_sorted_and_unique(raw in proptest::collection::vec(0u32..500, 0..50)) {
            let set = TicketSet::from_numbers(raw.iter().copied());
            let values = set.to_vec();
            proptest::prop_assert!(values.windows(2).all(|w| w[0] < w[1]));
            for n in &raw {
                proptest::prop_assert!(set.contains(TicketNumber::new(*n)));
            }
        }

        #[test]
        fn intersection_only_keeps_shared_numbers(
            a in proptest::collection::btree_set(1u32..100, 0..20),
            b in proptest::collection::btree_set(1u32..100, 0..20),
        ) {
            let shared = TicketSet::from_numbers(a.iter().copied())
                .intersection(&TicketSet::from_numbers(b.iter().copied()));
            let expected: Vec<u32> = a.intersection(&b).copied().collect();
            proptest::prop_assert_eq!(shared.to_vec(), expected);
        }
    }
}
