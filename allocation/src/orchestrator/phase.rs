//! Allocation attempt state machine.

use crate::error::AllocationError;
use raffle_core::{AllocationStatus, BuyerId, TicketSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Phase of a single allocation attempt.
///
/// ```text
/// Requested -> Validating -> Reserved -> AwaitingEvidence -> Confirmed
///     \______________\___________\______________\_________-> Rejected
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPhase {
    /// Request received
    Requested,
    /// Shape, identity and conflict checks running
    Validating,
    /// Every requested ticket is free or held by this buyer
    Reserved,
    /// Waiting on the proof of payment gate
    AwaitingEvidence,
    /// Sale committed
    Confirmed,
    /// Attempt refused
    Rejected,
}

impl AllocationPhase {
    /// Stable `snake_case` name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Validating => "validating",
            Self::Reserved => "reserved",
            Self::AwaitingEvidence => "awaiting_evidence",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }

    /// `Confirmed` and `Rejected` end the attempt.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected)
    }

    /// Whether `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Requested, Self::Validating)
            | (Self::Validating, Self::Reserved)
            | (Self::Reserved, Self::AwaitingEvidence)
            | (Self::AwaitingEvidence, Self::Confirmed) => true,
            (from, Self::Rejected) => !from.is_terminal(),
            _ => false,
        }
    }

    /// The allocation status this phase reports.
    #[must_use]
    pub const fn status(self) -> AllocationStatus {
        match self {
            Self::Confirmed => AllocationStatus::Confirmed,
            Self::Rejected => AllocationStatus::Rejected,
            _ => AllocationStatus::Pending,
        }
    }
}

impl fmt::Display for AllocationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The trail of one attempt through the phases.
#[derive(Clone, Debug)]
pub struct AllocationAttempt {
    buyer: BuyerId,
    tickets: TicketSet,
    trail: SmallVec<[AllocationPhase; 6]>,
    rejection: Option<&'static str>,
}

impl AllocationAttempt {
    /// Start an attempt in `Requested`.
    #[must_use]
    pub fn new(buyer: BuyerId, tickets: TicketSet) -> Self {
        let mut trail = SmallVec::new();
        trail.push(AllocationPhase::Requested);
        Self {
            buyer,
            tickets,
            trail,
            rejection: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> AllocationPhase {
        self.trail
            .last()
            .copied()
            .unwrap_or(AllocationPhase::Requested)
    }

    /// Every phase visited, oldest first.
    #[must_use]
    pub fn trail(&self) -> &[AllocationPhase] {
        &self.trail
    }

    /// Status implied by the current phase.
    #[must_use]
    pub fn status(&self) -> AllocationStatus {
        self.phase().status()
    }

    /// Error kind that rejected the attempt, if it was rejected.
    #[must_use]
    pub const fn rejection(&self) -> Option<&'static str> {
        self.rejection
    }

    /// Buyer the attempt is for.
    #[must_use]
    pub const fn buyer(&self) -> &BuyerId {
        &self.buyer
    }

    /// Tickets the attempt is for (empty until the request validated).
    #[must_use]
    pub const fn tickets(&self) -> &TicketSet {
        &self.tickets
    }

    pub(crate) fn set_tickets(&mut self, tickets: TicketSet) {
        self.tickets = tickets;
    }

    /// Move to `next`. Returns `false` and stays put on an illegal edge.
    pub fn advance(&mut self, next: AllocationPhase) -> bool {
        let current = self.phase();
        if !current.can_transition_to(next) {
            tracing::error!(from = %current, to = %next, buyer = %self.buyer, "Illegal allocation transition");
            return false;
        }
        self.trail.push(next);
        true
    }

    /// Reject the attempt with `error`.
    pub fn reject(&mut self, error: &AllocationError) {
        if self.advance(AllocationPhase::Rejected) {
            self.rejection = Some(error.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AllocationPhase::{AwaitingEvidence, Confirmed, Rejected, Requested, Reserved, Validating};

    const ALL: [AllocationPhase; 6] = [
        Requested,
        Validating,
        Reserved,
        AwaitingEvidence,
        Confirmed,
        Rejected,
    ];

    #[test]
    fn happy_path_edges_are_legal() {
        assert!(Requested.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Reserved));
        assert!(Reserved.can_transition_to(AwaitingEvidence));
        assert!(AwaitingEvidence.can_transition_to(Confirmed));
    }

    #[test]
    fn rejection_is_reachable_from_every_open_phase() {
        for phase in ALL {
            assert_eq!(phase.can_transition_to(Rejected), !phase.is_terminal(), "{phase}");
        }
    }

    #[test]
    fn terminal_phases_have_no_exits() {
        for next in ALL {
            assert!(!Confirmed.can_transition_to(next));
            assert!(!Rejected.can_transition_to(next));
        }
    }

    #[test]
    fn phases_cannot_be_skipped() {
        assert!(!Requested.can_transition_to(Confirmed));
        assert!(!Validating.can_transition_to(AwaitingEvidence));
        assert!(!Reserved.can_transition_to(Confirmed));
    }

    #[test]
    fn attempt_records_its_trail_and_status() {
        let mut attempt = AllocationAttempt::new(BuyerId::new("x"), TicketSet::from_numbers([1]));
        assert_eq!(attempt.status(), AllocationStatus::Pending);

        assert!(attempt.advance(Validating));
        assert!(!attempt.advance(Confirmed));
        attempt.reject(&AllocationError::EvidenceMissing);

        assert_eq!(attempt.trail(), &[Requested, Validating, Rejected]);
        assert_eq!(attempt.status(), AllocationStatus::Rejected);
        assert_eq!(attempt.rejection(), Some("evidence_missing"));
    }
}
