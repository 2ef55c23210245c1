//! Request shape checks. None of these touch the store.

use crate::config::AllocationPolicy;
use crate::error::ValidationError;
use raffle_core::{BuyerId, ParticipantInfo, TicketNumber, TicketSet};

pub(crate) fn check_identity(buyer: &BuyerId) -> Result<(), ValidationError> {
    if buyer.is_blank() {
        return Err(ValidationError::EmptyIdentity);
    }
    Ok(())
}

/// Count and range checks for an already deduplicated set.
pub(crate) fn check_ticket_set(
    policy: &AllocationPolicy,
    tickets: &TicketSet,
) -> Result<(), ValidationError> {
    check_count(policy, tickets.len())?;
    check_range(policy, tickets)
}

/// Turn a raw request into a set, refusing repeated numbers.
pub(crate) fn ticket_set_from_request(
    policy: &AllocationPolicy,
    requested: &[TicketNumber],
) -> Result<TicketSet, ValidationError> {
    check_count(policy, requested.len())?;

    let mut tickets = TicketSet::new();
    let mut repeated = TicketSet::new();
    for &number in requested {
        if !tickets.insert(number) {
            repeated.insert(number);
        }
    }
    if !repeated.is_empty() {
        return Err(ValidationError::DuplicateTickets { tickets: repeated });
    }

    check_range(policy, &tickets)?;
    Ok(tickets)
}

pub(crate) fn check_participant(
    policy: &AllocationPolicy,
    participant: &ParticipantInfo,
) -> Result<(), ValidationError> {
    if participant.name.trim().chars().count() < policy.min_name_len {
        return Err(ValidationError::NameTooShort {
            min: policy.min_name_len,
        });
    }
    if participant.category.requires_control_number() && participant.control_number().is_none() {
        return Err(ValidationError::ControlNumberRequired);
    }
    Ok(())
}

const fn check_count(policy: &AllocationPolicy, requested: usize) -> Result<(), ValidationError> {
    if requested < policy.min_tickets || requested > policy.max_tickets {
        return Err(ValidationError::TicketCount {
            requested,
            min: policy.min_tickets,
            max: policy.max_tickets,
        });
    }
    Ok(())
}

fn check_range(policy: &AllocationPolicy, tickets: &TicketSet) -> Result<(), ValidationError> {
    let outside: TicketSet = tickets
        .iter()
        .filter(|n| !policy.range.contains(*n))
        .collect();
    if !outside.is_empty() {
        return Err(ValidationError::OutOfRange {
            tickets: outside,
            range: policy.range,
        });
    }
    Ok(())
}
