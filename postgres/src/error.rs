//! Mapping from `sqlx` failures to [`StoreError`].

use raffle_core::{StoreError, TicketNumber, TicketSet};

/// SQLSTATE codes that mean "try again later": serialization failure,
/// deadlock detected, lock not available (`lock_timeout`), query cancelled
/// (`statement_timeout`).
const TRANSIENT_CODES: [&str; 4] = ["40001", "40P01", "55P03", "57014"];

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Name of the partial unique index on confirmed buyers.
pub(crate) const ONE_CONFIRMED_PER_BUYER: &str = "raffle_allocations_one_confirmed_per_buyer";

/// Name of the primary key on sold tickets.
pub(crate) const SOLD_TICKET_PKEY: &str = "raffle_sold_tickets_pkey";

/// Classify a `sqlx` error that has no domain meaning at the call site.
pub(crate) fn classify(error: &sqlx::Error, context: &str) -> StoreError {
    match error {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Corrupt(format!("{context}: {error}"))
        }
        sqlx::Error::Database(db) => {
            let code = db.code();
            if code.as_deref().is_some_and(|c| TRANSIENT_CODES.contains(&c)) {
                tracing::warn!(context, code = ?code, "Transient database failure");
            }
            StoreError::Unavailable(format!("{context}: {error}"))
        }
        _ => StoreError::Unavailable(format!("{context}: {error}")),
    }
}

/// The constraint behind a unique violation, if `error` is one.
pub(crate) fn unique_violation(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

/// Ticket numbers are stored as `INT4`.
pub(crate) fn to_db_numbers(tickets: &TicketSet) -> Result<Vec<i32>, StoreError> {
    tickets
        .iter()
        .map(|n| {
            i32::try_from(n.value()).map_err(|_| {
                StoreError::Corrupt(format!("Ticket number {n} does not fit in INT4"))
            })
        })
        .collect()
}

/// Inverse of [`to_db_numbers`] for a single stored value.
pub(crate) fn from_db_number(value: i32) -> Result<TicketNumber, StoreError> {
    u32::try_from(value)
        .map(TicketNumber::new)
        .map_err(|_| StoreError::Corrupt(format!("Negative ticket number in store: {value}")))
}

/// Decode a column of stored numbers into a set.
pub(crate) fn ticket_set(values: impl IntoIterator<Item = i32>) -> Result<TicketSet, StoreError> {
    values.into_iter().map(from_db_number).collect()
}

/// Tickets to name in a `Held` conflict.
///
/// `held` comes from a second read after the claim; a competing hold released
/// in between leaves it empty, in which case every unclaimed number is named.
pub(crate) fn blocking_tickets(
    requested: &[i32],
    claimed: &[i32],
    held: Vec<i32>,
) -> Result<TicketSet, StoreError> {
    if held.is_empty() {
        ticket_set(requested.iter().copied().filter(|n| !claimed.contains(n)))
    } else {
        ticket_set(held)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn negative_numbers_are_corrupt() {
        assert!(matches!(from_db_number(-1), Err(StoreError::Corrupt(_))));
        assert_eq!(from_db_number(7).unwrap(), TicketNumber::new(7));
    }

    #[test]
    fn oversized_numbers_do_not_reach_the_database() {
        let tickets = TicketSet::from_numbers([1, u32::MAX]);
        assert!(matches!(to_db_numbers(&tickets), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn pool_timeouts_are_unavailable() {
        let err = classify(&sqlx::Error::PoolTimedOut, "snapshot");
        assert!(err.is_retryable());
    }

    #[test]
    fn decode_failures_are_corrupt() {
        let err = classify(&sqlx::Error::ColumnNotFound("tickets".into()), "allocation");
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn held_conflict_names_the_competing_holds() {
        let tickets = blocking_tickets(&[3, 4, 5], &[3], vec![5]).unwrap();
        assert_eq!(tickets.to_vec(), vec![5]);
    }

    #[test]
    fn held_conflict_falls_back_to_unclaimed_numbers() {
        let tickets = blocking_tickets(&[3, 4, 5], &[3], Vec::new()).unwrap();
        assert_eq!(tickets.to_vec(), vec![4, 5]);
    }
}
