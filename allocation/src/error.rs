//! Error types for ticket allocation.
//!
//! Every failure reaching a caller carries enough structure (a stable kind
//! and, where it applies, the offending ticket numbers) to render a precise
//! message. Conflicts are terminal for the attempt; only
//! [`AllocationError::StorageUnavailable`] is worth retrying unchanged.

use raffle_core::{BuyerId, StoreError, TicketRange, TicketSet};
use thiserror::Error;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AllocationError>;

/// A malformed request, rejected before any inventory access.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Too few or too many tickets requested.
    #[error("Requested {requested} tickets; between {min} and {max} are allowed")]
    TicketCount {
        /// How many were requested
        requested: usize,
        /// Fewest allowed
        min: usize,
        /// Most allowed
        max: usize,
    },

    /// Some numbers are outside the configured inventory.
    #[error("Tickets {tickets} are outside {range}")]
    OutOfRange {
        /// Numbers outside the range
        tickets: TicketSet,
        /// The configured range
        range: TicketRange,
    },

    /// The request names a ticket more than once.
    #[error("Tickets requested more than once: {tickets}")]
    DuplicateTickets {
        /// Repeated numbers
        tickets: TicketSet,
    },

    /// Students must present a control number.
    #[error("A control number is required for students")]
    ControlNumberRequired,

    /// Participant name is too short.
    #[error("Participant name must be at least {min} characters")]
    NameTooShort {
        /// Minimum length
        min: usize,
    },

    /// No buyer identity was supplied.
    #[error("Buyer identity is empty")]
    EmptyIdentity,
}

/// Errors returned by the inventory, ledger and orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// The request is malformed.
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Some requested tickets are already sold.
    #[error("Tickets already sold: {tickets}")]
    AlreadySold {
        /// The sold tickets among those requested
        tickets: TicketSet,
    },

    /// Some requested tickets are held by another buyer.
    #[error("Tickets reserved by another buyer: {tickets}")]
    AlreadyReserved {
        /// The tickets held by someone else
        tickets: TicketSet,
    },

    /// The identity already owns a confirmed allocation.
    #[error("{buyer} already has a confirmed allocation")]
    DuplicateIdentity {
        /// The buyer
        buyer: BuyerId,
    },

    /// No proof of payment was supplied.
    #[error("Proof of payment is missing")]
    EvidenceMissing,

    /// The store failed or timed out; nothing was committed.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Stored data could not be decoded.
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

impl AllocationError {
    /// Stable `snake_case` tag, used as the metrics `outcome` label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::AlreadySold { .. } => "already_sold",
            Self::AlreadyReserved { .. } => "already_reserved",
            Self::DuplicateIdentity { .. } => "duplicate_identity",
            Self::EvidenceMissing => "evidence_missing",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::Corrupt(_) => "corrupt",
        }
    }

    /// Whether resubmitting the same request can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Whether another claimant owns some of the requested tickets.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadySold { .. } | Self::AlreadyReserved { .. } | Self::DuplicateIdentity { .. }
        )
    }

    /// The offending ticket numbers, where the error names any.
    #[must_use]
    pub const fn tickets(&self) -> Option<&TicketSet> {
        match self {
            Self::AlreadySold { tickets }
            | Self::AlreadyReserved { tickets }
            | Self::Validation(
                ValidationError::OutOfRange { tickets, .. }
                | ValidationError::DuplicateTickets { tickets },
            ) => Some(tickets),
            _ => None,
        }
    }
}

impl From<StoreError> for AllocationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Sold { tickets } => Self::AlreadySold { tickets },
            StoreError::Held { tickets } => Self::AlreadyReserved { tickets },
            StoreError::DuplicateBuyer { buyer } => Self::DuplicateIdentity { buyer },
            StoreError::Unavailable(msg) => Self::StorageUnavailable(msg),
            StoreError::Corrupt(msg) => Self::Corrupt(msg),
        }
    }
}
