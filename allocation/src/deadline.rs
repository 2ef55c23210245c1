//! Bounded store calls.

use crate::error::{AllocationError, Result};
use raffle_core::StoreFuture;
use std::time::Duration;

/// Await `call` for at most `limit`.
///
/// An elapsed deadline drops the call, which for a transactional store rolls
/// back whatever it had written, and surfaces as
/// [`AllocationError::StorageUnavailable`].
pub(crate) async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    call: StoreFuture<'_, T>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            let err = AllocationError::from(e);
            if matches!(
                err,
                AllocationError::StorageUnavailable(_) | AllocationError::Corrupt(_)
            ) {
                tracing::error!(operation, error = %err, "Store call failed");
            }
            Err(err)
        }
        Err(_) => {
            tracing::error!(operation, ?limit, "Store call timed out");
            Err(AllocationError::StorageUnavailable(format!(
                "{operation} timed out after {limit:?}"
            )))
        }
    }
}
