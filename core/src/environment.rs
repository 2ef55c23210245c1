//! Injected dependencies shared by every component.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// Reservation expiry is decided purely by comparing `now()` with a stored
/// expiry instant, so every component that reads or writes holds takes its
/// notion of "now" from here rather than from the system directly.
///
/// # Examples
///
/// ```
/// use raffle_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let earlier = clock.now();
/// assert!(clock.now() >= earlier);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
