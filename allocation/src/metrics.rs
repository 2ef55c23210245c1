//! Business metrics for the raffle.
//!
//! Recording goes through the `metrics` facade and is a no-op until the host
//! installs a recorder (the demo binary installs the Prometheus one).
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `raffle_allocations_total{outcome}` - Allocation attempts by outcome
//! - `raffle_holds_total{outcome}` - Hold attempts by outcome
//! - `raffle_tickets_sold_total` - Tickets sold
//! - `raffle_reservations_released_total` - Holds released early by their holder
//! - `raffle_reservations_reclaimed_total` - Expired holds purged
//!
//! ## Histograms
//! - `raffle_commit_duration_seconds` - Atomic commit latency

use metrics::{describe_counter, describe_histogram};

/// Initialize and register all metric descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_allocation_metrics() {
    describe_counter!(
        "raffle_allocations_total",
        "Total allocation attempts by outcome (confirmed, replayed, or an error kind)"
    );
    describe_counter!(
        "raffle_holds_total",
        "Total hold attempts by outcome (held, or an error kind)"
    );
    describe_counter!("raffle_tickets_sold_total", "Total number of tickets sold");
    describe_counter!(
        "raffle_reservations_released_total",
        "Holds released early by their holder"
    );
    describe_counter!(
        "raffle_reservations_reclaimed_total",
        "Expired holds purged by housekeeping"
    );
    describe_histogram!(
        "raffle_commit_duration_seconds",
        "Time taken by the atomic allocation commit"
    );

    tracing::info!("Allocation metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record the outcome of an allocation attempt.
pub fn record_allocation(outcome: &'static str) {
    metrics::counter!("raffle_allocations_total", "outcome" => outcome).increment(1);
}

/// Record the outcome of a hold attempt.
pub fn record_hold(outcome: &'static str) {
    metrics::counter!("raffle_holds_total", "outcome" => outcome).increment(1);
}

/// Record a committed sale.
///
/// # Arguments
///
/// * `quantity` - Number of tickets sold
/// * `duration_secs` - Commit latency in seconds
pub fn record_sale(quantity: usize, duration_secs: f64) {
    metrics::counter!("raffle_tickets_sold_total").increment(quantity as u64);
    metrics::histogram!("raffle_commit_duration_seconds").record(duration_secs);
    tracing::debug!(quantity, duration_secs, "Recorded sale metric");
}

/// Record holds released by their holder.
pub fn record_released(count: usize) {
    metrics::counter!("raffle_reservations_released_total").increment(count as u64);
}

/// Record expired holds purged by housekeeping.
pub fn record_reclaimed(count: usize) {
    metrics::counter!("raffle_reservations_reclaimed_total").increment(count as u64);
}
