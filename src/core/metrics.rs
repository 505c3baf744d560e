// src/core/metrics.rs

//! Defines and registers Prometheus metrics for controller monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the process lifetime. Not a [MODULE] spec.md names —
//! carried as the ambient observability stack regardless (SPEC_FULL.md §A.1/B).

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_gauge_vec,
};

lazy_static! {
    /// 1 while this replica holds the distributed lock (spec.md §4.A), 0 otherwise.
    pub static ref LOCK_HELD: Gauge =
        register_gauge!("rustpm_controller_lock_held", "1 if this replica holds the director lock.").unwrap();

    /// Number of servers currently in each `StateKind`.
    pub static ref SERVERS_BY_STATE: GaugeVec =
        register_gauge_vec!("rustpm_controller_servers_by_state", "Number of servers, labeled by state.", &["state"]).unwrap();

    /// Number of cron entries currently scheduled by the director
    /// (spec.md §8: `|active events| + 1`).
    pub static ref SCHEDULED_CRON_ENTRIES: Gauge =
        register_gauge!("rustpm_controller_scheduled_cron_entries", "Number of cron entries currently scheduled.").unwrap();

    /// Total RCON commands issued, labeled by method and outcome
    /// (`success`, `idempotent`, `error`).
    pub static ref RCON_COMMANDS_TOTAL: CounterVec =
        register_counter_vec!("rustpm_controller_rcon_commands_total", "RCON commands issued, labeled by method and outcome.", &["method", "outcome"]).unwrap();

    /// Total wipes applied at server start (spec.md §4.G step 7).
    pub static ref WIPES_APPLIED_TOTAL: Counter =
        register_counter!("rustpm_controller_wipes_applied_total", "Total wipes marked applied.").unwrap();

    /// Total billing events processed by the event-stream handler, labeled
    /// by `kind` (spec.md §4.I).
    pub static ref BILLING_EVENTS_TOTAL: CounterVec =
        register_counter_vec!("rustpm_controller_billing_events_total", "Billing events processed, labeled by kind.", &["kind"]).unwrap();

    /// Total cron-fired director dispatches, labeled by event kind and outcome.
    pub static ref DIRECTOR_DISPATCH_TOTAL: CounterVec =
        register_counter_vec!("rustpm_controller_director_dispatch_total", "Director dispatches, labeled by event kind and outcome.", &["kind", "outcome"]).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
