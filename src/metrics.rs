//! Connection metrics.

use metriken::{Counter, metric};

use crate::dialer::Destination;

/// Failed dials to a sentinel.
#[metric(
    name = "redis_errors",
    description = "Redis connection errors",
    metadata = { op = "dial", destination = "sentinel" }
)]
pub static SENTINEL_DIAL_ERRORS: Counter = Counter::new();

/// Failed dials to a data node.
#[metric(
    name = "redis_errors",
    description = "Redis connection errors",
    metadata = { op = "dial", destination = "redis" }
)]
pub static REDIS_DIAL_ERRORS: Counter = Counter::new();

/// No sentinel could report a master.
#[metric(
    name = "redis_errors",
    description = "Redis connection errors",
    metadata = { op = "master", destination = "sentinel" }
)]
pub static SENTINEL_MASTER_ERRORS: Counter = Counter::new();

/// Connections established to data nodes.
#[metric(
    name = "redis_total_connections",
    description = "Total connections established to redis data nodes"
)]
pub static TOTAL_CONNECTIONS: Counter = Counter::new();

/// The counters a dialer and its hooks write to.
///
/// Defaults to the registered globals; tests substitute their own.
#[derive(Clone, Copy)]
pub struct DialCounters {
    pub sentinel_dial_errors: &'static Counter,
    pub redis_dial_errors: &'static Counter,
    pub sentinel_master_errors: &'static Counter,
    pub total_connections: &'static Counter,
}

impl Default for DialCounters {
    fn default() -> Self {
        Self {
            sentinel_dial_errors: &SENTINEL_DIAL_ERRORS,
            redis_dial_errors: &REDIS_DIAL_ERRORS,
            sentinel_master_errors: &SENTINEL_MASTER_ERRORS,
            total_connections: &TOTAL_CONNECTIONS,
        }
    }
}

impl DialCounters {
    /// Fresh counters that are not registered for exposition. Each call leaks
    /// four counters, so use it for tests and short-lived tools only.
    pub fn detached() -> Self {
        fn leak() -> &'static Counter {
            Box::leak(Box::new(Counter::new()))
        }

        Self {
            sentinel_dial_errors: leak(),
            redis_dial_errors: leak(),
            sentinel_master_errors: leak(),
            total_connections: leak(),
        }
    }

    pub fn dial_errors(&self, destination: Destination) -> &'static Counter {
        match destination {
            Destination::Sentinel => self.sentinel_dial_errors,
            Destination::Redis => self.redis_dial_errors,
        }
    }
}
