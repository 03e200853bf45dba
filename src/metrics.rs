//! Prometheus metrics for lease coordination and throughput control.
//!
//! Metrics cover:
//! - Lease operations (creation by gone handlers, checkpoints, deletions)
//! - Gone handling (split/merge decisions and failures)
//! - Controller cache performance (hits, misses)
//! - Throughput control (admitted and throttled requests per group)
//!
//! # Safety
//!
//! All metrics are registered to a custom registry with the "feedlease" prefix
//! to avoid name collisions with other libraries using the default Prometheus
//! registry. If a metric fails to register, an unregistered fallback is used
//! instead of panicking.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Registry, TextEncoder, opts};
use tracing::warn;

/// Custom Prometheus registry for feedlease metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("feedlease".to_string()), None).unwrap_or_else(|_| Registry::new())
});

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

// =============================================================================
// Lease metrics
// =============================================================================

define_counter_vec!(
    LEASE_OPERATIONS,
    "lease_operations_total",
    "Total number of lease operations",
    ["operation", "status"]
);

define_counter_vec!(
    GONE_HANDLED,
    "partition_gone_total",
    "Partition gone signals handled, by handler and decision",
    ["handler", "decision"]
);

// =============================================================================
// Cache metrics
// =============================================================================

define_counter_vec!(
    CACHE_OPERATIONS,
    "cache_operations_total",
    "Total async cache lookup operations",
    ["result"]
);

// =============================================================================
// Throughput control metrics
// =============================================================================

define_counter_vec!(
    THROUGHPUT_REQUESTS,
    "throughput_requests_total",
    "Requests processed by throughput-control groups",
    ["group", "status"]
);

/// Render all metrics in the Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Register an IntCounterVec safely, returning a fallback on error.
fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(
                name,
                error = %e,
                "Failed to register IntCounterVec metric, using unregistered fallback"
            );
            counter
        }
    }
}
