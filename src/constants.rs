//! Centralized keyspace and configuration constants.
//!
//! # Categories
//!
//! - **Keyspace Constants**: Bounds of the effective partition key space
//! - **Processor Constants**: Change feed consumption defaults
//! - **Throughput Constants**: Throughput-control defaults

// =============================================================================
// Keyspace Constants
// =============================================================================

/// Minimum inclusive effective partition key.
///
/// Effective partition keys are upper-case hexadecimal strings compared
/// lexicographically, so the empty string sorts before every other key.
pub const MIN_EPK: &str = "";

/// Maximum exclusive effective partition key.
pub const MAX_EPK: &str = "FF";

// =============================================================================
// Processor Constants
// =============================================================================

/// Default maximum number of changes requested per read.
pub const DEFAULT_MAX_ITEM_COUNT: usize = 100;

/// Default delay before polling again after an empty read (milliseconds).
pub const DEFAULT_FEED_POLL_DELAY_MS: u64 = 5_000;

/// Default maximum number of leases a single processor instance may own.
///
/// Zero disables the limit, which lets gone handlers hand successor leases
/// straight to the current worker.
pub const DEFAULT_MAX_SCALE_COUNT: usize = 0;

// =============================================================================
// Throughput Constants
// =============================================================================

/// Default length of a throughput-control cycle (milliseconds).
///
/// Group budgets are refilled at the start of each cycle.
pub const DEFAULT_THROUGHPUT_CYCLE_MS: u64 = 1_000;

/// Default maximum number of group controllers kept in the controller cache.
pub const DEFAULT_CONTROLLER_CACHE_CAPACITY: u64 = 1_024;
