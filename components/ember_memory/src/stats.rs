//! Collector statistics exposed to hosts.

use serde::Serialize;

/// Cumulative and current collector statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GcStats {
    /// Bytes currently attributed to live heap objects
    pub bytes_allocated: usize,
    /// Total bytes reclaimed across all collections
    pub bytes_freed: usize,
    /// Collections run so far
    pub gc_runs: u64,
    /// Total time spent collecting, in milliseconds
    pub gc_time_ms: u64,
    /// Objects that survived the most recent collection
    pub live_objects: usize,
    /// Objects reclaimed by the most recent collection
    pub dead_objects: usize,
}
