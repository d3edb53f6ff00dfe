//! Merge counters.

use serde::Serialize;

/// Running totals kept by the engine and driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub fragments_received: u64,
    /// Fragments appended to an already open line.
    pub fragments_merged: u64,
    /// Queue entries dropped because they could not be decoded.
    pub fragments_dropped: u64,
    pub threads_opened: u64,
    pub lines_finalized: u64,
    pub idle_finalizations: u64,
    pub enrichment_failures: u64,
    pub sink_write_failures: u64,
    pub queue_read_failures: u64,
}
