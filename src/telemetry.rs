//! Telemetry metric name constants.
//!
//! Centralised metric names for databox operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `databox_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `key` — the box key the operation ran for
//! - `tier` — local source name (e.g. "memory", "disk")

/// Total local-source hits that were present and valid.
///
/// Labels: `key`, `tier`.
pub const CACHE_HITS_TOTAL: &str = "databox_cache_hits_total";

/// Total local-source misses (absent, invalid, or unreadable).
///
/// Labels: `key`, `tier`.
pub const CACHE_MISSES_TOTAL: &str = "databox_cache_misses_total";

/// Total present-but-invalid entries actively cleared from a tier.
///
/// Labels: `key`, `tier`.
pub const STALE_EVICTIONS_TOTAL: &str = "databox_stale_evictions_total";

/// Total remote fetch attempts, including retries.
///
/// Labels: `key`.
pub const FETCHES_TOTAL: &str = "databox_fetches_total";

/// Total retry attempts (not counting the initial fetch).
///
/// Labels: `key`.
pub const RETRIES_TOTAL: &str = "databox_retries_total";

/// Total calls that joined an already-running shared fetch.
///
/// Labels: `key`.
pub const INFLIGHT_JOINS_TOTAL: &str = "databox_inflight_joins_total";
