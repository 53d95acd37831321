//! Metric names recorded by push streams.

/// Push streams finished (counter, labels: `outcome`).
pub const PUSH_STREAMS_TOTAL: &str = "push_streams_total";
/// Events written to push streams (counter).
pub const PUSH_EVENTS_TOTAL: &str = "push_events_total";
/// Currently open push streams (gauge).
pub const PUSH_STREAMS_ACTIVE: &str = "push_streams_active";
