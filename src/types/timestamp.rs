//! Wall-clock timestamps carried on operations and metric samples.

use serde::{Deserialize, Serialize};

/// A point in time as seconds and nanoseconds since the Unix epoch.
///
/// Totally ordered, so merge logic can widen `[start, end]` windows with
/// plain comparisons. Callers stamp these; the client never reads the
/// system clock to produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    /// Create a timestamp from whole seconds.
    pub fn from_seconds(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }

    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }
}

/// Widen `target` downward: keep the earlier of the two starts.
///
/// An absent timestamp is dominated by any present one.
pub(crate) fn merge_start_time(from: Option<Timestamp>, target: &mut Option<Timestamp>) {
    if let Some(from) = from {
        match target {
            Some(existing) if *existing <= from => {}
            _ => *target = Some(from),
        }
    }
}

/// Widen `target` upward: keep the later of the two ends.
pub(crate) fn merge_end_time(from: Option<Timestamp>, target: &mut Option<Timestamp>) {
    if let Some(from) = from {
        match target {
            Some(existing) if *existing >= from => {}
            _ => *target = Some(from),
        }
    }
}
