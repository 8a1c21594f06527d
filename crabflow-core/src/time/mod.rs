//! Event-time progress across the channels of one input gate.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::types::{EventTime, Watermark};

mod tracker;

pub use tracker::*;

/// Minimum possible event time. Used as the initial "no watermark" sentinel.
pub const EVENT_TIME_MIN: EventTime = i64::MIN;

/// Maximum possible event time. Reached once every input has finished.
pub const EVENT_TIME_MAX: EventTime = i64::MAX;

#[cfg(test)]
#[path = "tests/time_tests.rs"]
mod tests;
