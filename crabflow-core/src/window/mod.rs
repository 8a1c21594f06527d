//! Event-time windows: assigners, triggers and a per-window element buffer.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::error::WindowError;
use crate::time::EVENT_TIME_MIN;
use crate::types::EventTime;

mod assigners;
mod buffer;
mod primitives;
mod triggers;

pub use assigners::*;
pub use buffer::*;
pub use primitives::*;
pub use triggers::*;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
