use super::*;

/// A half-open event-time window `[start, end)`.
///
/// Windows are value objects: two windows with equal bounds are equal, and
/// they order by start, then end.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct TimeWindow {
    pub start: EventTime,
    pub end: EventTime,
}

impl TimeWindow {
    pub fn new(start: EventTime, end: EventTime) -> Self {
        Self { start, end }
    }

    pub fn size(&self) -> i64 {
        self.end - self.start
    }

    /// The maximum timestamp that belongs to this window.
    pub fn max_timestamp(&self) -> EventTime {
        self.end - 1
    }

    /// Return true if `timestamp` falls inside this window.
    pub fn contains(&self, timestamp: EventTime) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimeWindow([{}, {}))", self.start, self.end)
    }
}

/// Assigns one or more [`TimeWindow`]s to each element based on its
/// event-time timestamp.
pub trait WindowAssigner<T>: Send + Sync {
    /// Default trigger type for this assigner.
    type DefaultTrigger: Trigger<T> + Clone + Send + 'static;

    /// Return the windows that contain the element with the given timestamp.
    fn assign_windows(&self, element: &T, timestamp: EventTime) -> Vec<TimeWindow>;

    /// Create the default trigger for this assigner.
    fn default_trigger(&self) -> Self::DefaultTrigger;
}
