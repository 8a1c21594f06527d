use serde::{Deserialize, Serialize};

/// Event time in milliseconds since epoch.
pub type EventTime = i64;

/// A record in the stream, carrying user data, optional event time and the
/// partition tag assigned by an upstream keying stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRecord<T> {
    pub value: T,
    pub timestamp: Option<EventTime>,
    pub partition_tag: Option<u64>,
}

impl<T> StreamRecord<T> {
    /// Create a record with no event time and no partition tag.
    pub fn new(value: T) -> Self {
        Self {
            value,
            timestamp: None,
            partition_tag: None,
        }
    }

    /// Create a record with an explicit event time.
    pub fn with_timestamp(value: T, timestamp: EventTime) -> Self {
        Self {
            value,
            timestamp: Some(timestamp),
            partition_tag: None,
        }
    }

    /// Attach a precomputed partition tag, consumed by forward routing.
    pub fn tagged(mut self, tag: u64) -> Self {
        self.partition_tag = Some(tag);
        self
    }
}

/// Watermark indicates that no elements with timestamp <= this value will arrive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    pub timestamp: EventTime,
}

impl Watermark {
    /// Create a new watermark at the given timestamp.
    pub fn new(timestamp: EventTime) -> Self {
        Self { timestamp }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Watermark({}ms)", self.timestamp)
    }
}

/// The unit carried by a channel: user records and event-time progress.
///
/// End of stream is not an element; it is a channel state reached when the
/// writing side closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StreamElement<T> {
    /// User data record.
    Record(StreamRecord<T>),
    /// Watermark for event time progress tracking.
    Watermark(Watermark),
}

impl<T> StreamElement<T> {
    /// Create a record element with no timestamp.
    pub fn record(value: T) -> Self {
        Self::Record(StreamRecord::new(value))
    }

    /// Create a record element with a timestamp.
    pub fn timestamped_record(value: T, timestamp: EventTime) -> Self {
        Self::Record(StreamRecord::with_timestamp(value, timestamp))
    }

    /// Create a watermark element.
    pub fn watermark(timestamp: EventTime) -> Self {
        Self::Watermark(Watermark::new(timestamp))
    }

    /// Borrow the record, if this element is one.
    pub fn as_record(&self) -> Option<&StreamRecord<T>> {
        match self {
            Self::Record(record) => Some(record),
            Self::Watermark(_) => None,
        }
    }

    /// Take the record value out, if this element is one.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Record(record) => Some(record.value),
            Self::Watermark(_) => None,
        }
    }
}

/// Trait bound for types that can flow through the stream.
/// All user data types must satisfy this.
pub trait StreamData: Send + Clone + 'static {}

// Blanket implementation: any type satisfying the bounds is StreamData.
impl<T> StreamData for T where T: Send + Clone + 'static {}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
