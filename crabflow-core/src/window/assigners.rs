use super::*;

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn start_of(timestamp: EventTime, offset: i64, slide: i64) -> EventTime {
    // rem_euclid keeps negative timestamps aligned to the same grid; i128
    // avoids overflow near the ends of the timestamp range.
    let rem = (i128::from(timestamp) - i128::from(offset)).rem_euclid(i128::from(slide));
    // rem < slide, so it fits.
    timestamp.saturating_sub(i64::try_from(rem).unwrap_or(slide))
}

/// The tumbling window of `size` milliseconds containing `timestamp`.
///
/// `start <= timestamp < start + size`, and `start` is a multiple of `size`.
pub fn assign_tumbling(timestamp: EventTime, size: i64) -> Result<TimeWindow, WindowError> {
    Ok(TumblingEventTimeWindows::of_millis(size)?.window_for(timestamp))
}

// ── Tumbling ──────────────────────────────────────────────────────────────────

/// Fixed-size, non-overlapping event-time windows aligned to multiples of `size`.
#[derive(Debug, Clone, Copy)]
pub struct TumblingEventTimeWindows {
    size_ms: i64,
    offset_ms: i64,
}

impl TumblingEventTimeWindows {
    /// Create tumbling windows of the given `size`.
    pub fn of(size: Duration) -> Result<Self, WindowError> {
        Self::of_millis(millis(size))
    }

    pub fn of_millis(size_ms: i64) -> Result<Self, WindowError> {
        if size_ms <= 0 {
            return Err(WindowError::InvalidSize(size_ms));
        }
        Ok(Self {
            size_ms,
            offset_ms: 0,
        })
    }

    /// Shift window alignment by `offset`, e.g. to align daily windows to a
    /// time zone.
    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset_ms = millis(offset) % self.size_ms;
        self
    }

    pub fn size_ms(&self) -> i64 {
        self.size_ms
    }

    /// The single window containing `timestamp`.
    pub fn window_for(&self, timestamp: EventTime) -> TimeWindow {
        let start = start_of(timestamp, self.offset_ms, self.size_ms);
        TimeWindow::new(start, start.saturating_add(self.size_ms))
    }
}

impl<T: Send + Sync> WindowAssigner<T> for TumblingEventTimeWindows {
    type DefaultTrigger = EventTimeTrigger;

    fn assign_windows(&self, _element: &T, timestamp: EventTime) -> Vec<TimeWindow> {
        vec![self.window_for(timestamp)]
    }

    fn default_trigger(&self) -> Self::DefaultTrigger {
        EventTimeTrigger
    }
}

// ── Sliding ───────────────────────────────────────────────────────────────────

/// Fixed-size, possibly overlapping event-time windows.
/// An element belongs to `ceil(size / slide)` windows.
#[derive(Debug, Clone, Copy)]
pub struct SlidingEventTimeWindows {
    size_ms: i64,
    slide_ms: i64,
}

impl SlidingEventTimeWindows {
    /// Create sliding windows of the given `size` advancing every `slide`.
    pub fn of(size: Duration, slide: Duration) -> Result<Self, WindowError> {
        Self::of_millis(millis(size), millis(slide))
    }

    pub fn of_millis(size_ms: i64, slide_ms: i64) -> Result<Self, WindowError> {
        if size_ms <= 0 {
            return Err(WindowError::InvalidSize(size_ms));
        }
        if slide_ms <= 0 {
            return Err(WindowError::InvalidSlide(slide_ms));
        }
        Ok(Self { size_ms, slide_ms })
    }
}

impl<T: Send + Sync> WindowAssigner<T> for SlidingEventTimeWindows {
    type DefaultTrigger = EventTimeTrigger;

    fn assign_windows(&self, _element: &T, timestamp: EventTime) -> Vec<TimeWindow> {
        // Walk back from the last window start until no window covers ts.
        let mut windows = Vec::new();
        let mut start = start_of(timestamp, 0, self.slide_ms);
        while start.saturating_add(self.size_ms) > timestamp {
            windows.push(TimeWindow::new(start, start.saturating_add(self.size_ms)));
            match start.checked_sub(self.slide_ms) {
                Some(previous) => start = previous,
                None => break,
            }
        }
        windows
    }

    fn default_trigger(&self) -> Self::DefaultTrigger {
        EventTimeTrigger
    }
}
