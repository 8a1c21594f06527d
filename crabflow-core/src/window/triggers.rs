use super::*;

/// The result returned by a [`Trigger`] to control window evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// Keep accumulating elements; do not fire the window yet.
    Continue,
    /// Emit the window contents; keep the window state.
    Fire,
    /// Discard window state without emitting anything.
    Purge,
    /// Emit the window contents, then discard state.
    FireAndPurge,
}

impl TriggerResult {
    pub fn is_fire(self) -> bool {
        matches!(self, TriggerResult::Fire | TriggerResult::FireAndPurge)
    }

    pub fn is_purge(self) -> bool {
        matches!(self, TriggerResult::Purge | TriggerResult::FireAndPurge)
    }
}

/// Decides when a window fires and when its state is discarded.
///
/// Current time is supplied from outside, usually by watermark progress.
pub trait Trigger<T>: Send {
    /// Called for every element assigned to a window.
    fn on_element(
        &mut self,
        element: &T,
        timestamp: EventTime,
        window: &TimeWindow,
    ) -> TriggerResult;

    /// Called when current event time advances.
    fn on_event_time(&mut self, time: EventTime, window: &TimeWindow) -> TriggerResult;
}

/// The default trigger for event-time windowing.
///
/// Fires and purges once current time reaches or passes the window's end.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTimeTrigger;

impl<T> Trigger<T> for EventTimeTrigger {
    fn on_element(
        &mut self,
        _element: &T,
        _timestamp: EventTime,
        _window: &TimeWindow,
    ) -> TriggerResult {
        // The watermark drives firing.
        TriggerResult::Continue
    }

    fn on_event_time(&mut self, time: EventTime, window: &TimeWindow) -> TriggerResult {
        if time >= window.end {
            TriggerResult::FireAndPurge
        } else {
            TriggerResult::Continue
        }
    }
}

/// Fires (without purging) every `count` elements, then fires and purges at
/// the end of the window like [`EventTimeTrigger`].
#[derive(Debug, Clone)]
pub struct CountTrigger {
    count: usize,
    seen: BTreeMap<TimeWindow, usize>,
}

impl CountTrigger {
    pub fn every(count: usize) -> Self {
        Self {
            count: count.max(1),
            seen: BTreeMap::new(),
        }
    }
}

impl<T> Trigger<T> for CountTrigger {
    fn on_element(
        &mut self,
        _element: &T,
        _timestamp: EventTime,
        window: &TimeWindow,
    ) -> TriggerResult {
        let seen = self.seen.entry(*window).or_insert(0);
        *seen += 1;
        if *seen % self.count == 0 {
            TriggerResult::Fire
        } else {
            TriggerResult::Continue
        }
    }

    fn on_event_time(&mut self, time: EventTime, window: &TimeWindow) -> TriggerResult {
        if time >= window.end {
            self.seen.remove(window);
            TriggerResult::FireAndPurge
        } else {
            TriggerResult::Continue
        }
    }
}
