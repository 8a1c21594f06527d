use super::*;

use crate::time::EVENT_TIME_MAX;

/// Contents of a window that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredWindow<T> {
    pub window: TimeWindow,
    pub elements: Vec<T>,
}

/// Buffers elements per window and hands them out when the trigger fires.
///
/// # Processing model
///
/// - **Elements** are assigned to windows by the `WindowAssigner` and
///   appended to each window's buffer. Elements whose windows already closed
///   are dropped and counted as late.
/// - **Time** advances through [`advance_time`](Self::advance_time), usually
///   driven by the gate-wide watermark. Every buffered window is offered to
///   the trigger; fired windows are returned in window order.
pub struct WindowBuffer<T, A, TR> {
    assigner: A,
    trigger: TR,
    windows: BTreeMap<TimeWindow, Vec<T>>,
    current_time: EventTime,
    late_dropped: u64,
}

impl<T, A> WindowBuffer<T, A, <A as WindowAssigner<T>>::DefaultTrigger>
where
    T: Clone,
    A: WindowAssigner<T>,
{
    /// Buffer using the assigner's default trigger.
    pub fn new(assigner: A) -> Self {
        let trigger = assigner.default_trigger();
        Self::with_trigger(assigner, trigger)
    }
}

impl<T, A, TR> WindowBuffer<T, A, TR>
where
    T: Clone,
    A: WindowAssigner<T>,
    TR: Trigger<T>,
{
    pub fn with_trigger(assigner: A, trigger: TR) -> Self {
        Self {
            assigner,
            trigger,
            windows: BTreeMap::new(),
            current_time: EVENT_TIME_MIN,
            late_dropped: 0,
        }
    }

    /// Add an element. Returns windows the trigger fired on arrival.
    pub fn insert(&mut self, element: T, timestamp: EventTime) -> Vec<FiredWindow<T>> {
        let mut fired = Vec::new();
        for window in self.assigner.assign_windows(&element, timestamp) {
            if self.current_time >= window.end {
                self.late_dropped += 1;
                debug!(%window, timestamp, current = self.current_time, "late element dropped");
                continue;
            }
            self.windows
                .entry(window)
                .or_default()
                .push(element.clone());
            let result = self.trigger.on_element(&element, timestamp, &window);
            self.apply(window, result, &mut fired);
        }
        fired
    }

    /// Move current time forward to `time` and collect the windows that fire.
    ///
    /// Time never moves backwards; an older `time` is ignored.
    pub fn advance_time(&mut self, time: EventTime) -> Vec<FiredWindow<T>> {
        if time <= self.current_time {
            return Vec::new();
        }
        self.current_time = time;

        let mut results = Vec::new();
        for window in self.windows.keys() {
            let result = self.trigger.on_event_time(time, window);
            if result != TriggerResult::Continue {
                results.push((*window, result));
            }
        }

        let mut fired = Vec::new();
        for (window, result) in results {
            self.apply(window, result, &mut fired);
        }
        fired
    }

    /// Fire everything still buffered, as at end of input.
    pub fn flush(&mut self) -> Vec<FiredWindow<T>> {
        self.advance_time(EVENT_TIME_MAX)
    }

    fn apply(&mut self, window: TimeWindow, result: TriggerResult, fired: &mut Vec<FiredWindow<T>>) {
        if result.is_fire() {
            let elements = if result.is_purge() {
                self.windows.remove(&window)
            } else {
                self.windows.get(&window).cloned()
            };
            if let Some(elements) = elements {
                fired.push(FiredWindow { window, elements });
            }
        } else if result.is_purge() {
            self.windows.remove(&window);
        }
    }

    pub fn current_time(&self) -> EventTime {
        self.current_time
    }

    /// Number of windows holding buffered elements.
    pub fn num_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn buffered(&self, window: &TimeWindow) -> Option<&[T]> {
        self.windows.get(window).map(Vec::as_slice)
    }

    /// Elements dropped because their window had already closed.
    pub fn late_dropped(&self) -> u64 {
        self.late_dropped
    }
}
