use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelStatus {
    Active,
    Idle,
    Finished,
}

#[derive(Debug, Clone, Copy)]
struct ChannelClock {
    watermark: EventTime,
    status: ChannelStatus,
    last_active: Instant,
}

/// Tracks per-channel watermarks of an input gate and computes the gate-wide
/// minimum.
///
/// A task can only advance its event-time clock to the minimum of its
/// channels, because a slower channel may still deliver earlier records.
///
/// - *Idle* channels (explicitly marked, or silent for longer than the idle
///   timeout) are left out of the minimum until they show activity again.
///   When every open channel is idle, the largest of their watermarks is
///   released.
/// - *Finished* channels (writer closed) are left out for good. Once every
///   channel has finished the watermark jumps to [`EVENT_TIME_MAX`].
///
/// The reported watermark never moves backwards.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    channels: Vec<ChannelClock>,
    idle_timeout: Option<Duration>,
    current: EventTime,
}

impl WatermarkTracker {
    pub fn new(num_channels: usize) -> Self {
        let now = Instant::now();
        Self {
            channels: vec![
                ChannelClock {
                    watermark: EVENT_TIME_MIN,
                    status: ChannelStatus::Active,
                    last_active: now,
                };
                num_channels
            ],
            idle_timeout: None,
            current: EVENT_TIME_MIN,
        }
    }

    /// Tracker that marks a channel idle after `idle_timeout` without activity.
    pub fn with_idle_timeout(num_channels: usize, idle_timeout: Duration) -> Self {
        Self {
            idle_timeout: Some(idle_timeout),
            ..Self::new(num_channels)
        }
    }

    /// Record a watermark from `channel`.
    ///
    /// Returns the new gate-wide watermark when it advanced. A watermark from
    /// an unknown or finished channel is ignored.
    pub fn advance(&mut self, channel: usize, watermark: Watermark) -> Option<Watermark> {
        let floor = self.current;
        let clock = self.channels.get_mut(channel)?;
        if clock.status == ChannelStatus::Finished {
            return None;
        }
        // A channel waking from idle with a stale watermark must not pull the
        // minimum backwards.
        clock.watermark = clock.watermark.max(watermark.timestamp).max(floor);
        clock.status = ChannelStatus::Active;
        clock.last_active = Instant::now();
        self.recompute()
    }

    /// Note that `channel` delivered a record. Wakes an idle channel.
    pub fn record_activity(&mut self, channel: usize) {
        if let Some(clock) = self.channels.get_mut(channel) {
            clock.last_active = Instant::now();
            if clock.status == ChannelStatus::Idle {
                clock.status = ChannelStatus::Active;
            }
        }
    }

    /// Exclude `channel` from the minimum until it shows activity again.
    pub fn mark_idle(&mut self, channel: usize) -> Option<Watermark> {
        let clock = self.channels.get_mut(channel)?;
        if clock.status != ChannelStatus::Active {
            return None;
        }
        clock.status = ChannelStatus::Idle;
        self.recompute()
    }

    /// The channel's writer closed; it no longer holds back the watermark.
    pub fn finish(&mut self, channel: usize) -> Option<Watermark> {
        let clock = self.channels.get_mut(channel)?;
        if clock.status == ChannelStatus::Finished {
            return None;
        }
        clock.status = ChannelStatus::Finished;
        self.recompute()
    }

    pub fn is_idle(&self, channel: usize) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|clock| clock.status == ChannelStatus::Idle)
    }

    pub fn is_finished(&self) -> bool {
        self.channels
            .iter()
            .all(|clock| clock.status == ChannelStatus::Finished)
    }

    /// Mark channels silent for longer than the idle timeout as idle.
    ///
    /// Returns the new watermark when that lets the minimum advance.
    pub fn detect_idle_channels(&mut self) -> Option<Watermark> {
        let timeout = self.idle_timeout?;
        let now = Instant::now();
        let mut changed = false;
        for (channel, clock) in self.channels.iter_mut().enumerate() {
            if clock.status == ChannelStatus::Active
                && now.duration_since(clock.last_active) >= timeout
            {
                debug!(channel, ?timeout, "input channel went idle");
                clock.status = ChannelStatus::Idle;
                changed = true;
            }
        }
        if changed {
            self.recompute()
        } else {
            None
        }
    }

    /// The gate-wide watermark last reported.
    pub fn current(&self) -> EventTime {
        self.current
    }

    fn recompute(&mut self) -> Option<Watermark> {
        let candidate = if self.is_finished() {
            EVENT_TIME_MAX
        } else {
            let active = self
                .channels
                .iter()
                .filter(|clock| clock.status == ChannelStatus::Active)
                .map(|clock| clock.watermark)
                .min();
            // All remaining channels idle: release the furthest of them.
            active.unwrap_or_else(|| {
                self.channels
                    .iter()
                    .filter(|clock| clock.status == ChannelStatus::Idle)
                    .map(|clock| clock.watermark)
                    .max()
                    .unwrap_or(self.current)
            })
        };
        if candidate > self.current {
            self.current = candidate;
            Some(Watermark::new(candidate))
        } else {
            None
        }
    }
}
