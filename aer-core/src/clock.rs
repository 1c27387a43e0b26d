//! Per-channel hardware clock tracking.
//!
//! Each sensor channel runs its own wrapping 32-bit counter at a rate that
//! only approximately matches the reference clock. A [`ClockTracker`] follows
//! one channel's counter and maintains the acceptance [`Window`] that decides
//! which events are fresh enough to accumulate.
//!
//! The window is always `span` wide, where
//!
//! ```text
//! span = interval_us * interval_factor * depth_window
//! ```
//!
//! and `interval_us` is the wall-clock time between two pipeline cycles.
//!
//! The tracker keeps its bounds in the reference counter domain
//! (`raw * counter_ratio`). [`ClockTracker::window`] maps them back onto the
//! channel's native counter, which is what event timestamps are tested
//! against.

use crate::types::Channel;
use tracing::trace;

/// Half of the raw counter range; a backwards jump larger than this is a wrap.
const HALF_RANGE: u32 = 1 << 31;

/// Open interval of admissible raw timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Window {
    pub low: f64,
    pub high: f64,
}

impl Window {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Whether `timestamp` lies strictly inside the window.
    #[inline]
    pub fn admits(&self, timestamp: u32) -> bool {
        let t = timestamp as f64;
        t > self.low && t < self.high
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

/// Rate and history parameters shared by both trackers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockParams {
    /// Counter ticks per wall-clock microsecond
    pub interval_factor: f64,
    /// Scale from the sensor counter to the reference counter
    pub counter_ratio: f64,
    /// Frames of history kept in the window
    pub depth_window: u32,
    /// Native counter value at which the counter is considered wrapped
    pub wrap_threshold: f64,
}

impl Default for ClockParams {
    fn default() -> Self {
        Self {
            interval_factor: 1.0,
            counter_ratio: 1.0,
            depth_window: 10,
            wrap_threshold: 4_294_967_268.0,
        }
    }
}

/// Observable state of one channel's clock.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClockState {
    /// Last raw timestamp seen on the channel
    pub last_timestamp: u32,
    pub corrected_low: f64,
    pub corrected_high: f64,
    /// Consecutive stuck samples
    pub stuck_counter: u32,
    pub synchronized: bool,
    /// Wraparounds observed so far
    pub wraps: u32,
}

/// What the latest stamp told the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No stamp has been seen on this channel
    NoData,
    /// Same stamp as the previous cycle
    Unchanged,
    /// A new stamp arrived
    Advanced,
    /// The counter jumped backwards past half its range
    Wrapped,
}

/// How the window was moved this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockUpdate {
    /// First anchor after start or reset
    Anchored,
    /// Periodic re-anchor on fresh data
    Resynced,
    /// Advanced by wall-clock time only
    Drifted,
}

/// Tracks one channel's wrapping, drifting hardware counter.
#[derive(Debug, Clone)]
pub struct ClockTracker {
    channel: Channel,
    params: ClockParams,
    state: ClockState,
    has_data: bool,
    fresh: bool,
    sample: Option<f64>,
    /// Cleared when a rebase happens before the native counter wrapped; set
    /// again once a stamp below the threshold shows the new epoch.
    wrap_armed: bool,
}

impl ClockTracker {
    pub fn new(channel: Channel, params: ClockParams) -> Self {
        Self {
            channel,
            params,
            state: ClockState::default(),
            has_data: false,
            fresh: false,
            sample: None,
            wrap_armed: true,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn state(&self) -> &ClockState {
        &self.state
    }

    /// Acceptance window in the channel's native counter domain.
    pub fn window(&self) -> Window {
        let ratio = self.params.counter_ratio;
        Window::new(self.state.corrected_low / ratio, self.state.corrected_high / ratio)
    }

    /// Window width for a cycle of `interval_us`.
    #[inline]
    pub fn span(&self, interval_us: f64) -> f64 {
        interval_us * self.params.interval_factor * self.params.depth_window as f64
    }

    /// Last timestamp scaled into the reference counter domain.
    #[inline]
    pub fn corrected_last(&self) -> f64 {
        self.state.last_timestamp as f64 * self.params.counter_ratio
    }

    /// Records the latest stamp posted for this channel.
    pub fn observe(&mut self, stamp: Option<u32>) -> Observation {
        let Some(stamp) = stamp else {
            self.fresh = false;
            return Observation::NoData;
        };

        if self.has_data && stamp == self.state.last_timestamp {
            self.fresh = false;
            return Observation::Unchanged;
        }

        let previous = self.state.last_timestamp;
        let jumped_back = self.has_data && stamp < previous && previous - stamp > HALF_RANGE;

        self.state.last_timestamp = stamp;
        self.has_data = true;
        self.fresh = true;

        if (stamp as f64) < self.params.wrap_threshold && !self.wrap_armed {
            self.wrap_armed = true;
            if jumped_back {
                // Counter caught up with a threshold rebase.
                self.state.synchronized = false;
                return Observation::Advanced;
            }
        }

        if jumped_back {
            self.state.wraps += 1;
            Observation::Wrapped
        } else {
            Observation::Advanced
        }
    }

    /// Whether the window or the counter reached the wrap threshold.
    ///
    /// Both are compared in the native counter domain. After a rebase the
    /// check stays off for stamps still at or above the threshold, so one
    /// native epoch triggers at most one threshold wrap.
    pub fn wrap_due(&self) -> bool {
        if self.has_data && !self.wrap_armed {
            return false;
        }
        let threshold = self.params.wrap_threshold;
        self.state.corrected_high / self.params.counter_ratio >= threshold
            || self.state.last_timestamp as f64 >= threshold
    }

    /// Moves the window for one cycle of `interval_us`.
    ///
    /// Anchors on the first data after start or reset, re-anchors on fresh
    /// data when `resync_due`, and otherwise drifts by the wall interval.
    pub fn update(&mut self, interval_us: f64, resync_due: bool) -> ClockUpdate {
        let span = self.span(interval_us);

        let update = if self.has_data && !self.state.synchronized {
            self.anchor(span);
            ClockUpdate::Anchored
        } else if self.has_data && self.fresh && resync_due {
            self.anchor(span);
            ClockUpdate::Resynced
        } else {
            self.state.corrected_low += interval_us * self.params.interval_factor;
            ClockUpdate::Drifted
        };

        self.state.corrected_high = self.state.corrected_low + span;
        trace!(
            channel = %self.channel,
            low = self.state.corrected_low,
            high = self.state.corrected_high,
            ?update,
            "window updated"
        );
        update
    }

    fn anchor(&mut self, span: f64) {
        self.state.corrected_low = (self.corrected_last() - span).max(0.0);
        self.state.synchronized = true;
    }

    /// Restarts the counter reference at zero after a wraparound.
    pub fn rebase(&mut self, interval_us: f64) {
        let span = self.span(interval_us);
        self.state.last_timestamp = 0;
        self.state.corrected_low = 0.0;
        self.state.corrected_high = span;
        self.state.synchronized = false;
        self.has_data = false;
        self.fresh = false;
        self.wrap_armed = false;
    }

    /// Rebases and clears the stuck detector.
    pub fn hard_reset(&mut self, interval_us: f64) {
        self.rebase(interval_us);
        self.state.stuck_counter = 0;
        self.sample = Some(0.0);
    }

    /// Samples the corrected counter for stuck detection.
    ///
    /// The first call only records a baseline and returns `None`; later calls
    /// return whether the counter moved since the previous sample.
    pub fn sample(&mut self) -> Option<bool> {
        let current = self.corrected_last();
        let previous = self.sample.replace(current)?;
        Some(previous != current)
    }

    /// Records the verdict of a stuck sample.
    pub fn note_sample(&mut self, stale: bool) -> u32 {
        if stale {
            self.state.stuck_counter += 1;
        } else {
            self.state.stuck_counter = 0;
        }
        self.state.stuck_counter
    }

    /// Whether a baseline sample has been taken.
    pub fn has_baseline(&self) -> bool {
        self.sample.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ClockTracker {
        ClockTracker::new(Channel::Left, ClockParams::default())
    }

    #[test]
    fn test_window_admits_strictly_inside() {
        let w = Window::new(10.0, 20.0);
        assert!(w.admits(11));
        assert!(w.admits(19));
        assert!(!w.admits(10));
        assert!(!w.admits(20));
    }

    #[test]
    fn test_anchor_on_first_data() {
        let mut t = tracker();
        assert_eq!(t.observe(Some(100_000)), Observation::Advanced);
        assert_eq!(t.update(1_000.0, false), ClockUpdate::Anchored);

        // span = 1000us * 1.0 * 10
        assert_eq!(t.state().corrected_low, 90_000.0);
        assert_eq!(t.state().corrected_high, 100_000.0);
        assert!(t.state().synchronized);
    }

    #[test]
    fn test_anchor_clamps_at_zero() {
        let mut t = tracker();
        t.observe(Some(500));
        t.update(1_000.0, false);
        assert_eq!(t.state().corrected_low, 0.0);
        assert_eq!(t.state().corrected_high, 10_000.0);
    }

    #[test]
    fn test_drift_without_new_stamp() {
        let mut t = tracker();
        t.observe(Some(100_000));
        t.update(1_000.0, true);

        assert_eq!(t.observe(Some(100_000)), Observation::Unchanged);
        assert_eq!(t.update(2_000.0, true), ClockUpdate::Drifted);
        assert_eq!(t.state().corrected_low, 92_000.0);
        assert_eq!(t.state().corrected_high, 112_000.0);
    }

    #[test]
    fn test_resync_on_fresh_data() {
        let mut t = tracker();
        t.observe(Some(100_000));
        t.update(1_000.0, true);

        t.observe(Some(150_000));
        assert_eq!(t.update(1_000.0, true), ClockUpdate::Resynced);
        assert_eq!(t.state().corrected_low, 140_000.0);

        t.observe(Some(160_000));
        assert_eq!(t.update(1_000.0, false), ClockUpdate::Drifted);
        assert_eq!(t.state().corrected_low, 141_000.0);
    }

    #[test]
    fn test_counter_ratio_scales_anchor() {
        let params = ClockParams {
            counter_ratio: 1.25,
            ..ClockParams::default()
        };
        let mut t = ClockTracker::new(Channel::Right, params);
        t.observe(Some(80_000));
        t.update(1_000.0, false);
        assert_eq!(t.state().corrected_low, 90_000.0);
        assert_eq!(t.window(), Window::new(72_000.0, 80_000.0));
    }

    #[test]
    fn test_backwards_jump_is_a_wrap() {
        let mut t = tracker();
        t.observe(Some(4_294_967_000));
        t.update(10.0, false);
        assert_eq!(t.observe(Some(100)), Observation::Wrapped);
        assert_eq!(t.state().wraps, 1);

        // A small step back is not a wrap.
        t.observe(Some(5_000));
        assert_eq!(t.observe(Some(4_000)), Observation::Advanced);
    }

    #[test]
    fn test_wrap_due_at_threshold() {
        let mut t = tracker();
        t.observe(Some(4_294_967_260));
        t.update(10.0, false);
        // high = last = 4_294_967_260 < threshold
        assert!(!t.wrap_due());
        t.update(10.0, false);
        assert!(t.wrap_due());

        t.rebase(10.0);
        assert!(!t.wrap_due());
        assert_eq!(t.window(), Window::new(0.0, 100.0));
    }

    #[test]
    fn test_threshold_wraps_once_per_epoch() {
        let mut t = tracker();
        t.observe(Some(4_294_967_280));
        assert!(t.wrap_due());
        t.rebase(10.0);

        // Stamps from the same native epoch anchor instead of wrapping again.
        assert_eq!(t.observe(Some(4_294_967_290)), Observation::Advanced);
        assert_eq!(t.update(10.0, true), ClockUpdate::Anchored);
        assert!(!t.wrap_due());

        // The native counter then wraps; that re-anchors without a second wrap.
        assert_eq!(t.observe(Some(500)), Observation::Advanced);
        assert_eq!(t.update(10.0, false), ClockUpdate::Anchored);
        assert_eq!(t.state().wraps, 0);
        assert_eq!(t.window(), Window::new(400.0, 500.0));
        assert!(!t.wrap_due());

        // Re-armed for the next epoch.
        t.observe(Some(4_294_967_270));
        assert!(t.wrap_due());
    }

    #[test]
    fn test_scaled_counter_wraps_on_native_value() {
        let params = ClockParams {
            counter_ratio: 1.25,
            ..ClockParams::default()
        };
        let mut t = ClockTracker::new(Channel::Left, params);
        t.observe(Some(3_500_000_000));
        t.update(1_000.0, true);

        // 3.5e9 * 1.25 is past the threshold but the native counter is not.
        assert!(t.state().corrected_high >= params.wrap_threshold);
        assert!(!t.wrap_due());
        assert_eq!(t.window(), Window::new(3_499_992_000.0, 3_500_000_000.0));
        assert!(t.window().admits(3_499_999_000));
    }

    #[test]
    fn test_stuck_sampling() {
        let mut t = tracker();
        t.observe(Some(42));
        assert_eq!(t.sample(), None);
        assert_eq!(t.sample(), Some(false));
        assert_eq!(t.note_sample(true), 1);
        assert_eq!(t.note_sample(true), 2);

        t.observe(Some(43));
        assert_eq!(t.sample(), Some(true));
        assert_eq!(t.note_sample(false), 0);
    }

    #[test]
    fn test_hard_reset_clears_state() {
        let mut t = tracker();
        t.observe(Some(1_000_000));
        t.update(1_000.0, false);
        t.note_sample(true);

        t.hard_reset(1_000.0);
        assert_eq!(t.state().corrected_low, 0.0);
        assert_eq!(t.state().corrected_high, 10_000.0);
        assert_eq!(t.state().stuck_counter, 0);
        assert_eq!(t.state().last_timestamp, 0);
        assert!(!t.state().synchronized);
    }
}
