//! Dual-channel clock synchronisation.
//!
//! The [`Synchronizer`] owns one [`ClockTracker`] per channel and is the only
//! writer of their state. Once per cycle it reads each channel's latest stamp
//! from [`SharedStamps`], moves the windows, and handles the two recovery
//! paths: wraparound (both counters restart from zero) and the stuck-clock
//! hard reset.

use crate::clock::{ClockParams, ClockState, ClockTracker, ClockUpdate, Observation, Window};
use crate::types::{Channel, CHANNELS};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Latest known timestamp per channel, shared with the event receiver.
///
/// Every access locks a single channel slot for one read or write, so a
/// holder can never block shutdown for longer than that.
#[derive(Debug, Clone, Default)]
pub struct SharedStamps {
    slots: Arc<[Mutex<Option<u32>>; CHANNELS]>,
}

impl SharedStamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new timestamp for `channel`.
    pub fn post(&self, channel: Channel, timestamp: u32) {
        *self.slots[channel.index()].lock() = Some(timestamp);
    }

    /// Returns the latest timestamp for `channel`, if any.
    pub fn latest(&self, channel: Channel) -> Option<u32> {
        *self.slots[channel.index()].lock()
    }

    /// Forgets all stamps (raw counters restart).
    pub fn reset(&self) {
        for slot in self.slots.iter() {
            *slot.lock() = None;
        }
    }
}

/// Cadences and thresholds of the synchroniser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncParams {
    /// Re-anchor on fresh data every N cycles
    pub resync_every: u64,
    /// Sample the counters for stuck detection every N cycles
    pub stuck_check_every: u64,
    /// Stale samples that force a hard reset
    pub stuck_threshold: u32,
    /// Track the right channel as well as the left
    pub stereo: bool,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            resync_every: 1,
            stuck_check_every: 100,
            stuck_threshold: 10,
            stereo: true,
        }
    }
}

/// Result of one synchronisation step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncOutcome {
    /// Acceptance window per channel
    pub windows: [Window; CHANNELS],
    /// How each active channel's window moved; `None` for inactive channels
    /// and cycles that restarted the counters
    pub updates: [Option<ClockUpdate>; CHANNELS],
    pub wrapped: bool,
    pub hard_reset: bool,
}

/// Orchestrates both channel clocks.
#[derive(Debug)]
pub struct Synchronizer {
    trackers: [ClockTracker; CHANNELS],
    params: SyncParams,
    stamps: SharedStamps,
    cycle: u64,
    hard_resets: u64,
    wraps: u64,
}

impl Synchronizer {
    pub fn new(clock: ClockParams, params: SyncParams, stamps: SharedStamps) -> Self {
        Self {
            trackers: Channel::ALL.map(|channel| ClockTracker::new(channel, clock)),
            params,
            stamps,
            cycle: 0,
            hard_resets: 0,
            wraps: 0,
        }
    }

    /// Number of completed cycles.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn hard_resets(&self) -> u64 {
        self.hard_resets
    }

    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    pub fn tracker(&self, channel: Channel) -> &ClockTracker {
        &self.trackers[channel.index()]
    }

    pub fn state(&self, channel: Channel) -> &ClockState {
        self.trackers[channel.index()].state()
    }

    pub fn windows(&self) -> [Window; CHANNELS] {
        Channel::ALL.map(|channel| self.trackers[channel.index()].window())
    }

    /// Whether `channel` is tracked.
    pub fn is_active(&self, channel: Channel) -> bool {
        self.params.stereo || channel == Channel::Left
    }

    fn active(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL.into_iter().filter(|&ch| self.is_active(ch))
    }

    /// Runs one cycle for a wall-clock `interval` since the previous cycle.
    pub fn step(&mut self, interval: Duration) -> SyncOutcome {
        self.cycle += 1;
        let interval_us = interval.as_secs_f64() * 1e6;
        let mut outcome = SyncOutcome::default();

        let mut wrapped = false;
        for channel in Channel::ALL {
            if !self.is_active(channel) {
                continue;
            }
            let stamp = self.stamps.latest(channel);
            let tracker = &mut self.trackers[channel.index()];
            let observation = tracker.observe(stamp);
            wrapped |= observation == Observation::Wrapped || tracker.wrap_due();
        }

        if wrapped {
            self.restart_counters(interval_us);
            outcome.wrapped = true;
        } else {
            let resync_due = self.cycle % self.params.resync_every == 0;
            for channel in Channel::ALL {
                if self.is_active(channel) {
                    let update = self.trackers[channel.index()].update(interval_us, resync_due);
                    outcome.updates[channel.index()] = Some(update);
                }
            }
        }

        if self.check_stuck() {
            self.hard_reset(interval_us);
            outcome.hard_reset = true;
        }

        outcome.windows = self.windows();
        outcome
    }

    /// Restarts both channels' counters from zero after a wraparound.
    fn restart_counters(&mut self, interval_us: f64) {
        let lasts = Channel::ALL.map(|ch| self.trackers[ch.index()].state().last_timestamp);
        info!(
            cycle = self.cycle,
            left = lasts[0],
            right = lasts[1],
            "counter wraparound, restarting both clocks"
        );
        self.stamps.reset();
        for tracker in self.trackers.iter_mut() {
            tracker.rebase(interval_us);
        }
        self.wraps += 1;
    }

    /// Samples the counters on the configured cadence and returns whether the
    /// stuck threshold was reached.
    fn check_stuck(&mut self) -> bool {
        let first = self.active().any(|ch| !self.trackers[ch.index()].has_baseline());
        if !first && self.cycle % self.params.stuck_check_every != 0 {
            return false;
        }

        let mut verdicts = [None; CHANNELS];
        for channel in Channel::ALL {
            if self.is_active(channel) {
                verdicts[channel.index()] = Some(self.trackers[channel.index()].sample());
            }
        }

        // A sample is stale only when every active channel stood still.
        let mut stale = true;
        for verdict in verdicts.iter().flatten() {
            match verdict {
                None => return false,
                Some(changed) => stale &= !changed,
            }
        }

        let mut tripped = false;
        for channel in Channel::ALL {
            if self.is_active(channel) {
                let count = self.trackers[channel.index()].note_sample(stale);
                if stale {
                    debug!(channel = %channel, count, "clock sample unchanged");
                }
                tripped |= count >= self.params.stuck_threshold;
            }
        }
        tripped
    }

    /// Forces both clocks back to zero and clears the stuck counters.
    pub fn hard_reset(&mut self, interval_us: f64) {
        warn!(
            cycle = self.cycle,
            threshold = self.params.stuck_threshold,
            "clock stuck, hard reset"
        );
        self.stamps.reset();
        for tracker in self.trackers.iter_mut() {
            tracker.hard_reset(interval_us);
        }
        self.hard_resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(1);

    fn synchronizer(params: SyncParams) -> (Synchronizer, SharedStamps) {
        let stamps = SharedStamps::new();
        let sync = Synchronizer::new(ClockParams::default(), params, stamps.clone());
        (sync, stamps)
    }

    #[test]
    fn test_shared_stamps() {
        let stamps = SharedStamps::new();
        assert_eq!(stamps.latest(Channel::Left), None);
        stamps.post(Channel::Right, 99);
        let clone = stamps.clone();
        assert_eq!(clone.latest(Channel::Right), Some(99));
        clone.reset();
        assert_eq!(stamps.latest(Channel::Right), None);
    }

    #[test]
    fn test_both_channels_anchor_independently() {
        let (mut sync, stamps) = synchronizer(SyncParams::default());
        stamps.post(Channel::Left, 50_000);
        stamps.post(Channel::Right, 80_000);

        let outcome = sync.step(TICK);
        assert_eq!(outcome.updates, [Some(ClockUpdate::Anchored); 2]);
        assert_eq!(outcome.windows[0], Window::new(40_000.0, 50_000.0));
        assert_eq!(outcome.windows[1], Window::new(70_000.0, 80_000.0));
    }

    #[test]
    fn test_silent_stream_drifts() {
        let (mut sync, stamps) = synchronizer(SyncParams::default());
        stamps.post(Channel::Left, 50_000);
        sync.step(TICK);

        let outcome = sync.step(TICK);
        assert_eq!(outcome.updates[0], Some(ClockUpdate::Drifted));
        assert_eq!(outcome.windows[0], Window::new(41_000.0, 51_000.0));
    }

    #[test]
    fn test_mono_ignores_right_channel() {
        let (mut sync, stamps) = synchronizer(SyncParams {
            stereo: false,
            ..SyncParams::default()
        });
        stamps.post(Channel::Right, 80_000);
        let outcome = sync.step(TICK);
        assert_eq!(outcome.updates[1], None);
        assert_eq!(outcome.windows[1], Window::default());
    }

    #[test]
    fn test_wrap_restarts_both_channels() {
        let (mut sync, stamps) = synchronizer(SyncParams::default());
        stamps.post(Channel::Left, 4_294_967_000);
        stamps.post(Channel::Right, 1_000_000);
        sync.step(TICK);

        stamps.post(Channel::Left, 200);
        let outcome = sync.step(TICK);
        assert!(outcome.wrapped);
        for window in outcome.windows {
            assert_eq!(window, Window::new(0.0, 10_000.0));
        }
        assert_eq!(stamps.latest(Channel::Right), None);
        assert_eq!(sync.wraps(), 1);
    }

    #[test]
    fn test_threshold_wrap_fires_once_per_epoch() {
        let (mut sync, stamps) = synchronizer(SyncParams::default());
        stamps.post(Channel::Left, 4_294_967_200);
        stamps.post(Channel::Right, 1_000_000);
        assert!(!sync.step(TICK).wrapped);

        stamps.post(Channel::Left, 4_294_967_270);
        assert!(sync.step(TICK).wrapped);

        // The receiver keeps posting stamps from before the native wrap.
        for i in 0..3u32 {
            stamps.post(Channel::Left, 4_294_967_280 + i);
            stamps.post(Channel::Right, 1_000_100 + i);
            let outcome = sync.step(TICK);
            assert!(!outcome.wrapped);
            assert!(outcome.updates[0].is_some());
        }
        assert!(sync.state(Channel::Left).synchronized);

        stamps.post(Channel::Left, 1_000);
        let outcome = sync.step(TICK);
        assert!(!outcome.wrapped);
        assert_eq!(outcome.updates[0], Some(ClockUpdate::Anchored));
        assert_eq!(outcome.windows[0], Window::new(0.0, 10_000.0));
        assert_eq!(sync.wraps(), 1);
    }

    #[test]
    fn test_stuck_clock_resets_once_at_threshold() {
        let (mut sync, stamps) = synchronizer(SyncParams {
            stuck_check_every: 10,
            ..SyncParams::default()
        });

        for cycle in 1..=100u64 {
            stamps.post(Channel::Left, 123_456);
            stamps.post(Channel::Right, 654_321);
            let outcome = sync.step(TICK);
            assert_eq!(outcome.hard_reset, cycle == 100, "cycle {}", cycle);
        }

        assert_eq!(sync.hard_resets(), 1);
        assert_eq!(sync.state(Channel::Left).corrected_low, 0.0);
        assert_eq!(sync.state(Channel::Left).stuck_counter, 0);
        assert_eq!(sync.state(Channel::Right).stuck_counter, 0);
    }

    #[test]
    fn test_moving_companion_keeps_clock_alive() {
        let (mut sync, stamps) = synchronizer(SyncParams {
            stuck_check_every: 1,
            stuck_threshold: 3,
            ..SyncParams::default()
        });

        for cycle in 0..20u32 {
            stamps.post(Channel::Left, 1_000);
            stamps.post(Channel::Right, 1_000 + cycle);
            assert!(!sync.step(TICK).hard_reset);
        }
        assert_eq!(sync.state(Channel::Left).stuck_counter, 0);
    }
}
