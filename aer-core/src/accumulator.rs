//! Spatial accumulation of admitted events.
//!
//! Each channel owns a [`SpatialMap`]: a dense `size x size` intensity array
//! and a co-indexed array holding the raw timestamp of the last event that hit
//! each cell. Events enter through [`SpatialAccumulator::ingest`] and fade
//! through [`SpatialAccumulator::forget`].
//!
//! Cells are indexed with the sensor image mirrored on both axes:
//!
//! ```text
//! pos = (size - 1 - x) + (size - 1 - y) * size
//! ```

use crate::clock::Window;
use crate::sync::SharedStamps;
use crate::types::{Channel, EventBatch, EventKind, Polarity, CHANNELS};
use tracing::debug;

/// How a single event changes its cell's intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulationLaw {
    /// `+-unit`, clamped to `[-clip, clip]`
    Clipped { unit: i32, clip: i32 },
    /// `+-unit`, bounded only by the integer range
    Unclipped { unit: i32 },
}

impl AccumulationLaw {
    /// Returns the new value of a cell at `value` hit by `polarity`.
    #[inline]
    pub fn apply(&self, value: i32, polarity: Polarity) -> i32 {
        match (*self, polarity) {
            (Self::Clipped { unit, clip }, Polarity::On) => value.saturating_add(unit).min(clip),
            (Self::Clipped { unit, clip }, Polarity::Off) => {
                value.saturating_sub(unit).max(-clip)
            }
            (Self::Unclipped { unit }, Polarity::On) => value.saturating_add(unit),
            (Self::Unclipped { unit }, Polarity::Off) => value.saturating_sub(unit),
        }
    }
}

/// Dense intensity and recency map of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialMap {
    size: usize,
    intensity: Vec<i32>,
    last_event: Vec<u32>,
}

impl SpatialMap {
    /// Creates a zeroed `size x size` map.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            intensity: vec![0; size * size],
            last_event: vec![0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Row-major intensities.
    pub fn intensity(&self) -> &[i32] {
        &self.intensity
    }

    /// Row-major raw timestamps of the last admitted event per cell.
    pub fn last_event(&self) -> &[u32] {
        &self.last_event
    }

    /// Mirrored cell index of sensor pixel `(x, y)`, if it lies on the map.
    #[inline]
    pub fn index(&self, x: u16, y: u16) -> Option<usize> {
        let size = self.size as i64;
        let col = size - 1 - x as i64;
        let row = size - 1 - y as i64;
        if col < 0 || row < 0 {
            return None;
        }
        let pos = (col + row * size) as usize;
        (pos < self.intensity.len()).then_some(pos)
    }

    /// Intensity and last timestamp of the cell at map column `col`, row `row`.
    pub fn get(&self, col: usize, row: usize) -> Option<(i32, u32)> {
        if col >= self.size || row >= self.size {
            return None;
        }
        let pos = row * self.size + col;
        Some((self.intensity[pos], self.last_event[pos]))
    }

    /// Intensity and last timestamp of the cell hit by sensor pixel `(x, y)`.
    pub fn at_pixel(&self, x: u16, y: u16) -> Option<(i32, u32)> {
        self.index(x, y)
            .map(|pos| (self.intensity[pos], self.last_event[pos]))
    }

    /// Moves every positive cell down by `step` and every other cell up by
    /// `step`. Cells may cross zero, and an empty cell turns positive.
    pub fn forget(&mut self, step: i32) {
        for value in self.intensity.iter_mut() {
            if *value > 0 {
                *value = value.saturating_sub(step);
            } else {
                *value = value.saturating_add(step);
            }
        }
    }

    pub fn clear(&mut self) {
        self.intensity.fill(0);
        self.last_event.fill(0);
    }

    /// Number of cells with non-zero intensity.
    pub fn active_cells(&self) -> usize {
        self.intensity.iter().filter(|&&v| v != 0).count()
    }

    #[inline]
    fn hit(&mut self, pos: usize, polarity: Polarity, timestamp: u32, law: AccumulationLaw) {
        self.intensity[pos] = law.apply(self.intensity[pos], polarity);
        self.last_event[pos] = timestamp;
    }
}

/// Counters of one ingest pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Address events written to a map
    pub ingested: u64,
    /// Address events rejected by their channel's window
    pub outside_window: u64,
    /// Admitted events whose mirrored index fell off the map
    pub out_of_range: u64,
    /// Timestamp markers forwarded to the shared stamps
    pub markers: u64,
}

impl std::ops::AddAssign for IngestStats {
    fn add_assign(&mut self, rhs: Self) {
        self.ingested += rhs.ingested;
        self.outside_window += rhs.outside_window;
        self.out_of_range += rhs.out_of_range;
        self.markers += rhs.markers;
    }
}

/// Both channels' maps and the logic that writes them.
#[derive(Debug, Clone)]
pub struct SpatialAccumulator {
    maps: [SpatialMap; CHANNELS],
}

impl SpatialAccumulator {
    pub fn new(size: usize) -> Self {
        Self {
            maps: [SpatialMap::new(size), SpatialMap::new(size)],
        }
    }

    pub fn size(&self) -> usize {
        self.maps[0].size()
    }

    pub fn map(&self, channel: Channel) -> &SpatialMap {
        &self.maps[channel.index()]
    }

    pub fn maps(&self) -> &[SpatialMap; CHANNELS] {
        &self.maps
    }

    /// Writes the admitted events of `batch` into the maps.
    ///
    /// An address event is admitted when its raw timestamp lies strictly
    /// inside its channel's window. Markers only update `stamps`.
    pub fn ingest(
        &mut self,
        batch: &EventBatch,
        windows: &[Window; CHANNELS],
        law: AccumulationLaw,
        stamps: &SharedStamps,
    ) -> IngestStats {
        let mut stats = IngestStats::default();

        for event in &batch.events {
            if event.kind == EventKind::TimestampMarker {
                stamps.post(event.channel, event.timestamp);
                stats.markers += 1;
                continue;
            }

            let ch = event.channel.index();
            if !windows[ch].admits(event.timestamp) {
                stats.outside_window += 1;
                continue;
            }

            let map = &mut self.maps[ch];
            match map.index(event.x, event.y) {
                Some(pos) => {
                    map.hit(pos, event.polarity, event.timestamp, law);
                    stats.ingested += 1;
                }
                None => {
                    debug!(
                        channel = %event.channel,
                        x = event.x,
                        y = event.y,
                        size = map.size(),
                        "event outside the map"
                    );
                    stats.out_of_range += 1;
                }
            }
        }

        stats
    }

    /// Applies one forgetting step to both maps.
    pub fn forget(&mut self, step: i32) {
        for map in self.maps.iter_mut() {
            map.forget(step);
        }
    }

    /// Zeroes both maps.
    pub fn reset(&mut self) {
        for map in self.maps.iter_mut() {
            map.clear();
        }
    }

    /// Reallocates both maps at `size`, discarding their contents.
    pub fn resize(&mut self, size: usize) {
        self.maps = [SpatialMap::new(size), SpatialMap::new(size)];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecodedEvent;

    const PACKED: AccumulationLaw = AccumulationLaw::Clipped {
        unit: 127,
        clip: 127,
    };

    fn open_windows() -> [Window; CHANNELS] {
        [Window::new(0.0, 1e9), Window::new(0.0, 1e9)]
    }

    fn batch_of(events: &[DecodedEvent]) -> EventBatch {
        let mut batch = EventBatch::new();
        for &event in events {
            batch.push(event);
        }
        batch
    }

    #[test]
    fn test_mirror_index() {
        let map = SpatialMap::new(128);
        assert_eq!(map.index(127, 127), Some(0));
        assert_eq!(map.index(0, 0), Some(128 * 128 - 1));
        assert_eq!(map.index(10, 20), Some(117 + 107 * 128));

        let small = SpatialMap::new(32);
        assert_eq!(small.index(40, 0), None);
        assert_eq!(small.index(0, 32), None);
    }

    #[test]
    fn test_clipped_law() {
        assert_eq!(PACKED.apply(0, Polarity::On), 127);
        assert_eq!(PACKED.apply(127, Polarity::On), 127);
        assert_eq!(PACKED.apply(-100, Polarity::Off), -127);

        let framed = AccumulationLaw::Unclipped { unit: 50 };
        assert_eq!(framed.apply(200, Polarity::On), 250);
        assert_eq!(framed.apply(i32::MIN + 10, Polarity::Off), i32::MIN);
    }

    #[test]
    fn test_off_then_three_on_saturates() {
        let mut acc = SpatialAccumulator::new(128);
        let stamps = SharedStamps::new();
        let batch = batch_of(&[
            DecodedEvent::address(5, 5, Polarity::Off, Channel::Left, 10),
            DecodedEvent::address(5, 5, Polarity::On, Channel::Left, 11),
            DecodedEvent::address(5, 5, Polarity::On, Channel::Left, 12),
            DecodedEvent::address(5, 5, Polarity::On, Channel::Left, 13),
        ]);

        let stats = acc.ingest(&batch, &open_windows(), PACKED, &stamps);
        assert_eq!(stats.ingested, 4);
        assert_eq!(acc.map(Channel::Left).at_pixel(5, 5), Some((127, 13)));
        assert_eq!(acc.map(Channel::Right).active_cells(), 0);
    }

    #[test]
    fn test_out_of_window_events_leave_cells_untouched() {
        let mut acc = SpatialAccumulator::new(128);
        let stamps = SharedStamps::new();
        let windows = [Window::new(100.0, 200.0), Window::new(100.0, 200.0)];
        let batch = batch_of(&[
            DecodedEvent::address(1, 1, Polarity::On, Channel::Left, 100),
            DecodedEvent::address(1, 1, Polarity::On, Channel::Left, 200),
            DecodedEvent::address(2, 2, Polarity::On, Channel::Right, 150),
        ]);

        let stats = acc.ingest(&batch, &windows, PACKED, &stamps);
        assert_eq!(stats.outside_window, 2);
        assert_eq!(stats.ingested, 1);
        assert_eq!(acc.map(Channel::Left).at_pixel(1, 1), Some((0, 0)));
        assert_eq!(acc.map(Channel::Right).at_pixel(2, 2), Some((127, 150)));
    }

    #[test]
    fn test_markers_post_stamps() {
        let mut acc = SpatialAccumulator::new(16);
        let stamps = SharedStamps::new();
        let batch = batch_of(&[DecodedEvent::marker(Channel::Right, 4242)]);

        let stats = acc.ingest(&batch, &open_windows(), PACKED, &stamps);
        assert_eq!(stats.markers, 1);
        assert_eq!(stamps.latest(Channel::Right), Some(4242));
        assert_eq!(acc.map(Channel::Right).active_cells(), 0);
    }

    #[test]
    fn test_map_smaller_than_sensor() {
        let mut acc = SpatialAccumulator::new(32);
        let stamps = SharedStamps::new();
        let batch = batch_of(&[DecodedEvent::address(100, 3, Polarity::On, Channel::Left, 5)]);

        let stats = acc.ingest(&batch, &open_windows(), PACKED, &stamps);
        assert_eq!(stats.out_of_range, 1);
        assert_eq!(acc.map(Channel::Left).active_cells(), 0);
    }

    #[test]
    fn test_forget_moves_past_zero() {
        let mut map = SpatialMap::new(2);
        map.intensity.copy_from_slice(&[30, -30, 0, 127]);
        map.forget(50);
        assert_eq!(map.intensity(), &[-20, 20, 50, 77]);
    }

    #[test]
    fn test_reset_and_resize() {
        let mut acc = SpatialAccumulator::new(8);
        let stamps = SharedStamps::new();
        let batch = batch_of(&[DecodedEvent::address(1, 1, Polarity::On, Channel::Left, 5)]);
        acc.ingest(&batch, &open_windows(), PACKED, &stamps);

        acc.reset();
        assert_eq!(acc.map(Channel::Left).active_cells(), 0);
        assert!(acc.map(Channel::Left).last_event().iter().all(|&t| t == 0));

        acc.resize(4);
        assert_eq!(acc.size(), 4);
        assert_eq!(acc.map(Channel::Right).intensity().len(), 16);
    }
}
