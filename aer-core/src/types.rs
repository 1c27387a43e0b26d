//! Core types for decoded AER data.
//!
//! This module defines the structured event produced by the codecs, the
//! reusable batch container the pipeline decodes into, and the small enums
//! used to index per-channel state.

use serde::{Deserialize, Serialize};

/// Number of sensor channels (left and right).
pub const CHANNELS: usize = 2;

/// Event polarity: brightness increase (`On`) or decrease (`Off`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Off,
    On,
}

impl Polarity {
    /// Converts a single bit into a polarity (1 = ON).
    #[inline]
    pub fn from_bit(bit: u32) -> Self {
        if bit & 0x1 != 0 {
            Self::On
        } else {
            Self::Off
        }
    }

    #[inline]
    pub fn bit(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::On => 1,
        }
    }
}

/// Sensor channel of a stereo pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Left,
    Right,
}

impl Channel {
    /// All channels in index order.
    pub const ALL: [Channel; CHANNELS] = [Channel::Left, Channel::Right];

    /// Converts a single bit into a channel (0 = left, 1 = right).
    #[inline]
    pub fn from_bit(bit: u32) -> Self {
        if bit & 0x1 != 0 {
            Self::Right
        } else {
            Self::Left
        }
    }

    #[inline]
    pub fn bit(self) -> u32 {
        self.index() as u32
    }

    /// Index of this channel in per-channel arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    /// The other channel of the pair.
    #[inline]
    pub fn companion(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Whether an event addresses a pixel or only carries a clock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Address,
    TimestampMarker,
}

/// A decoded address event or timestamp marker.
///
/// The timestamp is the raw, channel-local hardware counter. It is not
/// comparable across channels without the correction held by the clock
/// trackers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedEvent {
    /// Pixel column
    pub x: u16,
    /// Pixel row
    pub y: u16,
    pub polarity: Polarity,
    pub channel: Channel,
    /// Raw counter value
    pub timestamp: u32,
    pub kind: EventKind,
}

impl DecodedEvent {
    /// Creates a new address event.
    #[inline]
    pub fn address(x: u16, y: u16, polarity: Polarity, channel: Channel, timestamp: u32) -> Self {
        Self {
            x,
            y,
            polarity,
            channel,
            timestamp,
            kind: EventKind::Address,
        }
    }

    /// Creates a timestamp marker for `channel`.
    #[inline]
    pub fn marker(channel: Channel, timestamp: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            polarity: Polarity::Off,
            channel,
            timestamp,
            kind: EventKind::TimestampMarker,
        }
    }

    #[inline]
    pub fn is_address(&self) -> bool {
        self.kind == EventKind::Address
    }
}

/// Ordered batch of decoded events plus per-batch bookkeeping.
///
/// The pipeline owns one batch and reuses it every cycle: [`EventBatch::clear`]
/// keeps the allocation, so capacity only grows at batch boundaries.
#[derive(Debug, Default)]
pub struct EventBatch {
    /// Events in arrival order
    pub events: Vec<DecodedEvent>,
    /// Records dropped because their coordinates were out of range
    pub malformed: u64,
    /// All-zero record slots skipped in a partly filled chunk
    pub padding: u64,
    /// Latest timestamp seen per channel in this batch
    pub latest: [Option<u32>; CHANNELS],
    /// Set when a framed batch stopped at an unknown record
    pub aborted: bool,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a batch able to hold `capacity` events without reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Empties the batch, keeping its allocation.
    pub fn clear(&mut self) {
        self.events.clear();
        self.malformed = 0;
        self.padding = 0;
        self.latest = [None; CHANNELS];
        self.aborted = false;
    }

    /// Appends an event and tracks the channel's latest timestamp.
    #[inline]
    pub fn push(&mut self, event: DecodedEvent) {
        self.latest[event.channel.index()] = Some(event.timestamp);
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of address events in the batch.
    pub fn address_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_address()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_conversions() {
        assert_eq!(Polarity::from_bit(1), Polarity::On);
        assert_eq!(Polarity::from_bit(0), Polarity::Off);
        assert_eq!(Channel::from_bit(1), Channel::Right);
        assert_eq!(Channel::Left.bit(), 0);
        assert_eq!(Channel::Right.companion(), Channel::Left);
    }

    #[test]
    fn test_batch_tracks_latest_per_channel() {
        let mut batch = EventBatch::with_capacity(4);
        batch.push(DecodedEvent::address(1, 2, Polarity::On, Channel::Left, 10));
        batch.push(DecodedEvent::address(1, 2, Polarity::On, Channel::Right, 7));
        batch.push(DecodedEvent::marker(Channel::Left, 12));

        assert_eq!(batch.latest, [Some(12), Some(7)]);
        assert_eq!(batch.address_count(), 2);

        let cap = batch.events.capacity();
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.latest, [None, None]);
        assert_eq!(batch.events.capacity(), cap);
    }
}
