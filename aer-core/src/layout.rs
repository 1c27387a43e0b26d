//! Bit layouts of packed AER address words.
//!
//! The packing of pixel coordinates, polarity and channel into the 32-bit
//! address word depends on the sensor model, so it is described by a table
//! ([`AddressLayout`]) rather than hard-coded masks.

use crate::types::{Channel, Polarity};
use serde::{Deserialize, Serialize};

/// Field positions inside a 32-bit address word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLayout {
    /// Bit holding the polarity (1 = ON)
    pub polarity_bit: u8,
    /// Lowest bit of the x field
    pub x_shift: u8,
    /// Width of the x field in bits
    pub x_bits: u8,
    /// Lowest bit of the y field
    pub y_shift: u8,
    /// Width of the y field in bits
    pub y_bits: u8,
    /// Bit holding the channel (1 = right)
    pub channel_bit: u8,
    /// Bit flagging a timestamp marker record, if the sensor emits them
    pub marker_bit: Option<u8>,
    /// Sensor width in pixels
    pub width: u16,
    /// Sensor height in pixels
    pub height: u16,
}

/// Demultiplexed fields of an address word, before range checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub x: u16,
    pub y: u16,
    pub polarity: Polarity,
    pub channel: Channel,
    pub marker: bool,
}

// ============================================================================
// Presets
// Bits: [31] marker | [15] channel | [14:8] y | [7:1] x | [0] polarity
// ============================================================================

impl AddressLayout {
    /// 128x128 DVS retina.
    pub const DVS128: AddressLayout = AddressLayout {
        polarity_bit: 0,
        x_shift: 1,
        x_bits: 7,
        y_shift: 8,
        y_bits: 7,
        channel_bit: 15,
        marker_bit: Some(31),
        width: 128,
        height: 128,
    };

    /// Same packing as [`AddressLayout::DVS128`] for a 32x32 subsampled
    /// retina; addresses beyond 32 are malformed.
    pub const DVS32: AddressLayout = AddressLayout {
        width: 32,
        height: 32,
        ..AddressLayout::DVS128
    };

    #[inline]
    fn field(word: u32, shift: u8, bits: u8) -> u32 {
        (word >> shift) & ((1u32 << bits) - 1)
    }

    /// Splits an address word into its fields.
    #[inline]
    pub fn unpack(&self, word: u32) -> Address {
        Address {
            x: Self::field(word, self.x_shift, self.x_bits) as u16,
            y: Self::field(word, self.y_shift, self.y_bits) as u16,
            polarity: Polarity::from_bit(word >> self.polarity_bit),
            channel: Channel::from_bit(word >> self.channel_bit),
            marker: self
                .marker_bit
                .map(|bit| (word >> bit) & 0x1 != 0)
                .unwrap_or(false),
        }
    }

    /// Packs fields into an address word. Inverse of [`AddressLayout::unpack`]
    /// for coordinates that fit their fields.
    #[inline]
    pub fn encode(&self, x: u16, y: u16, polarity: Polarity, channel: Channel) -> u32 {
        let x_mask = (1u32 << self.x_bits) - 1;
        let y_mask = (1u32 << self.y_bits) - 1;
        ((x as u32 & x_mask) << self.x_shift)
            | ((y as u32 & y_mask) << self.y_shift)
            | (polarity.bit() << self.polarity_bit)
            | (channel.bit() << self.channel_bit)
    }

    /// Packs a timestamp marker word for `channel`. Returns `None` when the
    /// layout has no marker bit.
    pub fn encode_marker(&self, channel: Channel) -> Option<u32> {
        self.marker_bit
            .map(|bit| (1u32 << bit) | (channel.bit() << self.channel_bit))
    }

    /// Whether decoded coordinates fall inside the sensor.
    #[inline]
    pub fn in_range(&self, x: u16, y: u16) -> bool {
        x < self.width && y < self.height
    }

    /// Checks that every field fits a 32-bit word without overlapping another
    /// field and that the sensor is non-empty.
    pub fn check(&self) -> Result<(), String> {
        let fits = |shift: u8, bits: u8| bits > 0 && bits <= 16 && shift as u32 + bits as u32 <= 32;
        if !fits(self.x_shift, self.x_bits) {
            return Err(format!("x field {}+{} does not fit", self.x_shift, self.x_bits));
        }
        if !fits(self.y_shift, self.y_bits) {
            return Err(format!("y field {}+{} does not fit", self.y_shift, self.y_bits));
        }
        let single = [Some(self.polarity_bit), Some(self.channel_bit), self.marker_bit];
        if single.iter().flatten().any(|&bit| bit >= 32) {
            return Err("single-bit field beyond bit 31".to_string());
        }

        let span = |shift: u8, bits: u8| ((1u32 << bits) - 1) << shift;
        let mut fields = vec![
            ("x", span(self.x_shift, self.x_bits)),
            ("y", span(self.y_shift, self.y_bits)),
            ("polarity", 1u32 << self.polarity_bit),
            ("channel", 1u32 << self.channel_bit),
        ];
        if let Some(bit) = self.marker_bit {
            fields.push(("marker", 1u32 << bit));
        }
        let mut taken = 0u32;
        for (name, mask) in fields {
            if taken & mask != 0 {
                return Err(format!("{} field overlaps another field", name));
            }
            taken |= mask;
        }

        if self.width == 0 || self.height == 0 {
            return Err("sensor dimensions must be positive".to_string());
        }
        Ok(())
    }
}

/// Supported sensor models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SensorModel {
    #[default]
    Dvs128,
    Dvs32,
    Custom(AddressLayout),
}

impl SensorModel {
    /// Returns the address layout for this model.
    pub fn layout(&self) -> AddressLayout {
        match self {
            Self::Dvs128 => AddressLayout::DVS128,
            Self::Dvs32 => AddressLayout::DVS32,
            Self::Custom(layout) => *layout,
        }
    }
}

impl std::str::FromStr for SensorModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dvs128" | "dvs" => Ok(Self::Dvs128),
            "dvs32" => Ok(Self::Dvs32),
            other => Err(format!("Unknown sensor model: {}. Use dvs128 or dvs32", other)),
        }
    }
}
