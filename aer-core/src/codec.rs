//! Decoding of raw sensor input into [`EventBatch`]es.
//!
//! Two wire formats are supported behind the [`Codec`] enum:
//!
//! - **Packed**: fixed 8-byte records, a little-endian address word followed
//!   by a little-endian timestamp word. The address is demultiplexed through
//!   the sensor's [`AddressLayout`].
//! - **Framed**: a sequence of typed [`FramedRecord`]s in which address
//!   records inherit the most recent timestamp marker.
//!
//! Codecs keep no state between calls; all output goes into the caller's
//! reusable batch.

use crate::frame::FramedRecord;
use crate::layout::AddressLayout;
use crate::types::{Channel, DecodedEvent, EventBatch, CHANNELS};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that can occur while decoding a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown record type: {tag}")]
    UnknownRecordType { tag: String },

    #[error("Truncated record at offset {offset}: {needed} more bytes needed")]
    Truncated { offset: usize, needed: usize },

    #[error("Input kind {found:?} does not match the configured {expected:?} source")]
    SourceMismatch {
        expected: SourceKind,
        found: SourceKind,
    },
}

/// Which wire format the pipeline consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Packed,
    Framed,
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "packed" | "raw" => Ok(Self::Packed),
            "framed" | "bottle" => Ok(Self::Framed),
            other => Err(format!("Unknown source kind: {}. Use packed or framed", other)),
        }
    }
}

/// One cycle's worth of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Raw chunk of packed records
    Packed(Vec<u8>),
    /// Pre-framed record container
    Framed(Vec<FramedRecord>),
}

impl Input {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Packed(_) => SourceKind::Packed,
            Self::Framed(_) => SourceKind::Framed,
        }
    }
}

/// Size of one packed record in bytes.
pub const RECORD_SIZE: usize = 8;

/// Decoder for fixed-size packed address/timestamp records.
#[derive(Debug, Clone, Copy)]
pub struct PackedCodec {
    layout: AddressLayout,
}

impl PackedCodec {
    pub fn new(layout: AddressLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &AddressLayout {
        &self.layout
    }

    /// Decodes every complete record of `raw` into `batch`.
    ///
    /// All-zero records are padding of a partly filled chunk and are skipped.
    /// Records with out-of-range coordinates and a trailing partial record are
    /// counted as malformed and dropped.
    pub fn decode(&self, raw: &[u8], batch: &mut EventBatch) {
        let records = raw.chunks_exact(RECORD_SIZE);
        let remainder = records.remainder().len();
        batch.events.reserve(raw.len() / RECORD_SIZE);

        for record in records {
            let word = LittleEndian::read_u32(&record[0..4]);
            let timestamp = LittleEndian::read_u32(&record[4..8]);

            if word == 0 && timestamp == 0 {
                batch.padding += 1;
                continue;
            }

            let addr = self.layout.unpack(word);

            if addr.marker {
                batch.push(DecodedEvent::marker(addr.channel, timestamp));
                continue;
            }

            if !self.layout.in_range(addr.x, addr.y) {
                trace!(word, x = addr.x, y = addr.y, "dropping malformed record");
                batch.malformed += 1;
                continue;
            }

            batch.push(DecodedEvent::address(
                addr.x,
                addr.y,
                addr.polarity,
                addr.channel,
                timestamp,
            ));
        }

        if remainder != 0 {
            debug!(remainder, "chunk ends in a partial record");
            batch.malformed += 1;
        }
    }

    /// Appends one packed record to `out`.
    pub fn encode_record(address: u32, timestamp: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&address.to_le_bytes());
        out.extend_from_slice(&timestamp.to_le_bytes());
    }
}

/// Decoder for framed record sequences.
#[derive(Debug, Clone, Copy)]
pub struct FramedCodec {
    width: u16,
    height: u16,
}

impl FramedCodec {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Decodes `records` into `batch`.
    ///
    /// Address records take the latest stamp seen so far in the batch, or
    /// `carry` for their channel before the first marker. A marker applies to
    /// every channel. An unknown record stops decoding: the prefix stays in the
    /// batch, the batch is marked aborted and the error is returned.
    pub fn decode(
        &self,
        records: &[FramedRecord],
        carry: [u32; CHANNELS],
        batch: &mut EventBatch,
    ) -> Result<(), DecodeError> {
        let mut stamp = carry;
        batch.events.reserve(records.len());

        for record in records {
            match *record {
                FramedRecord::Address {
                    x,
                    y,
                    polarity,
                    channel,
                    valid,
                } => {
                    if !valid {
                        continue;
                    }
                    if x >= self.width || y >= self.height {
                        batch.malformed += 1;
                        continue;
                    }
                    batch.push(DecodedEvent::address(
                        x,
                        y,
                        polarity,
                        channel,
                        stamp[channel.index()],
                    ));
                }
                FramedRecord::TimestampMarker { stamp: value } => {
                    for channel in Channel::ALL {
                        stamp[channel.index()] = value;
                        batch.push(DecodedEvent::marker(channel, value));
                    }
                }
                FramedRecord::Unknown { ref tag } => {
                    batch.aborted = true;
                    return Err(DecodeError::UnknownRecordType { tag: tag.clone() });
                }
            }
        }

        Ok(())
    }
}

/// A decoder for the configured source kind.
#[derive(Debug, Clone, Copy)]
pub enum Codec {
    Packed(PackedCodec),
    Framed(FramedCodec),
}

impl Codec {
    /// Builds the codec matching `kind` for a sensor with `layout`.
    pub fn for_source(kind: SourceKind, layout: AddressLayout) -> Self {
        match kind {
            SourceKind::Packed => Self::Packed(PackedCodec::new(layout)),
            SourceKind::Framed => Self::Framed(FramedCodec::new(layout.width, layout.height)),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Packed(_) => SourceKind::Packed,
            Self::Framed(_) => SourceKind::Framed,
        }
    }

    /// Decodes `input` into `batch` with this codec.
    pub fn decode(
        &self,
        input: &Input,
        carry: [u32; CHANNELS],
        batch: &mut EventBatch,
    ) -> Result<(), DecodeError> {
        match (self, input) {
            (Self::Packed(codec), Input::Packed(raw)) => {
                codec.decode(raw, batch);
                Ok(())
            }
            (Self::Framed(codec), Input::Framed(records)) => codec.decode(records, carry, batch),
            _ => Err(DecodeError::SourceMismatch {
                expected: self.kind(),
                found: input.kind(),
            }),
        }
    }
}
