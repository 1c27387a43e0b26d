//! Framed ("bottled") record representation.
//!
//! A framed stream is a sequence of self-describing records. In memory they
//! are [`FramedRecord`] values; on disk each record starts with a tag byte:
//!
//! ```text
//! 0x01  address   u16 x | u16 y | u8 polarity | u8 channel | u8 valid
//! 0x02  timestamp u32 stamp
//! ```
//!
//! All multi-byte fields are little-endian. Any other tag cannot be skipped
//! because its length is unknown, so parsing stops there.

use crate::codec::DecodeError;
use crate::types::{Channel, Polarity};
use byteorder::{ByteOrder, LittleEndian};

pub const TAG_ADDRESS: u8 = 0x01;
pub const TAG_TIMESTAMP: u8 = 0x02;

const ADDRESS_PAYLOAD: usize = 7;
const TIMESTAMP_PAYLOAD: usize = 4;

/// A single typed record of a framed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramedRecord {
    /// Address event; `valid == false` records are skipped by the codec
    Address {
        x: u16,
        y: u16,
        polarity: Polarity,
        channel: Channel,
        valid: bool,
    },
    /// Clock value shared by both channels
    TimestampMarker { stamp: u32 },
    /// Record of a type this decoder does not understand
    Unknown { tag: String },
}

impl FramedRecord {
    /// Short type tag of the record ("AE", "TS" or the unknown tag).
    pub fn tag(&self) -> &str {
        match self {
            Self::Address { .. } => "AE",
            Self::TimestampMarker { .. } => "TS",
            Self::Unknown { tag } => tag,
        }
    }

    /// Convenience constructor for a valid address record.
    pub fn address(x: u16, y: u16, polarity: Polarity, channel: Channel) -> Self {
        Self::Address {
            x,
            y,
            polarity,
            channel,
            valid: true,
        }
    }
}

/// Parses framed records from `bytes`, appending them to `out`.
///
/// An unknown tag is appended as [`FramedRecord::Unknown`] and ends parsing;
/// the codec reports it when the batch is decoded.
pub fn read_records(bytes: &[u8], out: &mut Vec<FramedRecord>) -> Result<(), DecodeError> {
    let mut offset = 0;

    while offset < bytes.len() {
        let tag = bytes[offset];
        let body = &bytes[offset + 1..];

        match tag {
            TAG_ADDRESS => {
                if body.len() < ADDRESS_PAYLOAD {
                    return Err(DecodeError::Truncated {
                        offset,
                        needed: ADDRESS_PAYLOAD - body.len(),
                    });
                }
                out.push(FramedRecord::Address {
                    x: LittleEndian::read_u16(&body[0..2]),
                    y: LittleEndian::read_u16(&body[2..4]),
                    polarity: Polarity::from_bit(body[4] as u32),
                    channel: Channel::from_bit(body[5] as u32),
                    valid: body[6] != 0,
                });
                offset += 1 + ADDRESS_PAYLOAD;
            }
            TAG_TIMESTAMP => {
                if body.len() < TIMESTAMP_PAYLOAD {
                    return Err(DecodeError::Truncated {
                        offset,
                        needed: TIMESTAMP_PAYLOAD - body.len(),
                    });
                }
                out.push(FramedRecord::TimestampMarker {
                    stamp: LittleEndian::read_u32(&body[0..4]),
                });
                offset += 1 + TIMESTAMP_PAYLOAD;
            }
            other => {
                out.push(FramedRecord::Unknown {
                    tag: format!("0x{:02X}", other),
                });
                break;
            }
        }
    }

    Ok(())
}

/// Serialises records into the tagged wire form.
///
/// Unknown records are written as their tag byte when the tag is a `0xNN`
/// literal, otherwise as `0xFF`.
pub fn write_records(records: &[FramedRecord], out: &mut Vec<u8>) {
    for record in records {
        match record {
            FramedRecord::Address {
                x,
                y,
                polarity,
                channel,
                valid,
            } => {
                out.push(TAG_ADDRESS);
                out.extend_from_slice(&x.to_le_bytes());
                out.extend_from_slice(&y.to_le_bytes());
                out.push(polarity.bit() as u8);
                out.push(channel.bit() as u8);
                out.push(*valid as u8);
            }
            FramedRecord::TimestampMarker { stamp } => {
                out.push(TAG_TIMESTAMP);
                out.extend_from_slice(&stamp.to_le_bytes());
            }
            FramedRecord::Unknown { tag } => {
                let byte = tag
                    .strip_prefix("0x")
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .unwrap_or(0xFF);
                out.push(byte);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_address_and_marker() {
        let bytes = [
            0x02, 0x10, 0x27, 0x00, 0x00, // TS stamp=10000
            0x01, 0x05, 0x00, 0x07, 0x00, 0x01, 0x01, 0x01, // AE x=5 y=7 on right valid
        ];
        let mut records = Vec::new();
        read_records(&bytes, &mut records).unwrap();

        assert_eq!(
            records,
            vec![
                FramedRecord::TimestampMarker { stamp: 10_000 },
                FramedRecord::address(5, 7, Polarity::On, Channel::Right),
            ]
        );
    }

    #[test]
    fn test_unknown_tag_stops_parsing() {
        let bytes = [0x02, 0x01, 0x00, 0x00, 0x00, 0x7E, 0x02, 0x01, 0x00, 0x00, 0x00];
        let mut records = Vec::new();
        read_records(&bytes, &mut records).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].tag(), "0x7E");
    }

    #[test]
    fn test_truncated_record() {
        let bytes = [0x01, 0x05, 0x00];
        let mut records = Vec::new();
        let err = read_records(&bytes, &mut records).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { offset: 0, needed: 5 }));
    }

    #[test]
    fn test_write_matches_wire_form() {
        let records = vec![
            FramedRecord::TimestampMarker { stamp: 42 },
            FramedRecord::Address {
                x: 3,
                y: 4,
                polarity: Polarity::Off,
                channel: Channel::Left,
                valid: false,
            },
            FramedRecord::Unknown {
                tag: "0x33".to_string(),
            },
        ];
        let mut bytes = Vec::new();
        write_records(&records, &mut bytes);

        assert_eq!(bytes[0], TAG_TIMESTAMP);
        assert_eq!(bytes[5], TAG_ADDRESS);
        assert_eq!(*bytes.last().unwrap(), 0x33);

        let mut parsed = Vec::new();
        read_records(&bytes, &mut parsed).unwrap();
        assert_eq!(parsed, records);
    }
}
