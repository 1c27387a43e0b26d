//! Writers for accumulated spatial maps.
//!
//! Maps can be dumped as CSV (one line per cell) or as a compact binary file
//! holding both channels' intensity and timestamp arrays.

use crate::accumulator::SpatialMap;
use crate::types::Channel;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Magic bytes at the start of a binary map file.
pub const MAP_MAGIC: &[u8; 8] = b"AERMAP\0\0";
/// Current binary map file version.
pub const MAP_VERSION: u32 = 1;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Map file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapFormat {
    #[default]
    Csv,
    Binary,
}

impl MapFormat {
    /// Picks the format from a file extension (`.csv` or `.bin`).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, OutputError> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        ext.parse()
    }
}

impl std::str::FromStr for MapFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "bin" | "binary" => Ok(Self::Binary),
            other => Err(OutputError::InvalidFormat(format!(
                "Unknown map format: {}. Use csv or bin",
                other
            ))),
        }
    }
}

/// CSV writer for spatial maps.
///
/// Each map starts with a `%map:<size>,<channel>` line followed by one
/// `col,row,intensity,last_event` line per cell.
pub struct MapCsvWriter<W: Write> {
    writer: BufWriter<W>,
    skip_empty: bool,
}

impl<W: Write> MapCsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            skip_empty: false,
        }
    }

    /// Omits cells that were never hit and have zero intensity.
    pub fn skip_empty(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }

    /// Writes one channel's map.
    pub fn write_map(&mut self, channel: Channel, map: &SpatialMap) -> Result<(), OutputError> {
        let size = map.size();
        writeln!(self.writer, "%map:{},{}", size, channel)?;

        let cells = map.intensity().iter().zip(map.last_event());
        for (pos, (&value, &stamp)) in cells.enumerate() {
            if self.skip_empty && value == 0 && stamp == 0 {
                continue;
            }
            writeln!(self.writer, "{},{},{},{}", pos % size, pos / size, value, stamp)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Binary writer for spatial maps.
///
/// Layout, all little-endian:
/// - magic `AERMAP\0\0` (8 bytes)
/// - version: u32
/// - map size: u32
/// - channel count: u32
/// - per channel: `size * size` i32 intensities, then `size * size` u32
///   timestamps
pub struct MapBinaryWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> MapBinaryWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_header(&mut self, size: usize, channels: usize) -> Result<(), OutputError> {
        self.writer.write_all(MAP_MAGIC)?;
        self.writer.write_u32::<LittleEndian>(MAP_VERSION)?;
        self.writer.write_u32::<LittleEndian>(size as u32)?;
        self.writer.write_u32::<LittleEndian>(channels as u32)?;
        Ok(())
    }

    pub fn write_map(&mut self, map: &SpatialMap) -> Result<(), OutputError> {
        for &value in map.intensity() {
            self.writer.write_i32::<LittleEndian>(value)?;
        }
        for &stamp in map.last_event() {
            self.writer.write_u32::<LittleEndian>(stamp)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes maps to a CSV file, one block per channel.
pub fn write_csv<P: AsRef<Path>>(path: P, maps: &[SpatialMap]) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = MapCsvWriter::new(file);
    for (channel, map) in Channel::ALL.iter().zip(maps) {
        writer.write_map(*channel, map)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes maps to a binary file.
pub fn write_binary<P: AsRef<Path>>(path: P, maps: &[SpatialMap]) -> Result<(), OutputError> {
    let size = check_sizes(maps)?;
    let file = File::create(path)?;
    let mut writer = MapBinaryWriter::new(file);
    writer.write_header(size, maps.len())?;
    for map in maps {
        writer.write_map(map)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes maps in the format implied by the file extension.
pub fn write_maps<P: AsRef<Path>>(path: P, maps: &[SpatialMap]) -> Result<(), OutputError> {
    match MapFormat::from_path(&path)? {
        MapFormat::Csv => write_csv(path, maps),
        MapFormat::Binary => write_binary(path, maps),
    }
}

/// Intensity and timestamp arrays of one channel read back from a map file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMap {
    pub size: usize,
    pub intensity: Vec<i32>,
    pub last_event: Vec<u32>,
}

/// Reads a binary map file written by [`write_binary`].
pub fn read_binary<P: AsRef<Path>>(path: P) -> Result<Vec<StoredMap>, OutputError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAP_MAGIC {
        return Err(OutputError::InvalidFormat("not a map file".to_string()));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != MAP_VERSION {
        return Err(OutputError::InvalidFormat(format!(
            "unsupported map file version {}",
            version
        )));
    }
    let size = reader.read_u32::<LittleEndian>()? as usize;
    let channels = reader.read_u32::<LittleEndian>()? as usize;

    let cells = size * size;
    let mut maps = Vec::with_capacity(channels);
    for _ in 0..channels {
        let mut intensity = vec![0i32; cells];
        reader.read_i32_into::<LittleEndian>(&mut intensity)?;
        let mut last_event = vec![0u32; cells];
        reader.read_u32_into::<LittleEndian>(&mut last_event)?;
        maps.push(StoredMap {
            size,
            intensity,
            last_event,
        });
    }
    Ok(maps)
}

fn check_sizes(maps: &[SpatialMap]) -> Result<usize, OutputError> {
    let size = maps.first().map(|m| m.size()).unwrap_or(0);
    if maps.iter().any(|m| m.size() != size) {
        return Err(OutputError::InvalidFormat(
            "maps of different sizes cannot share a file".to_string(),
        ));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_format_parsing() {
        assert_eq!("CSV".parse::<MapFormat>().unwrap(), MapFormat::Csv);
        assert_eq!(MapFormat::from_path("out/maps.bin").unwrap(), MapFormat::Binary);
        assert!(MapFormat::from_path("maps.png").is_err());
        assert!(MapFormat::from_path("maps").is_err());
    }

    #[test]
    fn test_csv_writer() {
        let map = SpatialMap::new(2);
        let mut output = Vec::new();
        {
            let mut writer = MapCsvWriter::new(&mut output);
            writer.write_map(Channel::Right, &map).unwrap();
            writer.flush().unwrap();
        }

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "%map:2,right");
        assert_eq!(lines[1], "0,0,0,0");
        assert_eq!(lines[4], "1,1,0,0");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_csv_skip_empty() {
        let map = SpatialMap::new(4);
        let mut output = Vec::new();
        {
            let mut writer = MapCsvWriter::new(&mut output).skip_empty(true);
            writer.write_map(Channel::Left, &map).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(String::from_utf8(output).unwrap(), "%map:4,left\n");
    }

    #[test]
    fn test_binary_header() {
        let maps = [SpatialMap::new(3), SpatialMap::new(3)];
        let mut output = Vec::new();
        {
            let mut writer = MapBinaryWriter::new(&mut output);
            writer.write_header(3, 2).unwrap();
            for map in &maps {
                writer.write_map(map).unwrap();
            }
            writer.flush().unwrap();
        }

        assert_eq!(&output[0..8], MAP_MAGIC);
        assert_eq!(&output[8..12], &1u32.to_le_bytes());
        assert_eq!(&output[12..16], &3u32.to_le_bytes());
        assert_eq!(&output[16..20], &2u32.to_le_bytes());
        assert_eq!(output.len(), 20 + 2 * 9 * 8);
    }

    #[test]
    fn test_mixed_sizes_rejected() {
        let maps = [SpatialMap::new(3), SpatialMap::new(4)];
        assert!(matches!(check_sizes(&maps), Err(OutputError::InvalidFormat(_))));
    }
}
