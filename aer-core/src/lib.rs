//! Dual-channel AER event pipeline with spatial saliency maps.
//!
//! This crate decodes address-event streams from a stereo pair of event-driven
//! vision sensors, keeps the two sensors' independent, wrapping and drifting
//! hardware clocks aligned with wall-clock time, and accumulates the events
//! that fall inside each channel's acceptance window into a bounded, decaying
//! spatial map.
//!
//! # Example
//!
//! ```no_run
//! use aer_core::{Channel, Input, Pipeline, PipelineConfig};
//! use std::time::Duration;
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
//! let chunk = std::fs::read("recording.aer").unwrap();
//!
//! let report = pipeline.tick(Some(&Input::Packed(chunk)), Duration::from_millis(5));
//! println!("Ingested {} of {} events", report.ingested, report.decoded);
//! println!("Active cells: {}", pipeline.map(Channel::Left).active_cells());
//! ```
//!
//! # Features
//!
//! - Packed 8-byte records with configurable address layouts, and framed
//!   record sequences with timestamp markers
//! - Per-channel clock tracking with wraparound handling and stuck-clock
//!   recovery
//! - Mirrored spatial maps with clipped or unclipped accumulation and a
//!   forgetting step
//! - Lock-bounded handoff of input buffers from a producer thread
//! - CSV and binary map output

pub mod accumulator;
pub mod clock;
pub mod codec;
pub mod config;
pub mod frame;
pub mod handoff;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use accumulator::{AccumulationLaw, IngestStats, SpatialAccumulator, SpatialMap};
pub use clock::{ClockParams, ClockState, ClockTracker, Window};
pub use codec::{Codec, DecodeError, Input, PackedCodec, SourceKind};
pub use config::{ConfigError, PipelineConfig};
pub use frame::FramedRecord;
pub use handoff::InputHandoff;
pub use layout::{AddressLayout, SensorModel};
pub use output::{MapFormat, OutputError};
pub use pipeline::{CycleReport, Pipeline, PipelineStats};
pub use sync::{SharedStamps, SyncParams, Synchronizer};
pub use types::{Channel, DecodedEvent, EventBatch, EventKind, Polarity, CHANNELS};
