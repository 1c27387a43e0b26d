//! The per-cycle decode, synchronise and accumulate loop.
//!
//! A [`Pipeline`] is driven by an external periodic task. Each call to
//! [`Pipeline::tick`] runs one cycle:
//!
//! 1. decode the cycle's input into the pipeline-owned [`EventBatch`]
//! 2. publish the batch's latest stamps to the [`SharedStamps`]
//! 3. step the [`Synchronizer`] to move both acceptance windows
//! 4. ingest the admitted events into the spatial maps
//! 5. apply the periodic forgetting step, if configured
//!
//! A cycle without input still runs steps 3 to 5, so the windows keep drifting
//! while the stream is silent.

use crate::accumulator::{AccumulationLaw, IngestStats, SpatialAccumulator, SpatialMap};
use crate::clock::{ClockState, Window};
use crate::codec::{Codec, Input, SourceKind};
use crate::config::{ConfigError, PipelineConfig};
use crate::handoff::InputHandoff;
use crate::sync::{SharedStamps, Synchronizer};
use crate::types::{Channel, EventBatch, CHANNELS};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// What happened during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CycleReport {
    /// 1-based cycle index
    pub cycle: u64,
    /// Address events decoded from the input
    pub decoded: u64,
    pub ingested: u64,
    pub outside_window: u64,
    pub out_of_range: u64,
    pub malformed: u64,
    pub padding: u64,
    pub markers: u64,
    /// The framed input stopped at an unknown record
    pub aborted: bool,
    pub wrapped: bool,
    pub hard_reset: bool,
    /// A forgetting step ran after ingestion
    pub decayed: bool,
    /// Acceptance windows used for this cycle
    pub windows: [Window; CHANNELS],
}

/// Counters accumulated over the pipeline's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub cycles: u64,
    /// Cycles that ran without input
    pub idle_cycles: u64,
    pub decoded: u64,
    pub ingested: u64,
    pub outside_window: u64,
    pub out_of_range: u64,
    pub malformed: u64,
    pub padding: u64,
    pub aborted_batches: u64,
    pub hard_resets: u64,
    pub wraps: u64,
    pub decays: u64,
}

impl PipelineStats {
    fn record(&mut self, report: &CycleReport, idle: bool) {
        self.cycles += 1;
        self.idle_cycles += idle as u64;
        self.decoded += report.decoded;
        self.ingested += report.ingested;
        self.outside_window += report.outside_window;
        self.out_of_range += report.out_of_range;
        self.malformed += report.malformed;
        self.padding += report.padding;
        self.aborted_batches += report.aborted as u64;
        self.hard_resets += report.hard_reset as u64;
        self.wraps += report.wrapped as u64;
        self.decays += report.decayed as u64;
    }
}

/// Converts a cycle interval given in microseconds.
///
/// Returns `None` for negative, NaN, infinite or out-of-range values.
pub fn interval_from_us(interval_us: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(interval_us / 1e6).ok()
}

/// Owns the clocks, maps and scratch batch of a running pipeline.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    codec: Codec,
    batch: EventBatch,
    stamps: SharedStamps,
    sync: Synchronizer,
    accumulator: SpatialAccumulator,
    stats: PipelineStats,
    last_step: Option<Instant>,
}

impl Pipeline {
    /// Builds a pipeline from a validated configuration.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let stamps = SharedStamps::new();
        let sync = Synchronizer::new(config.clock_params(), config.sync_params(), stamps.clone());
        let capacity = config.chunk_size / crate::codec::RECORD_SIZE;

        Ok(Self {
            codec: Codec::for_source(config.source, config.layout()),
            batch: EventBatch::with_capacity(capacity),
            stamps,
            sync,
            accumulator: SpatialAccumulator::new(config.map_size),
            stats: PipelineStats::default(),
            last_step: None,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one cycle on `input`, `interval` after the previous cycle.
    ///
    /// `None` means no buffer was available this cycle.
    pub fn tick(&mut self, input: Option<&Input>, interval: Duration) -> CycleReport {
        let law = self.decode(input);

        for channel in Channel::ALL {
            if let Some(stamp) = self.batch.latest[channel.index()] {
                self.stamps.post(channel, stamp);
            }
        }

        let outcome = self.sync.step(interval);
        let ingest = self
            .accumulator
            .ingest(&self.batch, &outcome.windows, law, &self.stamps);

        let cycle = self.sync.cycle();
        let decayed = self.config.decay_every > 0 && cycle % self.config.decay_every == 0;
        if decayed {
            self.accumulator.forget(self.config.decay_step);
        }

        let report = self.report(cycle, ingest, outcome.windows, decayed);
        let report = CycleReport {
            wrapped: outcome.wrapped,
            hard_reset: outcome.hard_reset,
            ..report
        };
        self.stats.record(&report, input.is_none());

        trace!(
            cycle,
            decoded = report.decoded,
            ingested = report.ingested,
            outside = report.outside_window,
            "cycle complete"
        );
        report
    }

    /// Decodes `input` into the scratch batch and returns the law for it.
    fn decode(&mut self, input: Option<&Input>) -> AccumulationLaw {
        self.batch.clear();

        let Some(input) = input else {
            trace!("no input buffer this cycle");
            return self.config.law(self.codec.kind());
        };

        let kind = input.kind();
        let codec = if kind == self.codec.kind() {
            self.codec
        } else {
            debug!(
                configured = ?self.codec.kind(),
                received = ?kind,
                "decoding input with its own codec"
            );
            Codec::for_source(kind, self.config.layout())
        };

        let carry = Channel::ALL.map(|ch| self.stamps.latest(ch).unwrap_or(0));
        if let Err(e) = codec.decode(input, carry, &mut self.batch) {
            warn!(error = %e, kept = self.batch.len(), "batch decode stopped early");
        }
        self.config.law(kind)
    }

    fn report(
        &self,
        cycle: u64,
        ingest: IngestStats,
        windows: [Window; CHANNELS],
        decayed: bool,
    ) -> CycleReport {
        CycleReport {
            cycle,
            decoded: self.batch.address_count() as u64,
            ingested: ingest.ingested,
            outside_window: ingest.outside_window,
            out_of_range: ingest.out_of_range,
            malformed: self.batch.malformed,
            padding: self.batch.padding,
            markers: ingest.markers,
            aborted: self.batch.aborted,
            decayed,
            windows,
            ..CycleReport::default()
        }
    }

    /// Runs one cycle, measuring the interval since the previous call.
    ///
    /// The first call uses the configured cycle period.
    pub fn step(&mut self, input: Option<&Input>) -> CycleReport {
        let now = Instant::now();
        let interval = self
            .last_step
            .map(|prev| now.duration_since(prev))
            .unwrap_or_else(|| self.config.cycle_period());
        self.last_step = Some(now);
        self.tick(input, interval)
    }

    /// Runs one cycle on whatever `handoff` holds, waiting at most the
    /// configured handoff wait for its lock.
    pub fn poll(&mut self, handoff: &InputHandoff<Input>) -> CycleReport {
        let input = handoff.take(self.config.handoff_wait());
        self.step(input.as_ref())
    }

    /// Applies one forgetting step to both maps.
    pub fn forget(&mut self) {
        self.accumulator.forget(self.config.decay_step);
    }

    /// Zeroes both maps.
    pub fn reset(&mut self) {
        self.accumulator.reset();
    }

    /// Forces both clocks back to zero.
    pub fn reset_clocks(&mut self) {
        let interval_us = self.config.cycle_period().as_secs_f64() * 1e6;
        self.sync.hard_reset(interval_us);
    }

    /// Switches the input format and map size. The maps are reallocated and
    /// their contents discarded.
    pub fn set_mode(&mut self, source: SourceKind, map_size: usize) -> Result<(), ConfigError> {
        let config = PipelineConfig {
            source,
            map_size,
            ..self.config.clone()
        };
        config.validate()?;

        debug!(?source, map_size, "switching mode");
        self.codec = Codec::for_source(source, config.layout());
        if map_size != self.accumulator.size() {
            self.accumulator.resize(map_size);
        } else {
            self.accumulator.reset();
        }
        self.config = config;
        Ok(())
    }

    pub fn maps(&self) -> &[SpatialMap; CHANNELS] {
        self.accumulator.maps()
    }

    pub fn map(&self, channel: Channel) -> &SpatialMap {
        self.accumulator.map(channel)
    }

    pub fn clock(&self, channel: Channel) -> &ClockState {
        self.sync.state(channel)
    }

    pub fn windows(&self) -> [Window; CHANNELS] {
        self.sync.windows()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Handle to the shared stamps, for a receiver that posts markers.
    pub fn stamps(&self) -> SharedStamps {
        self.stamps.clone()
    }

    /// The batch decoded during the last cycle.
    pub fn batch(&self) -> &EventBatch {
        &self.batch
    }
}
