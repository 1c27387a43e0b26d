//! AER saliency CLI application.
//!
//! Replays a recorded packed or framed AER stream through the pipeline and
//! writes the final spatial maps.

use aer_core::codec::RECORD_SIZE;
use aer_core::frame;
use aer_core::{
    output, Channel, Input, InputHandoff, MapFormat, Pipeline, PipelineConfig, SensorModel,
    SourceKind,
};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Stereo AER stream replayer.
///
/// Feeds a recording through the decode, clock synchronisation and
/// accumulation pipeline and writes both channels' saliency maps.
#[derive(Parser, Debug)]
#[command(name = "aer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input recording path
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file path (.csv, .bin)
    ///
    /// The output format is determined by the file extension:
    /// - .csv: one line per map cell (human-readable)
    /// - .bin: both channels' arrays (efficient, for programmatic access)
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// JSON configuration file; flags below override its values
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Input format (packed, framed)
    #[arg(short, long)]
    source: Option<SourceKind>,

    /// Sensor model (dvs128, dvs32)
    #[arg(long)]
    sensor: Option<SensorModel>,

    /// Side length of each channel's map
    #[arg(short, long)]
    map_size: Option<usize>,

    /// Bytes of packed input per cycle
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Cycle period in microseconds
    #[arg(long, value_name = "US")]
    cycle_us: Option<u64>,

    /// Forget every N cycles (0 = never)
    #[arg(short, long, value_name = "N")]
    decay_every: Option<u64>,

    /// Track the left channel only
    #[arg(long)]
    mono: bool,

    /// Omit untouched cells from CSV output
    #[arg(long)]
    sparse: bool,

    /// Feed input from a reader thread at the cycle period instead of
    /// replaying as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => PipelineConfig::default(),
        };

        if let Some(source) = self.source {
            config.source = source;
        }
        if let Some(sensor) = self.sensor {
            config.sensor = sensor;
        }
        if let Some(map_size) = self.map_size {
            config.map_size = map_size;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(cycle_us) = self.cycle_us {
            config.cycle_period_us = cycle_us;
        }
        if let Some(decay_every) = self.decay_every {
            config.decay_every = decay_every;
        }
        if self.mono {
            config.stereo = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn init_logging(level: &str) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")
}

/// Splits the recording into one input per cycle.
fn load_inputs(data: &[u8], config: &PipelineConfig) -> Result<Vec<Input>> {
    match config.source {
        SourceKind::Packed => Ok(data
            .chunks(config.chunk_size)
            .map(|chunk| Input::Packed(chunk.to_vec()))
            .collect()),
        SourceKind::Framed => {
            let mut records = Vec::new();
            frame::read_records(data, &mut records).context("Failed to parse framed recording")?;
            let per_cycle = (config.chunk_size / RECORD_SIZE).max(1);
            Ok(records
                .chunks(per_cycle)
                .map(|chunk| Input::Framed(chunk.to_vec()))
                .collect())
        }
    }
}

/// Replays inputs back to back with a simulated cycle interval.
fn replay(pipeline: &mut Pipeline, inputs: &[Input], progress: &ProgressBar) {
    let interval = pipeline.config().cycle_period();
    for input in inputs {
        let report = pipeline.tick(Some(input), interval);
        if report.hard_reset || report.wrapped {
            debug!(cycle = report.cycle, "clock recovery during replay");
        }
        progress.inc(1);
    }
}

/// Publishes inputs from a reader thread and drives the pipeline at the
/// configured period.
fn run_realtime(pipeline: &mut Pipeline, inputs: Vec<Input>, progress: &ProgressBar) -> Result<u64> {
    let period = pipeline.config().cycle_period();
    let handoff = Arc::new(InputHandoff::new());
    let finished = Arc::new(AtomicBool::new(false));

    let reader = {
        let handoff = Arc::clone(&handoff);
        let finished = Arc::clone(&finished);
        thread::Builder::new()
            .name("aer-reader".to_string())
            .spawn(move || {
                for input in inputs {
                    handoff.publish(input);
                    thread::sleep(period);
                }
                finished.store(true, Ordering::Release);
            })
            .context("Failed to start reader thread")?
    };

    let mut next = Instant::now();
    while !finished.load(Ordering::Acquire) || handoff.is_pending() {
        let report = pipeline.poll(&handoff);
        if report.decoded > 0 || report.malformed > 0 {
            progress.inc(1);
        }

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    reader
        .join()
        .map_err(|_| anyhow::anyhow!("Reader thread panicked"))?;
    Ok(handoff.dropped())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let format = MapFormat::from_path(&args.output).context("Unsupported output format")?;
    let config = args.pipeline_config()?;
    info!(?config, "starting replay");

    let start_time = Instant::now();

    let data = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read {:?}", args.input))?;
    let inputs = load_inputs(&data, &config)?;

    // Setup progress bar
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(inputs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                .context("Invalid progress template")?,
        );
        pb.set_message(format!(
            "Replaying {:?}...",
            args.input.file_name().unwrap_or_default()
        ));
        pb
    };

    let mut pipeline = Pipeline::new(config).context("Failed to build pipeline")?;

    let dropped = if args.realtime {
        run_realtime(&mut pipeline, inputs, &progress)?
    } else {
        replay(&mut pipeline, &inputs, &progress);
        0
    };

    progress.set_message(format!(
        "Writing to {:?}...",
        args.output.file_name().unwrap_or_default()
    ));

    match format {
        MapFormat::Csv => {
            let file = std::fs::File::create(&args.output)
                .with_context(|| format!("Failed to create {:?}", args.output))?;
            let mut writer = output::MapCsvWriter::new(file).skip_empty(args.sparse);
            for (channel, map) in Channel::ALL.iter().zip(pipeline.maps()) {
                writer
                    .write_map(*channel, map)
                    .context("Failed to write CSV output")?;
            }
            writer.flush().context("Failed to write CSV output")?;
        }
        MapFormat::Binary => {
            output::write_binary(&args.output, pipeline.maps())
                .context("Failed to write binary output")?;
        }
    }

    let total_duration = start_time.elapsed();
    let stats = *pipeline.stats();

    progress.finish_with_message(format!(
        "Done! {} cycles in {:.2}s",
        stats.cycles,
        total_duration.as_secs_f64()
    ));

    if !args.quiet {
        // Print summary
        let size = pipeline.config().map_size;
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:          {:?}", args.input);
        eprintln!("  Output:         {:?}", args.output);
        eprintln!("  Cycles:         {} ({} idle)", stats.cycles, stats.idle_cycles);
        eprintln!("  Decoded:        {}", stats.decoded);
        eprintln!("  Ingested:       {}", stats.ingested);
        eprintln!("  Outside window: {}", stats.outside_window);
        eprintln!("  Malformed:      {}", stats.malformed);
        eprintln!("  Aborted:        {}", stats.aborted_batches);
        eprintln!("  Wraps:          {}", stats.wraps);
        eprintln!("  Hard resets:    {}", stats.hard_resets);
        if args.realtime {
            eprintln!("  Dropped inputs: {}", dropped);
        }
        for channel in Channel::ALL {
            eprintln!(
                "  Active cells:   {} {}/{}",
                channel,
                pipeline.map(channel).active_cells(),
                size * size
            );
        }
        eprintln!("  Duration:       {:.3}s", total_duration.as_secs_f64());
    }

    Ok(())
}
