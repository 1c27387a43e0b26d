//! Python bindings for the AER saliency pipeline with numpy map access.
//!
//! This module exposes the pipeline as a Python object that is fed packed
//! chunks and returns both channels' maps as 2-D numpy arrays, plus a helper
//! that decodes packed bytes into columnar event arrays.

use aer_core::pipeline::interval_from_us;
use aer_core::{
    Channel, CycleReport, EventBatch, EventKind, Input, PackedCodec, Pipeline as CorePipeline,
    PipelineConfig, SensorModel,
};
use numpy::{IntoPyArray, PyArray1, PyArray2};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn parse_channel(name: &str) -> PyResult<Channel> {
    match name.trim().to_lowercase().as_str() {
        "left" | "l" | "0" => Ok(Channel::Left),
        "right" | "r" | "1" => Ok(Channel::Right),
        other => Err(PyValueError::new_err(format!(
            "Unknown channel: {}. Use left or right",
            other
        ))),
    }
}

fn report_dict<'py>(py: Python<'py>, report: &CycleReport) -> PyResult<&'py PyDict> {
    let dict = PyDict::new(py);
    dict.set_item("cycle", report.cycle)?;
    dict.set_item("decoded", report.decoded)?;
    dict.set_item("ingested", report.ingested)?;
    dict.set_item("outside_window", report.outside_window)?;
    dict.set_item("out_of_range", report.out_of_range)?;
    dict.set_item("malformed", report.malformed)?;
    dict.set_item("wrapped", report.wrapped)?;
    dict.set_item("hard_reset", report.hard_reset)?;
    dict.set_item("decayed", report.decayed)?;
    let windows: Vec<(f64, f64)> = report.windows.iter().map(|w| (w.low, w.high)).collect();
    dict.set_item("windows", windows)?;
    Ok(dict)
}

/// Stereo saliency pipeline.
///
/// Args:
///     config: Optional JSON configuration string; missing keys take their
///         defaults
///
/// Example:
///     >>> import aer
///     >>> pipeline = aer.Pipeline('{"decay_every": 10}')
///     >>> report = pipeline.feed(chunk, interval_us=5000)
///     >>> left = pipeline.intensity("left")  # (size, size) int32 array
#[pyclass]
pub struct Pipeline {
    inner: CorePipeline,
}

#[pymethods]
impl Pipeline {
    #[new]
    #[pyo3(signature = (config=None))]
    fn new(config: Option<&str>) -> PyResult<Self> {
        let config = match config {
            Some(json) => PipelineConfig::from_json_str(json)
                .map_err(|e| PyValueError::new_err(format!("Invalid config: {}", e)))?,
            None => PipelineConfig::default(),
        };
        let inner =
            CorePipeline::new(config).map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Loads the configuration from a JSON file.
    #[staticmethod]
    fn from_config_file(path: &str) -> PyResult<Self> {
        let config = PipelineConfig::from_json_file(path)
            .map_err(|e| PyIOError::new_err(format!("Failed to load config: {}", e)))?;
        let inner =
            CorePipeline::new(config).map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Runs one cycle on a chunk of packed records.
    ///
    /// Passing None runs an idle cycle in which the windows only drift.
    /// Returns a dict with the cycle's counters and windows.
    #[pyo3(signature = (data, interval_us=5000.0))]
    fn feed<'py>(
        &mut self,
        py: Python<'py>,
        data: Option<&[u8]>,
        interval_us: f64,
    ) -> PyResult<&'py PyDict> {
        let interval = interval_from_us(interval_us).ok_or_else(|| {
            PyValueError::new_err(format!(
                "interval_us must be finite and non-negative, got {}",
                interval_us
            ))
        })?;
        let input = data.map(|bytes| Input::Packed(bytes.to_vec()));
        let report = self.inner.tick(input.as_ref(), interval);
        report_dict(py, &report)
    }

    /// Applies one forgetting step to both maps.
    fn forget(&mut self) {
        self.inner.forget();
    }

    /// Zeroes both maps.
    fn reset(&mut self) {
        self.inner.reset();
    }

    /// Returns a channel's intensity map as a (size, size) int32 array.
    fn intensity<'py>(&self, py: Python<'py>, channel: &str) -> PyResult<&'py PyArray2<i32>> {
        let map = self.inner.map(parse_channel(channel)?);
        let size = map.size();
        map.intensity().to_vec().into_pyarray(py).reshape([size, size])
    }

    /// Returns a channel's last-event timestamps as a (size, size) uint32
    /// array.
    fn timestamps<'py>(&self, py: Python<'py>, channel: &str) -> PyResult<&'py PyArray2<u32>> {
        let map = self.inner.map(parse_channel(channel)?);
        let size = map.size();
        map.last_event().to_vec().into_pyarray(py).reshape([size, size])
    }

    /// Returns the (low, high) acceptance window of a channel.
    fn window(&self, channel: &str) -> PyResult<(f64, f64)> {
        let window = self.inner.windows()[parse_channel(channel)?.index()];
        Ok((window.low, window.high))
    }

    /// Side length of the maps.
    #[getter]
    fn map_size(&self) -> usize {
        self.inner.config().map_size
    }

    /// Counters accumulated since the pipeline was created.
    #[getter]
    fn stats<'py>(&self, py: Python<'py>) -> PyResult<&'py PyDict> {
        let stats = self.inner.stats();
        let dict = PyDict::new(py);
        dict.set_item("cycles", stats.cycles)?;
        dict.set_item("idle_cycles", stats.idle_cycles)?;
        dict.set_item("decoded", stats.decoded)?;
        dict.set_item("ingested", stats.ingested)?;
        dict.set_item("outside_window", stats.outside_window)?;
        dict.set_item("malformed", stats.malformed)?;
        dict.set_item("hard_resets", stats.hard_resets)?;
        dict.set_item("wraps", stats.wraps)?;
        Ok(dict)
    }

    fn __repr__(&self) -> String {
        let config = self.inner.config();
        format!(
            "Pipeline(map_size={}, source={:?}, cycles={})",
            config.map_size,
            config.source,
            self.inner.stats().cycles
        )
    }
}

/// Columnar view of decoded packed events.
#[pyclass]
pub struct Events {
    x: Vec<u16>,
    y: Vec<u16>,
    polarity: Vec<u8>,
    channel: Vec<u8>,
    timestamp: Vec<u32>,
    malformed: u64,
}

#[pymethods]
impl Events {
    fn __len__(&self) -> usize {
        self.x.len()
    }

    fn __repr__(&self) -> String {
        format!("Events(count={}, malformed={})", self.x.len(), self.malformed)
    }

    #[getter]
    fn x<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.x.clone().into_pyarray(py)
    }

    #[getter]
    fn y<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.y.clone().into_pyarray(py)
    }

    /// Values: 0 = OFF, 1 = ON
    #[getter]
    fn polarity<'py>(&self, py: Python<'py>) -> &'py PyArray1<u8> {
        self.polarity.clone().into_pyarray(py)
    }

    /// Values: 0 = left, 1 = right
    #[getter]
    fn channel<'py>(&self, py: Python<'py>) -> &'py PyArray1<u8> {
        self.channel.clone().into_pyarray(py)
    }

    /// Raw counter values
    #[getter]
    fn timestamp<'py>(&self, py: Python<'py>) -> &'py PyArray1<u32> {
        self.timestamp.clone().into_pyarray(py)
    }

    /// Records dropped as malformed.
    #[getter]
    fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Returns all arrays as a dictionary.
    fn to_dict(&self, py: Python<'_>) -> PyResult<PyObject> {
        let dict = PyDict::new(py);
        dict.set_item("x", self.x.clone().into_pyarray(py))?;
        dict.set_item("y", self.y.clone().into_pyarray(py))?;
        dict.set_item("polarity", self.polarity.clone().into_pyarray(py))?;
        dict.set_item("channel", self.channel.clone().into_pyarray(py))?;
        dict.set_item("timestamp", self.timestamp.clone().into_pyarray(py))?;
        Ok(dict.into())
    }
}

impl Events {
    /// Collects the address events of a batch; markers are left out.
    fn from_batch(batch: &EventBatch) -> Self {
        let len = batch.address_count();
        let mut events = Self {
            x: Vec::with_capacity(len),
            y: Vec::with_capacity(len),
            polarity: Vec::with_capacity(len),
            channel: Vec::with_capacity(len),
            timestamp: Vec::with_capacity(len),
            malformed: batch.malformed,
        };

        for event in batch.events.iter().filter(|e| e.kind == EventKind::Address) {
            events.x.push(event.x);
            events.y.push(event.y);
            events.polarity.push(event.polarity.bit() as u8);
            events.channel.push(event.channel.bit() as u8);
            events.timestamp.push(event.timestamp);
        }
        events
    }
}

/// Decodes packed AER bytes into columnar event arrays.
///
/// Args:
///     data: Packed 8-byte records (address word, timestamp word)
///     sensor: Sensor model (default: "dvs128")
///
/// Returns:
///     Events: Container with x, y, polarity, channel and timestamp arrays
///
/// Example:
///     >>> import aer
///     >>> events = aer.decode_packed(open("stereo.aer", "rb").read())
///     >>> print(f"Decoded {len(events)} events")
#[pyfunction]
#[pyo3(signature = (data, sensor="dvs128"))]
fn decode_packed(py: Python<'_>, data: &[u8], sensor: &str) -> PyResult<Py<Events>> {
    let model: SensorModel = sensor.parse().map_err(PyValueError::new_err)?;
    let codec = PackedCodec::new(model.layout());

    let mut batch = EventBatch::new();
    codec.decode(data, &mut batch);

    Py::new(py, Events::from_batch(&batch))
}

/// AER saliency pipeline module for Python.
#[pymodule]
fn aer(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(decode_packed, m)?)?;
    m.add_class::<Pipeline>()?;
    m.add_class::<Events>()?;
    Ok(())
}
