use std::collections::HashMap;
use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::measure::Measure;

/// Handle to a measure present in a sink's registry.
///
/// Returned by [`MeasureSink::resolve`]; an unknown measure resolves to
/// `None` rather than a handle, so callers decide explicitly what to do
/// with values nobody subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureHandle(usize);

impl MeasureHandle {
    /// Creates a handle for a registry position. Sink implementations own
    /// the meaning of the position.
    pub fn new(position: usize) -> Self {
        Self(position)
    }

    /// The registry position this handle refers to.
    pub fn position(&self) -> usize {
        self.0
    }
}

/// One exported measure write.
#[derive(Debug, Clone, Serialize)]
pub struct MeasureRecord {
    pub timestamp: DateTime<Utc>,
    pub group: String,
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub dimension_values: HashMap<String, f64>,
}

/// Sink consumes finished measures and exports them.
pub trait MeasureSink: Send {
    /// Looks a measure up in the registry; `None` when nobody subscribed
    /// to it.
    fn resolve(&self, group: &str, name: &str) -> Option<MeasureHandle>;

    /// Records an adjusted measure value for a previously resolved handle.
    fn record(&self, handle: MeasureHandle, measure: &Measure) -> Result<()>;
}

/// Exports measures as one JSON object per line.
///
/// The registry is seeded with the monitor's measure catalog plus any
/// extra subscriptions from configuration; measures outside the registry
/// never reach the output.
pub struct JsonlSink {
    registry: Vec<(String, String)>,
    index: HashMap<(String, String), usize>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlSink {
    /// Creates a sink subscribed to `registry`, writing to `writer`.
    pub fn new(registry: Vec<(String, String)>, writer: Box<dyn Write + Send>) -> Self {
        let index = registry
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.clone(), position))
            .collect();

        Self {
            registry,
            index,
            writer: Mutex::new(writer),
        }
    }
}

impl MeasureSink for JsonlSink {
    fn resolve(&self, group: &str, name: &str) -> Option<MeasureHandle> {
        self.index
            .get(&(group.to_string(), name.to_string()))
            .map(|position| MeasureHandle(*position))
    }

    fn record(&self, handle: MeasureHandle, measure: &Measure) -> Result<()> {
        let (group, name) = self
            .registry
            .get(handle.0)
            .context("measure handle out of range")?;

        let record = MeasureRecord {
            timestamp: Utc::now(),
            group: group.clone(),
            name: name.clone(),
            value: measure.value(),
            dimension: measure.dimension().map(str::to_string),
            dimension_values: measure.dimension_values(),
        };

        let line = serde_json::to_string(&record).context("encoding measure record")?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{line}").context("writing measure record")?;
        writer.flush().context("flushing measure record")?;

        Ok(())
    }
}
