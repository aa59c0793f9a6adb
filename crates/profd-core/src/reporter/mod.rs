//! Reporting sinks.
//!
//! A sink receives every metric event emitted by the profilers. It is started
//! before the first profiler and stopped after the last one has been drained.
//! Failures inside the sink are logged there; profilers never see them.

mod log;
mod memory;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub use log::LogReporter;
pub use memory::{MemoryReporter, SinkCall};

/// File name written by [`LogReporter`] inside its directory.
pub const LOG_FILE_NAME: &str = "profd.log";

/// A single emitted measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    pub metric: String,
    pub label: String,
    pub value: f64,
    pub timestamp_ms: i64,
}

impl MetricEvent {
    pub fn new(metric: &str, label: &str, value: f64, timestamp_ms: i64) -> Self {
        Self {
            metric: metric.to_string(),
            label: label.to_string(),
            value,
            timestamp_ms,
        }
    }
}

#[derive(Debug)]
pub enum ReportError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Io(e) => write!(f, "reporter I/O error: {}", e),
            ReportError::Serialize(e) => write!(f, "reporter serialization error: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<std::io::Error> for ReportError {
    fn from(e: std::io::Error) -> Self {
        ReportError::Io(e)
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::Serialize(e)
    }
}

/// Destination of metric events.
pub trait Reporter: Send + Sync {
    fn start(&self) -> Result<(), ReportError>;

    /// Flushes and releases resources. Events reported afterwards are dropped.
    fn stop(&self);

    fn report_event(&self, metric: &str, label: &str, value: f64, timestamp_ms: i64);
}

/// Line format of [`LogReporter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `PROFD\t<container>\t<metric>\t<timestamp>\t<value>\t<label>`
    #[default]
    Tsv,
    /// One JSON object per line.
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tsv" => Ok(OutputFormat::Tsv),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}': expected tsv or json", other)),
        }
    }
}

/// Identifies the emitting process: `<hostname>_<pid>`.
pub fn default_container_id() -> String {
    let host = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}_{}", host, std::process::id())
}
