use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, error, warn};

use super::{LOG_FILE_NAME, OutputFormat, ReportError, Reporter};

const LINE_PREFIX: &str = "PROFD";

/// Appends one line per event to `<dir>/profd.log`.
pub struct LogReporter {
    path: PathBuf,
    container: String,
    format: OutputFormat,
    writer: Mutex<Option<BufWriter<File>>>,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    container: &'a str,
    metric: &'a str,
    timestamp_ms: i64,
    value: f64,
    label: &'a str,
}

impl LogReporter {
    pub fn new(dir: impl AsRef<Path>, container: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            path: dir.as_ref().join(LOG_FILE_NAME),
            container: container.into(),
            format,
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format_line(
        &self,
        metric: &str,
        label: &str,
        value: f64,
        timestamp_ms: i64,
    ) -> Result<String, ReportError> {
        match self.format {
            OutputFormat::Tsv => Ok(format!(
                "{}\t{}\t{}\t{}\t{}\t{}",
                LINE_PREFIX, self.container, metric, timestamp_ms, value, label
            )),
            OutputFormat::Json => Ok(serde_json::to_string(&JsonLine {
                container: &self.container,
                metric,
                timestamp_ms,
                value,
                label,
            })?),
        }
    }

    fn write_line(&self, line: &str) -> Result<(), ReportError> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                Ok(())
            }
            None => {
                debug!("Reporter not started, dropping event");
                Ok(())
            }
        }
    }
}

impl Reporter for LogReporter {
    fn start(&self) -> Result<(), ReportError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        *self.writer.lock().unwrap_or_else(|e| e.into_inner()) = Some(BufWriter::new(file));
        debug!("Reporting to {}", self.path.display());
        Ok(())
    }

    fn stop(&self) {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.flush()
        {
            error!("Failed to flush {}: {}", self.path.display(), e);
        }
    }

    fn report_event(&self, metric: &str, label: &str, value: f64, timestamp_ms: i64) {
        let result = self
            .format_line(metric, label, value, timestamp_ms)
            .and_then(|line| self.write_line(&line));
        if let Err(e) = result {
            warn!("Dropping {} event: {}", metric, e);
        }
    }
}

impl Drop for LogReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
