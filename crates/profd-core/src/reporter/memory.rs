use std::sync::{Mutex, MutexGuard};

use super::{MetricEvent, ReportError, Reporter};

/// Everything that happened to a [`MemoryReporter`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Start,
    Event(MetricEvent),
    Stop,
}

/// Keeps events in memory. Used by tests and by embedders that forward
/// events themselves.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    calls: Mutex<Vec<SinkCall>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn calls_mut(&self) -> MutexGuard<'_, Vec<SinkCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls_mut().clone()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.calls_mut()
            .iter()
            .filter_map(|c| match c {
                SinkCall::Event(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Events of one metric, in emission order.
    pub fn events_named(&self, metric: &str) -> Vec<MetricEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.metric == metric)
            .collect()
    }

    /// Value of the most recent event of `metric`.
    pub fn last_value(&self, metric: &str) -> Option<f64> {
        self.events_named(metric).last().map(|e| e.value)
    }

    pub fn clear(&self) {
        self.calls_mut().clear();
    }
}

impl Reporter for MemoryReporter {
    fn start(&self) -> Result<(), ReportError> {
        self.calls_mut().push(SinkCall::Start);
        Ok(())
    }

    fn stop(&self) {
        self.calls_mut().push(SinkCall::Stop);
    }

    fn report_event(&self, metric: &str, label: &str, value: f64, timestamp_ms: i64) {
        self.calls_mut().push(SinkCall::Event(MetricEvent::new(
            metric,
            label,
            value,
            timestamp_ms,
        )));
    }
}
