//! A scripted profiler for driver, scheduler and agent tests.

use std::sync::{Arc, Mutex};

use crate::profiler::{Aggregator, Profiler, ProfilerError, Sampler};
use crate::reporter::Reporter;

/// What to do when `sample` is called.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
}

/// Records every lifecycle call as `"<call>@<now>/<delta>"`.
pub struct Recorder {
    name: String,
    behavior: Behavior,
    calls: Arc<Mutex<Vec<String>>>,
    reporter: Option<Arc<dyn Reporter>>,
}

impl Recorder {
    pub fn new(name: &str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorder = Self {
            name: name.to_string(),
            behavior: Behavior::Succeed,
            calls: Arc::clone(&calls),
            reporter: None,
        };
        (recorder, calls)
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Emits a `REPORT` event named after the profiler on every `report`.
    pub fn reporting_to(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn count(calls: &Arc<Mutex<Vec<String>>>, prefix: &str) -> usize {
    calls
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.starts_with(prefix))
        .count()
}

impl Profiler for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, now_ms: i64) -> Result<(), ProfilerError> {
        self.record(format!("start@{}", now_ms));
        Ok(())
    }

    fn stop(&mut self, now_ms: i64, delta_ms: i64) -> Result<(), ProfilerError> {
        self.record(format!("stop@{}/{}", now_ms, delta_ms));
        Ok(())
    }
}

impl Sampler for Recorder {
    fn sample(&mut self, now_ms: i64, delta_ms: i64) -> Result<(), ProfilerError> {
        self.record(format!("sample@{}/{}", now_ms, delta_ms));
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(ProfilerError::Unsupported("scripted failure".to_string())),
            Behavior::Panic => panic!("scripted panic in {}", self.name),
        }
    }
}

impl Aggregator for Recorder {
    fn report(&mut self) -> Result<(), ProfilerError> {
        self.record("report".to_string());
        if let Some(reporter) = &self.reporter {
            reporter.report_event("REPORT", &self.name, 1.0, 0);
        }
        Ok(())
    }
}
