//! Agent configuration.
//!
//! The whole agent is configured from a single string such as
//!
//! ```text
//! reportingMs=5000,CPUTimeProfiler[profilingMs=500],StackTraceProfiler[profilingMs=20]
//! ```
//!
//! Bare `key=value` pairs are global settings. `Name[...]` blocks enable the
//! named profiler and carry its parameters. Profiler lookups fall back to the
//! global settings, so a global `reportingMs` applies to every profiler that
//! does not override it.
//!
//! ```
//! use profd_core::config::AgentConfig;
//!
//! let config = AgentConfig::parse("dir=/tmp,MemoryProfiler[reservedMB=512]").unwrap();
//! assert!(config.is_profiler_enabled("MemoryProfiler"));
//! assert_eq!(config.profiler_config("MemoryProfiler").get_i64_or("reservedMB", 0).unwrap(), 512);
//! ```

mod parser;

use std::collections::HashMap;

pub use parser::ParsedConfig;

/// Configuration errors. Always fatal: the agent does not start with a
/// partially understood configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The configuration string does not match the grammar.
    Syntax { position: usize, message: String },
    /// A parameter value could not be converted to the requested type.
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Syntax { position, message } => {
                write!(f, "config syntax error at {}: {}", position, message)
            }
            ConfigError::InvalidValue {
                key,
                value,
                expected,
            } => write!(f, "invalid value '{}' for '{}': expected {}", value, key, expected),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A flat set of `key=value` parameters with typed accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        self.parse_or(key, default, "an integer")
    }

    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        self.parse_or(key, default, "a number")
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        self.parse_or(key, default, "true or false")
    }

    fn parse_or<T: std::str::FromStr>(
        &self,
        key: &str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                expected,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a copy of `self` where missing keys are taken from `parent`.
    pub fn with_fallback(&self, parent: &Config) -> Config {
        let mut values = parent.values.clone();
        values.extend(self.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Config { values }
    }
}

/// Parsed agent configuration: global settings plus enabled profilers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentConfig {
    global: Config,
    profilers: HashMap<String, Config>,
}

impl AgentConfig {
    /// Parses a configuration string. An empty string enables nothing.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let parsed = parser::parse(input)?;
        Ok(Self::from(parsed))
    }

    pub fn global(&self) -> &Config {
        &self.global
    }

    /// Profilers are enabled by the presence of their block.
    pub fn is_profiler_enabled(&self, name: &str) -> bool {
        self.profilers.contains_key(name)
    }

    /// Effective parameters of a profiler: its own block over the global settings.
    pub fn profiler_config(&self, name: &str) -> Config {
        match self.profilers.get(name) {
            Some(own) => own.with_fallback(&self.global),
            None => self.global.clone(),
        }
    }

    /// Parameters written inside the profiler's own block, without fallback.
    pub fn profiler_params(&self, name: &str) -> Option<&Config> {
        self.profilers.get(name)
    }

    /// Names of the enabled profilers, sorted for stable registration order.
    pub fn profiler_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profilers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl From<ParsedConfig> for AgentConfig {
    fn from(parsed: ParsedConfig) -> Self {
        Self {
            global: Config::new(parsed.global),
            profilers: parsed
                .profilers
                .into_iter()
                .map(|(name, params)| (name, Config::new(params)))
                .collect(),
        }
    }
}
