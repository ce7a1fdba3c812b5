//! Agent configuration.
//!
//! Loaded from a YAML file named in the agent options:
//!
//! ```text
//! -agentpath:libjvmti_probe.so=config=/etc/probe.yml,log=debug,events=/tmp/events.jsonl
//! ```
//!
//! Every key is optional; see [`ProbeConfig`] for the defaults.

use crate::error::{ProbeError, Result};
use crate::event::{DEFAULT_EMITTER_CAPACITY, DEFAULT_EMITTER_WORKERS};
use crate::hooks::DEFAULT_HOOK_CLASS;
use crate::instrument::model::LiveInstrument;
use crate::instrument::scheduler::{DEFAULT_RETRY_INTERVAL, DEFAULT_SWEEP_INTERVAL};
use crate::logging::LogFormat;
use crate::serialize::VariableControl;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sweep_interval_ms: u64,
    pub retry_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
        }
    }
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    pub workers: usize,
    pub capacity: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self { workers: DEFAULT_EMITTER_WORKERS, capacity: DEFAULT_EMITTER_CAPACITY }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// JSON-lines file receiving every event; events are logged when unset.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub live_variable_control: VariableControl,
    pub scheduler: SchedulerConfig,
    pub emitter: EmitterConfig,
    pub events: EventsConfig,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Internal name of the generated hook class.
    pub hook_class: String,
    /// Applied once the VM is initialised.
    pub instruments: Vec<LiveInstrument>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            live_variable_control: VariableControl::default(),
            scheduler: SchedulerConfig::default(),
            emitter: EmitterConfig::default(),
            events: EventsConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            hook_class: DEFAULT_HOOK_CLASS.to_string(),
            instruments: Vec::new(),
        }
    }
}

impl ProbeConfig {
    /// `origin` names the source in error messages.
    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| ProbeError::Yaml(origin.to_string(), e))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ProbeError::Io(path.display().to_string(), e))?;
        Self::from_yaml_str(&text, &path.display().to_string())
    }

    /// Loads the file named by `config=`, then applies the other options.
    pub fn from_agent_options(options: &str) -> Result<Self> {
        let options = AgentOptions::parse(options)?;
        let mut config = match &options.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        options.apply(&mut config);
        Ok(config)
    }
}

/// The `key=value,...` string after `=` in `-agentpath`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOptions {
    pub config: Option<PathBuf>,
    pub log: Option<String>,
    pub events: Option<PathBuf>,
}

impl AgentOptions {
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = AgentOptions::default();
        for pair in options.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ProbeError::InvalidOption(pair.to_string()))?;
            let value = value.trim();
            if value.is_empty() {
                return Err(ProbeError::InvalidOption(pair.to_string()));
            }
            match key.trim() {
                "config" => parsed.config = Some(PathBuf::from(value)),
                "log" => parsed.log = Some(value.to_string()),
                "events" => parsed.events = Some(PathBuf::from(value)),
                _ => return Err(ProbeError::InvalidOption(pair.to_string())),
            }
        }
        Ok(parsed)
    }

    pub fn apply(&self, config: &mut ProbeConfig) {
        if let Some(level) = &self.log {
            config.log_level = level.clone();
        }
        if let Some(file) = &self.events {
            config.events.file = Some(file.clone());
        }
    }
}
