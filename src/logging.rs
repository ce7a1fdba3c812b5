//! Diagnostic logging for the agent itself.
//!
//! Logs go to stderr of the target JVM. `JVMTI_PROBE_LOG` (an `EnvFilter`
//! directive such as `jvmti_probe=debug`) overrides the configured level.
//! Only the first call to [`init`] installs a subscriber; later calls are
//! no-ops, so embedding the crate in a process that already has one is fine.

use serde::Deserialize;
use std::sync::OnceLock;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "JVMTI_PROBE_LOG";

static INITIALIZED: OnceLock<bool> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Returns whether this call installed it.
pub fn init(level: &str, format: LogFormat) -> bool {
    let mut installed = false;
    INITIALIZED.get_or_init(|| {
        let registry = tracing_subscriber::registry().with(filter(level));
        let result = match format {
            LogFormat::Text => registry
                .with(fmt::layer().with_writer(std::io::stderr).with_target(true).with_ansi(false))
                .try_init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(std::io::stderr).with_current_span(false))
                .try_init(),
        };
        installed = result.is_ok();
        installed
    });
    installed
}

pub fn is_initialized() -> bool {
    INITIALIZED.get().is_some()
}
