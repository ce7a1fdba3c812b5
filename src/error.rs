//! Probe-wide error type.
//!
//! Each layer owns a narrower `thiserror` enum (class file, transform,
//! condition, heap); this one collects them for the service and agent.

use crate::classfile::ClassFileError;
use crate::condition::ConditionError;
use crate::sys::jvmti::jvmtiError;
use crate::transform::TransformError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure kinds reported back to whoever asked for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveInstrumentErrorType {
    ClassNotFound,
    ConditionalFailed,
}

impl fmt::Display for LiveInstrumentErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClassNotFound => f.write_str("CLASS_NOT_FOUND"),
            Self::ConditionalFailed => f.write_str("CONDITIONAL_FAILED"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("LiveInstrumentException[{kind}]: {message}")]
    LiveInstrument {
        kind: LiveInstrumentErrorType,
        message: String,
    },
    #[error("class file error: {0}")]
    ClassFile(#[from] ClassFileError),
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
    #[error("condition error: {0}")]
    Condition(#[from] ConditionError),
    #[error("retransformation of {classes:?} failed: {cause}")]
    Retransform { classes: Vec<String>, cause: String },
    #[error("JVMTI {call} failed: {error}")]
    Jvmti { call: &'static str, error: jvmtiError },
    #[error("JNI {0} failed")]
    Jni(&'static str),
    #[error("error reading {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("error parsing {0}: {1}")]
    Yaml(String, #[source] serde_yaml::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid agent option: {0}")]
    InvalidOption(String),
}

impl ProbeError {
    pub fn class_not_found(class_name: impl Into<String>) -> Self {
        ProbeError::LiveInstrument {
            kind: LiveInstrumentErrorType::ClassNotFound,
            message: class_name.into(),
        }
    }

    pub fn conditional_failed(message: impl Into<String>) -> Self {
        ProbeError::LiveInstrument {
            kind: LiveInstrumentErrorType::ConditionalFailed,
            message: message.into(),
        }
    }

    pub fn jvmti(call: &'static str) -> impl FnOnce(jvmtiError) -> Self {
        move |error| ProbeError::Jvmti { call, error }
    }

    /// The requester-facing error kind, if this is one.
    pub fn instrument_error_type(&self) -> Option<LiveInstrumentErrorType> {
        match self {
            ProbeError::LiveInstrument { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T, E = ProbeError> = std::result::Result<T, E>;
