//! Live instrument lifecycle: registration, per-hit decisions, removal,
//! expiry and retry of instruments whose class is not loaded yet.

pub mod active;
pub mod command;
pub mod model;
pub mod scheduler;
pub mod service;
pub mod throttle;

pub use active::{ActiveLiveInstrument, InstrumentState, RemovalOutcome};
pub use command::{CommandFailure, CommandResult, LiveInstrumentCommand};
pub use model::{LiveInstrument, LiveSourceLocation};
pub use scheduler::Scheduler;
pub use service::LiveInstrumentService;
pub use throttle::Throttle;

use crate::error::ProbeError;
use std::time::{SystemTime, UNIX_EPOCH};

/// The host's view of loaded classes.
pub trait Instrumentation: Send + Sync {
    type Class: Clone + Send;

    /// The loaded class named `name` (dotted) first, followed by its loaded
    /// nested classes. Empty when `name` is not loaded.
    fn find_classes(&self, name: &str) -> Vec<Self::Class>;

    /// Asks the host to run the class file load hook again for `classes`.
    fn retransform(&self, classes: &[Self::Class]) -> Result<(), ProbeError>;
}

/// Told about every instrument that leaves the registry.
///
/// An instrument removed by the hit that finished it is announced once that
/// hit has been reported, see [`LiveInstrumentService::hit_reported`].
pub trait RemovalListener: Send + Sync {
    fn instrument_removed(&self, active: &ActiveLiveInstrument);
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
