//! Commands a transport hands to the probe.
//!
//! ```json
//! {"commandType":"ADD_LIVE_INSTRUMENT","instruments":[{"type":"LOG", ...}]}
//! {"commandType":"REMOVE_LIVE_INSTRUMENT","locations":[{"source":"com.example.Foo","line":12}]}
//! ```

use super::model::{LiveInstrument, LiveSourceLocation};
use super::service::LiveInstrumentService;
use super::Instrumentation;
use crate::event::{InitialInstrumentsApplied, ProbeEvent};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveInstrumentCommand {
    AddLiveInstrument {
        instruments: Vec<LiveInstrument>,
    },
    RemoveLiveInstrument {
        #[serde(default)]
        instruments: Vec<LiveInstrument>,
        #[serde(default)]
        locations: Vec<LiveSourceLocation>,
    },
    SetInitialInstruments {
        instruments: Vec<LiveInstrument>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailure {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub applied: Vec<LiveInstrument>,
    pub removed: Vec<LiveInstrument>,
    pub failed: Vec<CommandFailure>,
}

impl LiveInstrumentCommand {
    pub fn execute<I: Instrumentation>(self, service: &LiveInstrumentService<I>) -> CommandResult {
        let mut result = CommandResult::default();
        match self {
            LiveInstrumentCommand::AddLiveInstrument { instruments } => {
                apply_all(service, instruments, &mut result);
            }
            LiveInstrumentCommand::SetInitialInstruments { instruments } => {
                let count = instruments.len();
                apply_all(service, instruments, &mut result);
                info!(count, failed = result.failed.len(), "initial instruments applied");
                service.sink().emit(ProbeEvent::InitialInstrumentsApplied(InitialInstrumentsApplied {
                    count,
                    failed: result.failed.len(),
                }));
            }
            LiveInstrumentCommand::RemoveLiveInstrument { instruments, locations } => {
                for instrument in instruments {
                    let location = &instrument.location;
                    result.removed.extend(service.remove_instrument(&location.source, location.line, Some(&instrument.id)));
                }
                for location in locations {
                    result.removed.extend(service.remove_instrument(&location.source, location.line, None));
                }
            }
        }
        result
    }
}

fn apply_all<I: Instrumentation>(
    service: &LiveInstrumentService<I>,
    instruments: Vec<LiveInstrument>,
    result: &mut CommandResult,
) {
    for instrument in instruments {
        let id = instrument.id.clone();
        match service.apply_instrument(instrument) {
            Ok(applied) => result.applied.push(applied),
            Err(err) => result.failed.push(CommandFailure { id, message: err.to_string() }),
        }
    }
}
