//! Events emitted by the probe and the sinks that deliver them.

use crate::error::{ProbeError, Result};
use crate::instrument::model::{LiveInstrument, LiveSourceLocation, MeterType};
use crate::instrument::RemovalOutcome;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

pub const DEFAULT_EMITTER_WORKERS: usize = 5;
pub const DEFAULT_EMITTER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeEvent {
    InstrumentApplied(InstrumentApplied),
    InstrumentRemoved(InstrumentRemoved),
    BreakpointHit(BreakpointHit),
    LogHit(LogHit),
    Meter(MeterEvent),
    Span(SpanEvent),
    InitialInstrumentsApplied(InitialInstrumentsApplied),
}

impl ProbeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeEvent::InstrumentApplied(_) => "INSTRUMENT_APPLIED",
            ProbeEvent::InstrumentRemoved(_) => "INSTRUMENT_REMOVED",
            ProbeEvent::BreakpointHit(_) => "BREAKPOINT_HIT",
            ProbeEvent::LogHit(_) => "LOG_HIT",
            ProbeEvent::Meter(_) => "METER",
            ProbeEvent::Span(_) => "SPAN",
            ProbeEvent::InitialInstrumentsApplied(_) => "INITIAL_INSTRUMENTS_APPLIED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentApplied {
    pub instrument: LiveInstrument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRemoved {
    pub instrument: LiveInstrument,
    pub occurred_at: i64,
    pub outcome: RemovalOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i32>,
}

/// One captured variable; `value` has the serializer's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedVariable {
    pub name: String,
    pub scope: crate::context::Scope,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointHit {
    pub breakpoint_id: String,
    pub occurred_at: i64,
    pub location: LiveSourceLocation,
    pub thread_name: String,
    pub stack_trace: Vec<StackFrame>,
    pub variables: Vec<CapturedVariable>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogHit {
    pub log_id: String,
    pub occurred_at: i64,
    pub location: LiveSourceLocation,
    pub log_format: String,
    pub log_arguments: BTreeMap<String, String>,
    pub message: String,
    pub thread_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterEvent {
    pub meter_id: String,
    pub metric_id: String,
    pub meter_type: MeterType,
    pub tags: BTreeMap<String, String>,
    pub value: f64,
    /// Rendered result of a `VALUE_EXPRESSION` gauge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    pub occurred_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanEvent {
    pub span_id: String,
    pub operation_name: String,
    pub started_at: i64,
    pub ended_at: i64,
    pub duration_micros: u64,
    pub thread_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialInstrumentsApplied {
    pub count: usize,
    pub failed: usize,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProbeEvent);

    fn flush(&self) {}
}

/// Writes every event to the log as a JSON payload.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: ProbeEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => info!(target: "jvmti_probe::events", event = event.name(), %payload),
            Err(err) => warn!(event = event.name(), "failed to encode event: {err}"),
        }
    }
}

/// Appends one JSON document per line.
pub struct JsonLinesSink {
    out: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProbeError::Io(path.display().to_string(), e))?;
        Ok(JsonLinesSink { out: Mutex::new(BufWriter::new(file)) })
    }
}

impl EventSink for JsonLinesSink {
    fn emit(&self, event: ProbeEvent) {
        let mut out = self.out.lock();
        let written = serde_json::to_writer(&mut *out, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(err) = written {
            warn!(event = event.name(), "failed to write event: {err}");
        }
    }

    fn flush(&self) {
        if let Err(err) = self.out.lock().flush() {
            warn!("failed to flush event file: {err}");
        }
    }
}

/// Hands events to a bounded worker pool in front of another sink, so
/// instrumented threads never wait on sink I/O. A full queue drops the event.
pub struct AsyncSink {
    sender: Mutex<Option<Sender<ProbeEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    inner: Arc<dyn EventSink>,
}

impl AsyncSink {
    pub fn new(inner: Arc<dyn EventSink>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = bounded::<ProbeEvent>(capacity.max(1));
        let handles = (0..workers.max(1))
            .filter_map(|n| {
                let receiver = receiver.clone();
                let sink = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("probe-emitter-{n}"))
                    .spawn(move || {
                        for event in receiver {
                            sink.emit(event);
                        }
                    })
                    .map_err(|err| warn!("failed to start emitter thread: {err}"))
                    .ok()
            })
            .collect();
        AsyncSink { sender: Mutex::new(Some(sender)), workers: Mutex::new(handles), inner }
    }

    /// Stops accepting events, drains the queue and joins the workers.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                warn!("emitter thread panicked");
            }
        }
        self.inner.flush();
    }
}

impl EventSink for AsyncSink {
    fn emit(&self, event: ProbeEvent) {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            warn!(event = event.name(), "emitter stopped, dropping event");
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!(event = event.name(), "event queue full, dropping event"),
            Err(TrySendError::Disconnected(event)) => warn!(event = event.name(), "emitter stopped, dropping event"),
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

impl Drop for AsyncSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProbeEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<ProbeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ProbeEvent) {
        self.events.lock().push(event);
    }
}
