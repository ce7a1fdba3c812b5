//! Builds hit events from the values captured for one instrument.

use crate::context::ContextMap;
use crate::event::{BreakpointHit, CapturedVariable, LogHit, ProbeEvent, SpanEvent, StackFrame};
use crate::heap::{display_value, Heap, Value};
use crate::instrument::model::{InstrumentKind, LiveSourceLocation};
use crate::instrument::ActiveLiveInstrument;
use crate::serialize::{Serializer, VariableControl};
use std::collections::BTreeMap;
use tracing::warn;

/// Replaces each `{}` in `format` with the next argument. Placeholders
/// beyond the last argument are kept as written.
pub fn format_message(format: &str, arguments: &[String]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = arguments.iter();
    let mut rest = format;
    while let Some(at) = rest.find("{}") {
        out.push_str(&rest[..at]);
        match args.next() {
            Some(arg) => out.push_str(arg),
            None => out.push_str("{}"),
        }
        rest = &rest[at + 2..];
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Default)]
pub struct Reporter {
    control: VariableControl,
}

impl Reporter {
    pub fn new(control: VariableControl) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &VariableControl {
        &self.control
    }

    /// `source` and `line` are what the injected call passed: the class the
    /// breakpoint was placed in and its line.
    #[allow(clippy::too_many_arguments)]
    pub fn breakpoint_hit<H: Heap>(
        &self,
        heap: &H,
        active: &ActiveLiveInstrument,
        context: &ContextMap<H::Ref>,
        source: &str,
        line: i32,
        thread_name: String,
        stack_trace: Vec<StackFrame>,
        occurred_at: i64,
    ) -> ProbeEvent {
        let variable_control = match &active.instrument.kind {
            InstrumentKind::Breakpoint { variable_control } => variable_control.as_ref(),
            _ => None,
        };
        let serializer = Serializer::new(heap, &self.control).with_breakpoint(variable_control);
        let variables = context
            .iter()
            .map(|(scope, name, captured)| CapturedVariable {
                name: name.to_string(),
                scope,
                value: serializer.serialize_variable(name, &captured.type_name, captured.value.as_ref()),
            })
            .collect();

        ProbeEvent::BreakpointHit(BreakpointHit {
            breakpoint_id: active.id().to_string(),
            occurred_at,
            location: LiveSourceLocation::new(source, line),
            thread_name,
            stack_trace,
            variables,
        })
    }

    /// Arguments resolve as a local, then a field, then a static field;
    /// anything not captured renders as `null`.
    #[allow(clippy::too_many_arguments)]
    pub fn log_hit<H: Heap>(
        &self,
        heap: &H,
        active: &ActiveLiveInstrument,
        context: &ContextMap<H::Ref>,
        log_format: &str,
        arguments: &[String],
        thread_name: String,
        occurred_at: i64,
    ) -> ProbeEvent {
        let values: Vec<String> = arguments.iter().map(|name| argument_display(heap, context, name)).collect();
        let log_arguments: BTreeMap<String, String> =
            arguments.iter().cloned().zip(values.iter().cloned()).collect();

        ProbeEvent::LogHit(LogHit {
            log_id: active.id().to_string(),
            occurred_at,
            location: active.instrument.location.clone(),
            log_format: log_format.to_string(),
            log_arguments,
            message: format_message(log_format, &values),
            thread_name,
        })
    }
}

fn argument_display<H: Heap>(heap: &H, context: &ContextMap<H::Ref>, name: &str) -> String {
    let Some(obj) = context.lookup(name).and_then(|c| c.value.as_ref()) else {
        return "null".to_string();
    };
    let rendered = heap.resolve(obj).and_then(|value| match value {
        Value::Object(_) => heap.display(obj),
        scalar => display_value(heap, &scalar),
    });
    rendered.unwrap_or_else(|e| {
        warn!(argument = name, error = %e, "cannot render log argument");
        "null".to_string()
    })
}

/// One closed span. Times are epoch milliseconds; the duration is measured
/// with a monotonic clock.
pub fn span_closed(
    active: &ActiveLiveInstrument,
    started_at: i64,
    ended_at: i64,
    duration_micros: u64,
    thread_name: String,
    error: Option<String>,
) -> ProbeEvent {
    let operation_name = match &active.instrument.kind {
        InstrumentKind::Span { operation_name } => operation_name.clone(),
        _ => active.id().to_string(),
    };
    ProbeEvent::Span(SpanEvent {
        span_id: active.id().to_string(),
        operation_name,
        started_at,
        ended_at,
        duration_micros,
        thread_name,
        error,
    })
}
