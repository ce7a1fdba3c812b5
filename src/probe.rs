//! The probe: instrument service, class rewriting and hit handling behind
//! one value the agent and the native hooks share.
//!
//! Injected code calls the hooks in a fixed order for one instrument:
//! `put*Variable` for every captured value, `isHit`, then the report call.
//! Values captured between those calls live in a [`HitScratch`] owned by
//! the calling thread.

use crate::config::ProbeConfig;
use crate::context::{ContextMap, Scope};
use crate::error::Result;
use crate::event::{EventSink, ProbeEvent, StackFrame};
use crate::heap::Heap;
use crate::instrument::{now_millis, ActiveLiveInstrument, CommandResult, Instrumentation, LiveInstrumentCommand, LiveInstrumentService};
use crate::meter::MeterRegistry;
use crate::report::{self, Reporter};
use crate::transform::LiveTransformer;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

struct OpenSpan {
    active: Arc<ActiveLiveInstrument>,
    started_at: i64,
    started: Instant,
}

/// Per-thread state between the hook calls of one injected block.
pub struct HitScratch<R> {
    captures: HashMap<String, ContextMap<R>>,
    hits: HashMap<String, (Arc<ActiveLiveInstrument>, ContextMap<R>)>,
    spans: Vec<OpenSpan>,
}

impl<R> Default for HitScratch<R> {
    fn default() -> Self {
        Self { captures: HashMap::new(), hits: HashMap::new(), spans: Vec::new() }
    }
}

impl<R> HitScratch<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, id: &str, scope: Scope, name: &str, type_name: &str, value: Option<R>) {
        self.captures.entry(id.to_string()).or_default().put(scope, name, type_name, value);
    }

    pub fn open_spans(&self) -> usize {
        self.spans.len()
    }

    /// Nothing captured, pending or open.
    pub fn is_idle(&self) -> bool {
        self.captures.is_empty() && self.hits.is_empty() && self.spans.is_empty()
    }

    fn take_capture(&mut self, id: &str) -> ContextMap<R> {
        self.captures.remove(id).unwrap_or_default()
    }

    /// Drops what was captured for `id` without deciding a hit.
    pub fn discard(&mut self, id: &str) {
        self.captures.remove(id);
    }
}

/// A thread's [`HitScratch`] as the hooks reach it.
///
/// A hook re-entering through Java code the probe itself called (a
/// `toString()` during a condition) finds the scratch borrowed and is
/// skipped. When the skipped call is an `isHit`, the values captured for
/// that id are discarded on the next borrow so they never leak into a
/// later hit.
pub struct ScratchCell<R> {
    scratch: RefCell<HitScratch<R>>,
    skipped: RefCell<Vec<String>>,
}

impl<R> Default for ScratchCell<R> {
    fn default() -> Self {
        Self { scratch: RefCell::new(HitScratch::new()), skipped: RefCell::new(Vec::new()) }
    }
}

impl<R> ScratchCell<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on the scratch; `None` when it is already borrowed.
    pub fn with<T>(&self, f: impl FnOnce(&mut HitScratch<R>) -> T) -> Option<T> {
        let Ok(mut scratch) = self.scratch.try_borrow_mut() else {
            trace!("nested hook call skipped");
            return None;
        };
        if let Ok(mut skipped) = self.skipped.try_borrow_mut() {
            for id in skipped.drain(..) {
                scratch.discard(&id);
            }
        }
        Some(f(&mut scratch))
    }

    /// Like [`Self::with`] for the hit decision of `id`.
    pub fn decide<T>(&self, id: &str, f: impl FnOnce(&mut HitScratch<R>) -> T) -> Option<T> {
        let decided = self.with(f);
        if decided.is_none() {
            if let Ok(mut skipped) = self.skipped.try_borrow_mut() {
                skipped.push(id.to_string());
            }
        }
        decided
    }
}

pub struct Probe<I: Instrumentation> {
    service: Arc<LiveInstrumentService<I>>,
    transformer: LiveTransformer,
    reporter: Reporter,
    meters: Arc<MeterRegistry>,
    initial_instruments: Vec<crate::instrument::LiveInstrument>,
}

impl<I: Instrumentation> Probe<I> {
    pub fn new(config: &ProbeConfig, instrumentation: I, sink: Arc<dyn EventSink>) -> Self {
        let meters = Arc::new(MeterRegistry::new());
        let service = LiveInstrumentService::new(instrumentation, sink).with_listener(meters.clone());
        Probe {
            service: Arc::new(service),
            transformer: LiveTransformer::new(config.hook_class.clone()),
            reporter: Reporter::new(config.live_variable_control.clone()),
            meters,
            initial_instruments: config.instruments.clone(),
        }
    }

    pub fn service(&self) -> &Arc<LiveInstrumentService<I>> {
        &self.service
    }

    pub fn transformer(&self) -> &LiveTransformer {
        &self.transformer
    }

    pub fn meters(&self) -> &MeterRegistry {
        &self.meters
    }

    fn sink(&self) -> &Arc<dyn EventSink> {
        self.service.sink()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Runs one JSON-encoded [`LiveInstrumentCommand`].
    pub fn handle_command(&self, json: &str) -> Result<CommandResult> {
        let command: LiveInstrumentCommand = serde_json::from_str(json)?;
        Ok(self.execute(command))
    }

    pub fn execute(&self, command: LiveInstrumentCommand) -> CommandResult {
        command.execute(&self.service)
    }

    /// Applies the instruments listed in the configuration, once.
    pub fn apply_initial_instruments(&self) -> Option<CommandResult> {
        if self.initial_instruments.is_empty() {
            return None;
        }
        let instruments = self.initial_instruments.clone();
        Some(self.execute(LiveInstrumentCommand::SetInitialInstruments { instruments }))
    }

    // =========================================================================
    // Class file load hook
    // =========================================================================

    /// Rewrites a class being loaded or retransformed. `class_name` is the
    /// internal name.
    ///
    /// When injecting into one method fails, the instruments placed there
    /// are dropped and the class is rewritten with the others. A class that
    /// cannot be rewritten at all loads unmodified and loses its instruments.
    pub fn transform_class(&self, class_name: &str, class_bytes: &[u8]) -> Option<Vec<u8>> {
        let dotted = class_name.replace('/', ".");
        loop {
            let instruments = self.service.instruments_for_class(&dotted);
            if instruments.is_empty() {
                return None;
            }
            let err = match self.transformer.transform(class_bytes, &instruments) {
                Ok(rewritten) => return rewritten,
                Err(err) => err,
            };
            warn!(class = %dotted, "failed to transform class: {err}");
            if self.service.injection_failed(err.instruments(), &err.to_string()) == 0 {
                self.service.transform_failed(&dotted, &err.to_string());
                return None;
            }
        }
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    pub fn is_instrument_enabled(&self, id: &str) -> bool {
        self.service.is_instrument_enabled(id)
    }

    /// Decides the hit for `id` against what was captured for it. On a hit
    /// the capture is kept for the report call that follows.
    pub fn is_hit<H: Heap>(&self, scratch: &mut HitScratch<H::Ref>, heap: &H, id: &str) -> bool {
        let context = scratch.take_capture(id);
        match self.service.is_hit(id, &context, heap) {
            Some(active) => {
                scratch.hits.insert(id.to_string(), (active, context));
                true
            }
            None => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put_breakpoint<H: Heap>(
        &self,
        scratch: &mut HitScratch<H::Ref>,
        heap: &H,
        id: &str,
        source: &str,
        line: i32,
        thread_name: impl FnOnce() -> String,
        stack_trace: impl FnOnce() -> Vec<StackFrame>,
    ) {
        let Some((active, context)) = scratch.hits.remove(id) else {
            debug!(id, "breakpoint reported without a hit");
            return;
        };
        let event = self.reporter.breakpoint_hit(
            heap,
            &active,
            &context,
            source,
            line,
            thread_name(),
            stack_trace(),
            now_millis(),
        );
        self.sink().emit(event);
        self.service.hit_reported(&active);
    }

    pub fn put_log<H: Heap>(
        &self,
        scratch: &mut HitScratch<H::Ref>,
        heap: &H,
        id: &str,
        log_format: &str,
        arguments: &[String],
        thread_name: impl FnOnce() -> String,
    ) {
        let Some((active, context)) = scratch.hits.remove(id) else {
            debug!(id, "log reported without a hit");
            return;
        };
        let event = self.reporter.log_hit(heap, &active, &context, log_format, arguments, thread_name(), now_millis());
        self.sink().emit(event);
        self.service.hit_reported(&active);
    }

    pub fn put_meter<H: Heap>(&self, scratch: &mut HitScratch<H::Ref>, heap: &H, id: &str) {
        let Some((active, context)) = scratch.hits.remove(id) else {
            debug!(id, "meter reported without a hit");
            return;
        };
        match self.meters.record(&active, &context, heap, now_millis()) {
            Ok(Some(event)) => self.sink().emit(ProbeEvent::Meter(event)),
            Ok(None) => debug!(id, "not a meter"),
            Err(err) => warn!(meter = id, "failed to record meter: {err}"),
        }
        self.service.hit_reported(&active);
    }

    /// Opens a span for the current thread if the instrument is enabled and
    /// this entry counts as a hit.
    pub fn open_span<H: Heap>(&self, scratch: &mut HitScratch<H::Ref>, heap: &H, id: &str) {
        if !self.service.is_instrument_enabled(id) {
            return;
        }
        let Some(active) = self.service.is_hit(id, &ContextMap::new(), heap) else {
            return;
        };
        scratch.spans.push(OpenSpan { active, started_at: now_millis(), started: Instant::now() });
    }

    /// Closes the innermost open span with `id`. `error` describes the
    /// throwable when the method exits abruptly.
    pub fn close_span<R>(
        &self,
        scratch: &mut HitScratch<R>,
        id: &str,
        error: Option<String>,
        thread_name: impl FnOnce() -> String,
    ) {
        let Some(at) = scratch.spans.iter().rposition(|span| span.active.id() == id) else {
            return;
        };
        let span = scratch.spans.remove(at);
        let duration_micros = u64::try_from(span.started.elapsed().as_micros()).unwrap_or(u64::MAX);
        if error.is_some() {
            debug!(span = id, "span closed by exception");
        }
        let event = report::span_closed(&span.active, span.started_at, now_millis(), duration_micros, thread_name(), error);
        self.sink().emit(event);
        self.service.hit_reported(&span.active);
    }

    /// Drops every instrument; used when the VM shuts down.
    pub fn shutdown(&self) {
        let count = self.service.instruments().len();
        self.service.clear();
        info!(count, "live instruments cleared");
        self.sink().flush();
    }
}
