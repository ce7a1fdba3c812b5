use super::active::{ActiveLiveInstrument, InstrumentState, RemovalOutcome};
use super::model::LiveInstrument;
use super::{now_millis, Instrumentation, RemovalListener};
use crate::context::ContextMap;
use crate::error::{ProbeError, Result};
use crate::event::{EventSink, InstrumentApplied, InstrumentRemoved, ProbeEvent};
use crate::heap::Heap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry of live instruments and the decisions made on their behalf.
///
/// Every registered instrument lives in one map keyed by id, whatever its
/// [`InstrumentState`]. Removing the entry is what withdraws an instrument:
/// the injected guards of a class that has not been rewritten yet simply
/// stop finding it.
pub struct LiveInstrumentService<I: Instrumentation> {
    instrumentation: I,
    registry: DashMap<String, Arc<ActiveLiveInstrument>>,
    sink: Arc<dyn EventSink>,
    listeners: Vec<Arc<dyn RemovalListener>>,
    next_seq: AtomicU64,
}

impl<I: Instrumentation> LiveInstrumentService<I> {
    pub fn new(instrumentation: I, sink: Arc<dyn EventSink>) -> Self {
        LiveInstrumentService {
            instrumentation,
            registry: DashMap::new(),
            sink,
            listeners: Vec::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn RemovalListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn instrumentation(&self) -> &I {
        &self.instrumentation
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers an instrument and rewrites its class if it is loaded.
    ///
    /// Applying an id that is already registered returns the registered
    /// instrument unchanged.
    pub fn apply_instrument(&self, instrument: LiveInstrument) -> Result<LiveInstrument> {
        if let Some(existing) = self.get(&instrument.id) {
            debug!(id = %instrument.id, "instrument already registered");
            return Ok(existing.instrument.clone());
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let active = match ActiveLiveInstrument::new(instrument, seq) {
            Ok(active) => Arc::new(active),
            Err(err) => {
                warn!("rejecting live instrument: {err}");
                return Err(err);
            }
        };
        let instrument = &active.instrument;
        let class_name = instrument.target_class().to_string();

        info!(%instrument, class = %class_name, "searching loaded classes");
        let classes = self.instrumentation.find_classes(&class_name);
        if classes.is_empty() && instrument.apply_immediately {
            warn!(%instrument, "{class_name} is not loaded; cannot apply immediately");
            return Err(ProbeError::class_not_found(class_name));
        }

        match self.registry.entry(instrument.id.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().instrument.clone()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&active));
            }
        }

        if classes.is_empty() {
            info!(%instrument, "{class_name} not loaded yet; instrument pending");
            return Ok(instrument.clone());
        }

        active.set_state(InstrumentState::Applying);
        match self.apply_to(&active, &classes) {
            Err(err) if instrument.apply_immediately => Err(err),
            _ => Ok(instrument.clone()),
        }
    }

    fn apply_to(&self, active: &Arc<ActiveLiveInstrument>, classes: &[I::Class]) -> Result<()> {
        let instrument = &active.instrument;
        info!(%instrument, "applying live instrument");

        match self.instrumentation.retransform(classes) {
            Ok(()) if active.is_removal() => {
                // Removed while the class was being rewritten; the rewrite
                // may still carry its hooks.
                self.retransform_class(instrument.target_class());
                Err(ProbeError::Retransform {
                    classes: vec![instrument.target_class().to_string()],
                    cause: format!("{instrument} could not be injected"),
                })
            }
            Ok(()) => {
                active.set_state(InstrumentState::Live);
                active.set_live();
                if active.take_applied_report() {
                    info!(%instrument, "applied live instrument");
                    self.sink.emit(ProbeEvent::InstrumentApplied(InstrumentApplied { instrument: instrument.clone() }));
                }
                Ok(())
            }
            Err(err) => {
                warn!(%instrument, "failed to apply live instrument: {err}");
                self.evict(active, RemovalOutcome::Errored, Some(err.to_string()));
                if let Err(restore) = self.instrumentation.retransform(classes) {
                    warn!(class = instrument.target_class(), "failed to restore class: {restore}");
                }
                Err(err)
            }
        }
    }

    /// Retries every pending instrument whose class has been loaded since.
    /// Returns how many were applied.
    pub fn retry_pending(&self) -> usize {
        let pending: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|active| active.state() == InstrumentState::Pending && !active.is_removal())
            .collect();

        let mut applied = 0;
        for active in pending {
            let classes = self.instrumentation.find_classes(active.instrument.target_class());
            if classes.is_empty() {
                continue;
            }
            if !active.transition(InstrumentState::Pending, InstrumentState::Applying) {
                continue;
            }
            if self.apply_to(&active, &classes).is_ok() {
                applied += 1;
            }
        }
        applied
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Removes the instrument with `id`, or, without an id, every instrument
    /// at `source:line` (nested classes of `source` included).
    pub fn remove_instrument(&self, source: &str, line: Option<i32>, id: Option<&str>) -> Vec<LiveInstrument> {
        let nested_prefix = format!("{source}$");
        let targets: Vec<_> = match id {
            Some(id) => self.get(id).into_iter().collect(),
            None => self
                .snapshot()
                .into_iter()
                .filter(|active| {
                    let location = &active.instrument.location;
                    (location.source == source || location.source.starts_with(&nested_prefix)) && location.line == line
                })
                .collect(),
        };

        let mut classes = BTreeSet::new();
        let mut removed = Vec::new();
        for active in targets {
            if self.evict(&active, RemovalOutcome::Removed, None) {
                if active.is_live() {
                    classes.insert(active.instrument.target_class().to_string());
                }
                removed.push(active.instrument.clone());
            }
        }
        for class_name in classes {
            self.retransform_class(&class_name);
        }
        removed
    }

    /// Takes the instrument out of the registry, reports it and tells the
    /// listeners. Returns false when it was already gone.
    fn evict(&self, active: &Arc<ActiveLiveInstrument>, outcome: RemovalOutcome, cause: Option<String>) -> bool {
        let removed = self.unregister(active, outcome, cause);
        if removed {
            self.notify_removed(active);
        }
        removed
    }

    fn notify_removed(&self, active: &ActiveLiveInstrument) {
        for listener in &self.listeners {
            listener.instrument_removed(active);
        }
    }

    fn unregister(&self, active: &Arc<ActiveLiveInstrument>, outcome: RemovalOutcome, cause: Option<String>) -> bool {
        let removed = self.registry.remove_if(active.id(), |_, current| Arc::ptr_eq(current, active)).is_some();
        if !removed {
            return false;
        }
        active.mark_removal();

        let instrument = &active.instrument;
        match &cause {
            Some(cause) => warn!(%instrument, ?outcome, "removing erroneous live instrument: {cause}"),
            None => info!(%instrument, ?outcome, "removing live instrument"),
        }
        self.sink.emit(ProbeEvent::InstrumentRemoved(InstrumentRemoved {
            instrument: instrument.clone(),
            occurred_at: now_millis(),
            outcome,
            cause,
        }));
        true
    }

    /// Evicts and strips the instrument from its class if it was applied.
    fn withdraw(&self, active: &Arc<ActiveLiveInstrument>, outcome: RemovalOutcome, cause: Option<String>) {
        if self.evict(active, outcome, cause) && active.is_live() {
            self.retransform_class(active.instrument.target_class());
        }
    }

    fn retransform_class(&self, class_name: &str) {
        let classes = self.instrumentation.find_classes(class_name);
        if classes.is_empty() {
            return;
        }
        match self.instrumentation.retransform(&classes) {
            Ok(()) => info!(class = class_name, "retransformed"),
            Err(err) => warn!(class = class_name, "failed to retransform: {err}"),
        }
    }

    /// Removes every instrument past its expiry time. Returns how many.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(now_millis())
    }

    pub fn sweep_expired_at(&self, now_millis: i64) -> usize {
        let expired: Vec<_> =
            self.snapshot().into_iter().filter(|active| active.instrument.is_expired_at(now_millis)).collect();
        debug!("found {} expired instruments", expired.len());
        for active in &expired {
            self.withdraw(active, RemovalOutcome::Expired, None);
        }
        expired.len()
    }

    /// Called when the rewrite of `class_name` failed as a whole; its
    /// instruments are dropped so the class keeps loading unmodified.
    pub fn transform_failed(&self, class_name: &str, cause: &str) {
        for active in self.instruments_for_class(class_name) {
            self.evict(&active, RemovalOutcome::Errored, Some(format!("failed to transform {class_name}: {cause}")));
        }
    }

    /// Called when injecting `ids` into one method failed. Drops the ones
    /// not yet live, or all of them when every one was live already.
    /// Returns how many were dropped; the caller rewrites the class again
    /// with the rest.
    pub fn injection_failed(&self, ids: &[String], cause: &str) -> usize {
        let placed: Vec<_> = ids.iter().filter_map(|id| self.get(id)).collect();
        let fresh: Vec<_> = placed.iter().filter(|active| !active.is_live()).cloned().collect();
        let dropped = if fresh.is_empty() { placed } else { fresh };
        dropped
            .iter()
            .filter(|active| self.evict(active, RemovalOutcome::Errored, Some(format!("failed to inject: {cause}"))))
            .count()
    }

    pub fn clear(&self) {
        for active in self.snapshot() {
            if self.registry.remove_if(active.id(), |_, current| Arc::ptr_eq(current, &active)).is_some() {
                active.mark_removal();
                self.notify_removed(&active);
            }
        }
    }

    // =========================================================================
    // Hook queries
    // =========================================================================

    pub fn is_instrument_enabled(&self, id: &str) -> bool {
        self.registry.contains_key(id)
    }

    pub fn is_hit<H: Heap>(&self, id: &str, context: &ContextMap<H::Ref>, heap: &H) -> Option<Arc<ActiveLiveInstrument>> {
        self.is_hit_at(id, context, heap, now_millis())
    }

    /// Decides whether this execution of the instrument counts as a hit:
    /// throttle first, then the condition against the captured context.
    /// A condition that fails to evaluate removes the instrument. The hit
    /// that reaches the hit limit or the expiry time removes it as well.
    pub fn is_hit_at<H: Heap>(
        &self,
        id: &str,
        context: &ContextMap<H::Ref>,
        heap: &H,
        now_millis: i64,
    ) -> Option<Arc<ActiveLiveInstrument>> {
        let active = self.get(id)?;
        if active.is_removal() {
            return None;
        }
        if active.throttle().is_some_and(|throttle| throttle.is_rate_limited_at(now_millis)) {
            debug!(id, "hit rate limited");
            return None;
        }

        if let Some(condition) = &active.condition {
            match condition.evaluate(context, heap) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => {
                    let cause = format!("failed to evaluate condition {:?}: {err}", condition.source());
                    self.withdraw(&active, RemovalOutcome::Errored, Some(cause));
                    return None;
                }
            }
        }

        let hits = active.record_hit();
        debug!(id, hits, "instrument hit");
        if active.is_finished_at(now_millis) {
            info!(id, "instrument finished");
            // listeners hear about it from `hit_reported`
            if self.unregister(&active, RemovalOutcome::Removed, None) && active.is_live() {
                self.retransform_class(active.instrument.target_class());
            }
        }
        Some(active)
    }

    /// Called once a hit returned by [`Self::is_hit`] has been reported.
    /// Announces the removal of an instrument that hit finished.
    pub fn hit_reported(&self, active: &ActiveLiveInstrument) {
        if active.is_removal() {
            self.notify_removed(active);
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get(&self, id: &str) -> Option<Arc<ActiveLiveInstrument>> {
        self.registry.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered instruments in registration order.
    pub fn instruments(&self) -> Vec<Arc<ActiveLiveInstrument>> {
        self.snapshot()
    }

    /// Instruments the rewrite of `class_name` has to inject, in registration order.
    pub fn instruments_for_class(&self, class_name: &str) -> Vec<Arc<ActiveLiveInstrument>> {
        let mut found: Vec<_> = self
            .registry
            .iter()
            .filter(|entry| entry.value().instrument.location.matches_class(class_name))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        found.sort_by_key(|active| active.seq());
        found
    }

    pub fn has_instruments_for(&self, class_name: &str) -> bool {
        self.registry.iter().any(|entry| entry.value().instrument.location.matches_class(class_name))
    }

    fn snapshot(&self) -> Vec<Arc<ActiveLiveInstrument>> {
        let mut all: Vec<_> = self.registry.iter().map(|entry| Arc::clone(entry.value())).collect();
        all.sort_by_key(|active| active.seq());
        all
    }
}
