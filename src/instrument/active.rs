use super::model::{InstrumentKind, LiveInstrument, MeterTagValueType, MetricValueType};
use super::throttle::Throttle;
use crate::condition::Expression;
use crate::error::ProbeError;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Where a registered instrument is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentState {
    /// Target class not loaded yet; retried by the scheduler.
    Pending,
    Applying,
    Live,
}

/// How an instrument left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemovalOutcome {
    Removed,
    Expired,
    Errored,
}

/// A registered instrument together with its compiled expressions and
/// per-hit bookkeeping.
#[derive(Debug)]
pub struct ActiveLiveInstrument {
    pub instrument: LiveInstrument,
    pub condition: Option<Expression>,
    /// Compiled `metricValue` for expression-valued meters.
    pub metric_expression: Option<Expression>,
    /// One slot per meter tag; `Some` for expression-valued tags.
    pub tag_expressions: Vec<Option<Expression>>,
    throttle: Option<Throttle>,
    hits: AtomicU64,
    removal: AtomicBool,
    live: AtomicBool,
    applied_reported: AtomicBool,
    state: Mutex<InstrumentState>,
    seq: u64,
}

impl ActiveLiveInstrument {
    /// Compiles the condition and any meter expressions.
    pub fn new(instrument: LiveInstrument, seq: u64) -> Result<Self, ProbeError> {
        let condition = instrument.condition().map(compile).transpose()?;

        let (metric_expression, tag_expressions) = match &instrument.kind {
            InstrumentKind::Meter { metric_value, meter_tags, .. } => {
                let metric = match metric_value.value_type {
                    MetricValueType::Number => None,
                    MetricValueType::NumberExpression | MetricValueType::ValueExpression => {
                        Some(compile(&metric_value.value)?)
                    }
                };
                let tags = meter_tags
                    .iter()
                    .map(|tag| match tag.value_type {
                        MeterTagValueType::Value => Ok(None),
                        MeterTagValueType::ValueExpression => compile(&tag.value).map(Some),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (metric, tags)
            }
            _ => (None, Vec::new()),
        };

        Ok(ActiveLiveInstrument {
            throttle: Throttle::new(instrument.throttle()),
            instrument,
            condition,
            metric_expression,
            tag_expressions,
            hits: AtomicU64::new(0),
            removal: AtomicBool::new(false),
            live: AtomicBool::new(false),
            applied_reported: AtomicBool::new(false),
            state: Mutex::new(InstrumentState::Pending),
            seq,
        })
    }

    pub fn id(&self) -> &str {
        &self.instrument.id
    }

    /// Registration order; injected blocks at one location follow it.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn state(&self) -> InstrumentState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: InstrumentState) {
        *self.state.lock() = state;
    }

    /// Moves to `to` only from `from`.
    pub(crate) fn transition(&self, from: InstrumentState, to: InstrumentState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    pub fn is_removal(&self) -> bool {
        self.removal.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removal(&self) {
        self.removal.store(true, Ordering::Release);
    }

    /// True once the target class has been rewritten with this instrument.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn set_live(&self) {
        self.live.store(true, Ordering::Release);
    }

    /// Returns true exactly once, for the first successful application.
    pub(crate) fn take_applied_report(&self) -> bool {
        !self.applied_reported.swap(true, Ordering::AcqRel)
    }

    pub fn throttle(&self) -> Option<&Throttle> {
        self.throttle.as_ref()
    }

    pub(crate) fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Hits that passed throttle and condition.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Acquire)
    }

    pub fn is_finished_at(&self, now_millis: i64) -> bool {
        if self.instrument.is_expired_at(now_millis) {
            return true;
        }
        let limit = self.instrument.hit_limit();
        limit >= 0 && self.hit_count() >= limit as u64
    }

    /// Whether the injected code must capture variables before asking for a hit.
    pub fn needs_capture(&self) -> bool {
        match &self.instrument.kind {
            InstrumentKind::Breakpoint { .. } => true,
            InstrumentKind::Log { log_arguments, .. } => !log_arguments.is_empty() || self.condition.is_some(),
            InstrumentKind::Meter { .. } => {
                self.condition.is_some()
                    || self.metric_expression.is_some()
                    || self.tag_expressions.iter().any(Option::is_some)
            }
            InstrumentKind::Span { .. } => false,
        }
    }
}

fn compile(source: &str) -> Result<Expression, ProbeError> {
    Expression::parse(source).map_err(|err| ProbeError::conditional_failed(err.to_string()))
}
