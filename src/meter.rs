//! Meter aggregation.
//!
//! Each meter keeps one series per distinct tag set. A series is keyed by
//! `<meter id>{k=v,...}` with tags in key order and belongs to one
//! registration of the meter: a meter re-added under the same id starts over.

use crate::condition::{ConditionError, ExprValue};
use crate::context::ContextMap;
use crate::event::MeterEvent;
use crate::heap::Heap;
use crate::instrument::model::{InstrumentKind, MeterTagValueType, MeterType, MetricValueType};
use crate::instrument::{ActiveLiveInstrument, RemovalListener};
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// `meta` key selecting how a COUNT meter reports: `INCREMENT` (running
/// total, the default) or `RATE` (the amount added by this hit).
pub const METRIC_MODE_KEY: &str = "metric.mode";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    Counter { total: f64 },
    Gauge { last: f64 },
    Histogram { count: u64, sum: f64, min: f64, max: f64 },
}

impl Aggregate {
    fn new(meter_type: MeterType) -> Self {
        match meter_type {
            MeterType::Count => Aggregate::Counter { total: 0.0 },
            MeterType::Gauge => Aggregate::Gauge { last: 0.0 },
            MeterType::Histogram => Aggregate::Histogram { count: 0, sum: 0.0, min: f64::INFINITY, max: f64::NEG_INFINITY },
        }
    }

    fn record(&mut self, value: f64) {
        match self {
            Aggregate::Counter { total } => *total += value,
            Aggregate::Gauge { last } => *last = value,
            Aggregate::Histogram { count, sum, min, max } => {
                *count += 1;
                *sum += value;
                *min = min.min(value);
                *max = max.max(value);
            }
        }
    }
}

/// `count_my_meter_id` for meter `my-meter-id` of type COUNT.
pub fn metric_id(meter_type: MeterType, meter_id: &str) -> String {
    let prefix = match meter_type {
        MeterType::Count => "count",
        MeterType::Gauge => "gauge",
        MeterType::Histogram => "histogram",
    };
    format!("{prefix}_{}", meter_id.replace('-', "_"))
}

fn series_key(meter_id: &str, tags: &BTreeMap<String, String>) -> String {
    let tags: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{meter_id}{{{}}}", tags.join(","))
}

fn number<R>(value: ExprValue<R>) -> Result<f64, ConditionError> {
    value
        .as_f64()
        .ok_or_else(|| ConditionError::type_error(format!("metric value must be a number, got {}", value.type_name())))
}

#[derive(Debug)]
struct Series {
    /// `seq` of the instrument that recorded it.
    generation: u64,
    aggregate: Aggregate,
}

#[derive(Debug, Default)]
pub struct MeterRegistry {
    series: DashMap<String, Series>,
}

impl MeterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one hit of `active` and returns the event to publish, or
    /// `None` when `active` is not a meter.
    pub fn record<H: Heap>(
        &self,
        active: &ActiveLiveInstrument,
        context: &ContextMap<H::Ref>,
        heap: &H,
        now_millis: i64,
    ) -> Result<Option<MeterEvent>, ConditionError> {
        let InstrumentKind::Meter { meter_type, metric_value, meter_tags, .. } = &active.instrument.kind else {
            return Ok(None);
        };

        let mut tags = BTreeMap::new();
        for (tag, expression) in meter_tags.iter().zip(active.tag_expressions.iter()) {
            let value = match (tag.value_type, expression) {
                (MeterTagValueType::ValueExpression, Some(expression)) => {
                    expression.evaluate_display(context, heap).unwrap_or_else(|e| {
                        warn!(meter = active.id(), tag = %tag.key, error = %e, "tag expression failed");
                        "null".to_string()
                    })
                }
                _ => tag.value.clone(),
            };
            tags.insert(tag.key.clone(), value);
        }

        let mut display = None;
        let value = match (metric_value.value_type, &active.metric_expression) {
            (MetricValueType::Number, _) | (_, None) => metric_value
                .value
                .trim()
                .parse::<f64>()
                .map_err(|_| ConditionError::type_error(format!("invalid metric value {:?}", metric_value.value)))?,
            (MetricValueType::NumberExpression, Some(expression)) => number(expression.evaluate_value(context, heap)?)?,
            (MetricValueType::ValueExpression, Some(expression)) => {
                let value = expression.evaluate_value(context, heap)?;
                let numeric = value.as_f64();
                display = Some(crate::condition::display_value(heap, &value)?);
                numeric.unwrap_or(f64::NAN)
            }
        };

        let key = series_key(active.id(), &tags);
        let generation = active.seq();
        let mut entry = self.series.entry(key).or_insert_with(|| {
            info!(meter = active.id(), "initial trigger of live meter");
            Series { generation, aggregate: Aggregate::new(*meter_type) }
        });
        if entry.generation != generation {
            info!(meter = active.id(), "live meter re-added, series reset");
            *entry = Series { generation, aggregate: Aggregate::new(*meter_type) };
        }
        entry.aggregate.record(value);
        let reported = match entry.aggregate {
            Aggregate::Counter { total } => {
                let rate = active.instrument.meta.get(METRIC_MODE_KEY).and_then(|v| v.as_str()) == Some("RATE");
                if rate {
                    value
                } else {
                    total
                }
            }
            _ => value,
        };
        drop(entry);

        Ok(Some(MeterEvent {
            meter_id: active.id().to_string(),
            metric_id: metric_id(*meter_type, active.id()),
            meter_type: *meter_type,
            tags,
            value: reported,
            display,
            occurred_at: now_millis,
        }))
    }

    pub fn aggregate(&self, meter_id: &str, tags: &BTreeMap<String, String>) -> Option<Aggregate> {
        self.series.get(&series_key(meter_id, tags)).map(|series| series.aggregate)
    }

    /// Drops the series recorded by one registration of a meter, leaving a
    /// later registration under the same id alone.
    fn remove_generation(&self, meter_id: &str, generation: u64) {
        let prefix = format!("{meter_id}{{");
        self.series.retain(|key, series| !(key.starts_with(&prefix) && series.generation == generation));
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl RemovalListener for MeterRegistry {
    fn instrument_removed(&self, active: &ActiveLiveInstrument) {
        if active.instrument.is_meter() {
            self.remove_generation(active.id(), active.seq());
        }
    }
}
