//! Wire model of live instruments.
//!
//! JSON uses camelCase field names and a `"type"` tag, e.g.
//!
//! ```json
//! {"type":"BREAKPOINT","id":"bp-1","location":{"source":"com.example.Foo","line":42},
//!  "condition":"count > 3","hitLimit":5}
//! ```

use crate::serialize::BreakpointVariableControl;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSourceLocation {
    /// Dotted type name, or a full method signature for spans.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_signature: Option<String>,
}

impl LiveSourceLocation {
    pub fn new(source: impl Into<String>, line: i32) -> Self {
        LiveSourceLocation { source: source.into(), line: Some(line), method_signature: None }
    }

    pub fn method(signature: impl Into<String>) -> Self {
        let signature = signature.into();
        LiveSourceLocation { source: signature.clone(), line: None, method_signature: Some(signature) }
    }

    /// `pkg.Class.method(int,java.lang.String[])`, when this is a method location.
    pub fn signature(&self) -> Option<&str> {
        match &self.method_signature {
            Some(sig) => Some(sig),
            None if self.source.contains('(') => Some(&self.source),
            None => None,
        }
    }

    /// Class that has to be retransformed for this location.
    pub fn target_class(&self) -> &str {
        match self.signature() {
            Some(sig) => {
                let before_args = sig.split('(').next().unwrap_or(sig);
                before_args.rsplit_once('.').map_or(before_args, |(class, _)| class)
            }
            None => &self.source,
        }
    }

    /// True when `class_name` is the location's class or nested inside it.
    pub fn matches_class(&self, class_name: &str) -> bool {
        let source = self.target_class();
        class_name == source
            || class_name.strip_prefix(source).is_some_and(|rest| rest.starts_with('$'))
    }
}

impl fmt::Display for LiveSourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.source, line),
            None => f.write_str(&self.source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThrottleStep {
    Second,
    Minute,
    Hour,
    Day,
}

impl ThrottleStep {
    pub fn millis(self) -> i64 {
        match self {
            ThrottleStep::Second => 1_000,
            ThrottleStep::Minute => 60_000,
            ThrottleStep::Hour => 3_600_000,
            ThrottleStep::Day => 86_400_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitThrottle {
    /// `-1` disables throttling.
    pub limit: i32,
    pub step: ThrottleStep,
}

impl HitThrottle {
    pub const NONE: HitThrottle = HitThrottle { limit: -1, step: ThrottleStep::Second };
    pub const ONCE_A_SECOND: HitThrottle = HitThrottle { limit: 1, step: ThrottleStep::Second };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterType {
    Count,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricValueType {
    Number,
    NumberExpression,
    ValueExpression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub value_type: MetricValueType,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterTagValueType {
    Value,
    ValueExpression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterTag {
    pub key: String,
    pub value_type: MeterTagValueType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentKind {
    #[serde(rename_all = "camelCase")]
    Breakpoint {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variable_control: Option<BreakpointVariableControl>,
    },
    #[serde(rename_all = "camelCase")]
    Log {
        log_format: String,
        #[serde(default)]
        log_arguments: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Meter {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meter_name: Option<String>,
        meter_type: MeterType,
        metric_value: MetricValue,
        #[serde(default)]
        meter_tags: Vec<MeterTag>,
    },
    #[serde(rename_all = "camelCase")]
    Span { operation_name: String },
}

impl InstrumentKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstrumentKind::Breakpoint { .. } => "breakpoint",
            InstrumentKind::Log { .. } => "log",
            InstrumentKind::Meter { .. } => "meter",
            InstrumentKind::Span { .. } => "span",
        }
    }
}

/// A breakpoint, log, meter or span as requested by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveInstrument {
    pub id: String,
    pub location: LiveSourceLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<HitThrottle>,
    #[serde(default)]
    pub apply_immediately: bool,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
    #[serde(flatten)]
    pub kind: InstrumentKind,
}

impl LiveInstrument {
    fn new(id: impl Into<String>, location: LiveSourceLocation, kind: InstrumentKind) -> Self {
        LiveInstrument {
            id: id.into(),
            location,
            condition: None,
            expires_at: None,
            hit_limit: None,
            throttle: None,
            apply_immediately: false,
            meta: serde_json::Map::new(),
            kind,
        }
    }

    pub fn breakpoint(id: impl Into<String>, location: LiveSourceLocation) -> Self {
        Self::new(id, location, InstrumentKind::Breakpoint { variable_control: None })
    }

    pub fn log(id: impl Into<String>, location: LiveSourceLocation, format: impl Into<String>, arguments: &[&str]) -> Self {
        let kind = InstrumentKind::Log {
            log_format: format.into(),
            log_arguments: arguments.iter().map(|a| a.to_string()).collect(),
        };
        Self::new(id, location, kind)
    }

    pub fn meter(id: impl Into<String>, location: LiveSourceLocation, meter_type: MeterType, metric_value: MetricValue) -> Self {
        let kind = InstrumentKind::Meter { meter_name: None, meter_type, metric_value, meter_tags: Vec::new() };
        Self::new(id, location, kind)
    }

    pub fn span(id: impl Into<String>, signature: impl Into<String>, operation_name: impl Into<String>) -> Self {
        let kind = InstrumentKind::Span { operation_name: operation_name.into() };
        Self::new(id, LiveSourceLocation::method(signature), kind)
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_hit_limit(mut self, hit_limit: i32) -> Self {
        self.hit_limit = Some(hit_limit);
        self
    }

    pub fn with_throttle(mut self, throttle: HitThrottle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_apply_immediately(mut self) -> Self {
        self.apply_immediately = true;
        self
    }

    /// `-1` means unlimited. Breakpoints and logs default to a single hit.
    pub fn hit_limit(&self) -> i32 {
        self.hit_limit.unwrap_or(match self.kind {
            InstrumentKind::Breakpoint { .. } | InstrumentKind::Log { .. } => 1,
            _ => -1,
        })
    }

    pub fn throttle(&self) -> HitThrottle {
        match self.throttle {
            Some(throttle) => throttle,
            None if self.is_meter() || self.is_span() => HitThrottle::NONE,
            None => HitThrottle::ONCE_A_SECOND,
        }
    }

    /// Non-empty condition text, if any.
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    pub fn line(&self) -> Option<i32> {
        self.location.line
    }

    pub fn target_class(&self) -> &str {
        self.location.target_class()
    }

    pub fn is_breakpoint(&self) -> bool {
        matches!(self.kind, InstrumentKind::Breakpoint { .. })
    }

    pub fn is_meter(&self) -> bool {
        matches!(self.kind, InstrumentKind::Meter { .. })
    }

    pub fn is_span(&self) -> bool {
        matches!(self.kind, InstrumentKind::Span { .. })
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expires_at.is_some_and(|at| now_millis >= at)
    }
}

impl fmt::Display for LiveInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} at {}", self.kind.name(), self.id, self.location)
    }
}
