mod support;

use jvmti_probe::classfile::ClassFile;
use jvmti_probe::config::ProbeConfig;
use jvmti_probe::context::Scope;
use jvmti_probe::error::ProbeError;
use jvmti_probe::event::{ProbeEvent, StackFrame};
use jvmti_probe::instrument::model::{InstrumentKind, MeterTag, MeterTagValueType, MeterType, MetricValue, MetricValueType};
use jvmti_probe::instrument::{LiveInstrument, LiveInstrumentCommand, LiveSourceLocation, RemovalOutcome};
use jvmti_probe::meter::{Aggregate, METRIC_MODE_KEY};
use jvmti_probe::probe::{HitScratch, ScratchCell};
use serde_json::json;
use std::collections::BTreeMap;
use support::{big_class, counter_class, probe, probe_with, FakeVm, MemHeap, BIG, COUNTER};

fn names(events: &[ProbeEvent]) -> Vec<&'static str> {
    events.iter().map(ProbeEvent::name).collect()
}

fn add(instruments: Vec<LiveInstrument>) -> LiveInstrumentCommand {
    LiveInstrumentCommand::AddLiveInstrument { instruments }
}

fn meter(id: &str, meter_type: MeterType, value_type: MetricValueType, value: &str) -> LiveInstrument {
    LiveInstrument::meter(
        id,
        LiveSourceLocation::new(COUNTER, 21),
        meter_type,
        MetricValue { value_type, value: value.to_string() },
    )
}

#[test]
fn breakpoint_round_trip() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    let result = probe
        .handle_command(
            r#"{"commandType":"ADD_LIVE_INSTRUMENT","instruments":[
                {"type":"BREAKPOINT","id":"bp-1","location":{"source":"com.example.Counter","line":21}}]}"#,
        )
        .unwrap();
    assert_eq!(result.applied.len(), 1);
    assert!(result.failed.is_empty());

    // the retransformation the service asked for
    assert!(probe.transform_class("com/example/Counter", &counter_class(52)).is_some());
    assert!(probe.transform_class("com/example/Other", &counter_class(52)).is_none());

    let mut heap = MemHeap::new();
    let mut scratch = HitScratch::new();
    assert!(probe.is_instrument_enabled("bp-1"));
    let value = heap.int(7);
    let label = heap.string("hits");
    scratch.put("bp-1", Scope::LocalVariable, "value", "int", Some(value));
    scratch.put("bp-1", Scope::LocalVariable, "result", "java.lang.Integer", None);
    scratch.put("bp-1", Scope::StaticField, "label", "java.lang.String", Some(label));
    assert!(probe.is_hit(&mut scratch, &heap, "bp-1"));
    probe.put_breakpoint(
        &mut scratch,
        &heap,
        "bp-1",
        COUNTER,
        21,
        || "main".to_string(),
        || {
            vec![StackFrame {
                class_name: COUNTER.into(),
                method_name: "twice".into(),
                source_file: Some("Counter.java".into()),
                line: Some(21),
            }]
        },
    );
    assert!(scratch.is_idle());

    let events = sink.take();
    assert_eq!(names(&events), vec!["INSTRUMENT_APPLIED", "INSTRUMENT_REMOVED", "BREAKPOINT_HIT"]);
    let ProbeEvent::BreakpointHit(hit) = &events[2] else { unreachable!() };
    assert_eq!(hit.breakpoint_id, "bp-1");
    assert_eq!(hit.location, LiveSourceLocation::new(COUNTER, 21));
    assert_eq!(hit.thread_name, "main");
    assert_eq!(hit.stack_trace.len(), 1);
    assert_eq!(hit.variables.len(), 3);
    assert_eq!(hit.variables[0].value["value"], 7);
    assert_eq!(hit.variables[0].value["@class"], "java.lang.Integer");
    assert_eq!(hit.variables[1].value, json!({"@class": "java.lang.Integer", "@null": true, "result": null}));
    assert_eq!(hit.variables[2].scope, Scope::StaticField);
    assert_eq!(hit.variables[2].value["label"], "hits");

    // hit limit reached: removed and the class restored
    assert!(!probe.is_instrument_enabled("bp-1"));
    assert_eq!(probe.service().instrumentation().retransforms().len(), 2);
    assert!(probe.transform_class("com/example/Counter", &counter_class(52)).is_none());
}

#[test]
fn report_without_hit_is_ignored() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    probe.execute(add(vec![LiveInstrument::breakpoint("bp-1", LiveSourceLocation::new(COUNTER, 21))]));
    let heap = MemHeap::new();
    let mut scratch = HitScratch::new();
    probe.put_breakpoint(&mut scratch, &heap, "bp-1", COUNTER, 21, String::new, Vec::new);
    probe.put_meter(&mut scratch, &heap, "bp-1");
    assert_eq!(names(&sink.events()), vec!["INSTRUMENT_APPLIED"]);

    // unknown ids are never hits
    assert!(!probe.is_hit(&mut scratch, &heap, "nope"));
}

#[test]
fn command_errors() {
    let (probe, _) = probe(FakeVm::default());
    assert!(matches!(probe.handle_command("{not json"), Err(ProbeError::Json(_))));
    assert!(matches!(probe.handle_command(r#"{"commandType":"RESTART"}"#), Err(ProbeError::Json(_))));

    let result = probe
        .handle_command(
            r#"{"commandType":"ADD_LIVE_INSTRUMENT","instruments":[
                {"type":"LOG","id":"log-1","location":{"source":"com.example.Counter","line":21},
                 "logFormat":"x","applyImmediately":true},
                {"type":"LOG","id":"log-2","location":{"source":"com.example.Counter","line":21},
                 "logFormat":"x","condition":"a &&"}]}"#,
        )
        .unwrap();
    assert!(result.applied.is_empty());
    assert_eq!(result.failed.len(), 2);
    assert_eq!(result.failed[0].id, "log-1");
    assert!(result.failed[0].message.contains("CLASS_NOT_FOUND"));
    assert!(result.failed[1].message.contains("CONDITIONAL_FAILED"));
}

#[test]
fn remove_command_by_location_and_instrument() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    probe.execute(add(vec![
        LiveInstrument::breakpoint("bp-1", LiveSourceLocation::new(COUNTER, 21)),
        LiveInstrument::log("log-1", LiveSourceLocation::new(COUNTER, 21), "x", &[]),
        LiveInstrument::breakpoint("bp-2", LiveSourceLocation::new(COUNTER, 30)),
    ]));
    sink.take();

    let result = probe
        .handle_command(r#"{"commandType":"REMOVE_LIVE_INSTRUMENT","locations":[{"source":"com.example.Counter","line":21}]}"#)
        .unwrap();
    assert_eq!(result.removed.len(), 2);

    let bp2 = probe.service().get("bp-2").unwrap().instrument.clone();
    let result = probe.execute(LiveInstrumentCommand::RemoveLiveInstrument { instruments: vec![bp2], locations: vec![] });
    assert_eq!(result.removed.len(), 1);
    assert!(probe.service().instruments().is_empty());
    assert_eq!(sink.count("INSTRUMENT_REMOVED"), 3);
}

#[test]
fn initial_instruments_from_config() {
    let (probe, _) = probe(FakeVm::default());
    assert!(probe.apply_initial_instruments().is_none());

    let config = ProbeConfig {
        instruments: vec![
            LiveInstrument::breakpoint("bp-1", LiveSourceLocation::new(COUNTER, 21)),
            LiveInstrument::breakpoint("bp-2", LiveSourceLocation::new(COUNTER, 21)).with_apply_immediately(),
        ],
        ..ProbeConfig::default()
    };
    let (probe, sink) = probe_with(&config, FakeVm::default());
    let result = probe.apply_initial_instruments().unwrap();
    assert_eq!(result.applied.len(), 1);
    assert_eq!(result.failed.len(), 1);
    let events = sink.events();
    let Some(ProbeEvent::InitialInstrumentsApplied(summary)) = events.last() else {
        panic!("expected a summary event, got {events:?}");
    };
    assert_eq!((summary.count, summary.failed), (2, 1));
}

#[test]
fn unparseable_class_drops_its_instruments() {
    let (probe, sink) = probe(FakeVm::default());
    probe.execute(add(vec![LiveInstrument::breakpoint("bp-1", LiveSourceLocation::new(COUNTER, 21))]));
    assert!(probe.transform_class("com/example/Counter", &[0xCA, 0xFE]).is_none());
    assert!(probe.service().get("bp-1").is_none());
    let events = sink.events();
    let Some(ProbeEvent::InstrumentRemoved(removed)) = events.last() else {
        panic!("expected a removal, got {events:?}");
    };
    assert_eq!(removed.outcome, RemovalOutcome::Errored);
}

#[test]
fn log_renders_arguments() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    probe.execute(add(vec![LiveInstrument::log(
        "log-1",
        LiveSourceLocation::new(COUNTER, 21),
        "value={} missing={} extra={}",
        &["value", "missing"],
    )]));
    sink.take();

    let mut heap = MemHeap::new();
    let mut scratch = HitScratch::new();
    let value = heap.int(7);
    scratch.put("log-1", Scope::LocalVariable, "value", "int", Some(value));
    assert!(probe.is_hit(&mut scratch, &heap, "log-1"));
    let arguments = vec!["value".to_string(), "missing".to_string()];
    probe.put_log(&mut scratch, &heap, "log-1", "value={} missing={} extra={}", &arguments, || "worker-1".into());

    let events = sink.take();
    let ProbeEvent::LogHit(log) = &events[1] else {
        panic!("expected a log hit, got {events:?}");
    };
    assert_eq!(log.message, "value=7 missing=null extra={}");
    assert_eq!(log.log_arguments["value"], "7");
    assert_eq!(log.log_arguments["missing"], "null");
    assert_eq!(log.thread_name, "worker-1");
    assert_eq!(log.location, LiveSourceLocation::new(COUNTER, 21));
}

fn hit_meter(probe: &jvmti_probe::probe::Probe<FakeVm>, heap: &MemHeap, scratch: &mut HitScratch<usize>, id: &str) {
    assert!(probe.is_hit(scratch, heap, id));
    probe.put_meter(scratch, heap, id);
}

fn meter_values(events: &[ProbeEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            ProbeEvent::Meter(m) => Some(m.value),
            _ => None,
        })
        .collect()
}

#[test]
fn count_meter_reports_running_total_or_rate() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    let mut rate = meter("rate-meter", MeterType::Count, MetricValueType::Number, "2");
    rate.meta.insert(METRIC_MODE_KEY.to_string(), json!("RATE"));
    probe.execute(add(vec![meter("my-meter", MeterType::Count, MetricValueType::Number, "1"), rate]));

    let heap = MemHeap::new();
    let mut scratch = HitScratch::new();
    for _ in 0..3 {
        hit_meter(&probe, &heap, &mut scratch, "my-meter");
        hit_meter(&probe, &heap, &mut scratch, "rate-meter");
    }

    let events = sink.take();
    assert_eq!(meter_values(&events), vec![1.0, 2.0, 2.0, 2.0, 3.0, 2.0]);
    let ProbeEvent::Meter(first) = events.iter().find(|e| e.name() == "METER").unwrap() else { unreachable!() };
    assert_eq!(first.metric_id, "count_my_meter");
    assert_eq!(first.meter_type, MeterType::Count);
    assert!(first.tags.is_empty());
    assert_eq!(probe.meters().aggregate("rate-meter", &BTreeMap::new()), Some(Aggregate::Counter { total: 6.0 }));

    // meters are unlimited and stay registered
    assert!(probe.is_instrument_enabled("my-meter"));

    probe.execute(LiveInstrumentCommand::RemoveLiveInstrument {
        instruments: vec![],
        locations: vec![LiveSourceLocation::new(COUNTER, 21)],
    });
    assert!(probe.meters().is_empty());
}

#[test]
fn histogram_groups_by_tag() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    let mut histogram = meter("latency", MeterType::Histogram, MetricValueType::NumberExpression, "value * 2");
    if let InstrumentKind::Meter { meter_tags, .. } = &mut histogram.kind {
        meter_tags.push(MeterTag { key: "job".into(), value_type: MeterTagValueType::ValueExpression, value: "name".into() });
        meter_tags.push(MeterTag { key: "env".into(), value_type: MeterTagValueType::Value, value: "test".into() });
    }
    probe.execute(add(vec![histogram]));

    let mut heap = MemHeap::new();
    let mut scratch = HitScratch::new();
    for (name, value) in [("a", 1), ("a", 4), ("b", 10)] {
        let name = heap.string(name);
        let value = heap.int(value);
        scratch.put("latency", Scope::LocalVariable, "name", "java.lang.String", Some(name));
        scratch.put("latency", Scope::LocalVariable, "value", "int", Some(value));
        hit_meter(&probe, &heap, &mut scratch, "latency");
    }

    assert_eq!(meter_values(&sink.events()), vec![2.0, 8.0, 20.0]);
    let tags: BTreeMap<String, String> = [("env", "test"), ("job", "a")].map(|(k, v)| (k.to_string(), v.to_string())).into();
    assert_eq!(
        probe.meters().aggregate("latency", &tags),
        Some(Aggregate::Histogram { count: 2, sum: 10.0, min: 2.0, max: 8.0 })
    );
    assert_eq!(probe.meters().len(), 2);
}

#[test]
fn gauge_value_expression_keeps_display() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    probe.execute(add(vec![meter("state", MeterType::Gauge, MetricValueType::ValueExpression, "name.toUpperCase()")]));

    let mut heap = MemHeap::new();
    let mut scratch = HitScratch::new();
    let name = heap.string("running");
    scratch.put("state", Scope::LocalVariable, "name", "java.lang.String", Some(name));
    hit_meter(&probe, &heap, &mut scratch, "state");

    let events = sink.take();
    let Some(ProbeEvent::Meter(gauge)) = events.last() else {
        panic!("expected a meter event, got {events:?}");
    };
    assert_eq!(gauge.display.as_deref(), Some("RUNNING"));
    assert!(gauge.value.is_nan());
    assert_eq!(gauge.metric_id, "gauge_state");
}

#[test]
fn spans_nest_per_thread() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    probe.execute(add(vec![
        LiveInstrument::span("outer", "com.example.Counter.add(int)", "add"),
        LiveInstrument::span("inner", "com.example.Counter.twice(int)", "twice"),
    ]));
    sink.take();

    let heap = MemHeap::new();
    let mut scratch: HitScratch<usize> = HitScratch::new();
    probe.open_span(&mut scratch, &heap, "outer");
    probe.open_span(&mut scratch, &heap, "inner");
    probe.open_span(&mut scratch, &heap, "missing");
    assert_eq!(scratch.open_spans(), 2);

    probe.close_span(&mut scratch, "inner", None, || "main".into());
    probe.close_span(&mut scratch, "missing", None, || "main".into());
    probe.close_span(&mut scratch, "outer", Some("java.lang.IllegalStateException: boom".into()), || "main".into());
    assert!(scratch.is_idle());

    let events = sink.take();
    assert_eq!(names(&events), vec!["SPAN", "SPAN"]);
    let ProbeEvent::Span(inner) = &events[0] else { unreachable!() };
    assert_eq!((inner.span_id.as_str(), inner.operation_name.as_str()), ("inner", "twice"));
    assert!(inner.error.is_none());
    assert!(inner.ended_at >= inner.started_at);
    let ProbeEvent::Span(outer) = &events[1] else { unreachable!() };
    assert_eq!(outer.error.as_deref(), Some("java.lang.IllegalStateException: boom"));
    assert_eq!(outer.thread_name, "main");

    // spans are unlimited
    assert!(probe.is_instrument_enabled("outer"));
}

#[test]
fn recursive_span_closes_innermost_first() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    probe.execute(add(vec![LiveInstrument::span("s", "com.example.Counter.abs(int)", "abs")]));
    sink.take();

    let heap = MemHeap::new();
    let mut scratch: HitScratch<usize> = HitScratch::new();
    probe.open_span(&mut scratch, &heap, "s");
    std::thread::sleep(std::time::Duration::from_millis(5));
    probe.open_span(&mut scratch, &heap, "s");
    probe.close_span(&mut scratch, "s", None, || "main".into());
    probe.close_span(&mut scratch, "s", None, || "main".into());

    let events = sink.take();
    let (ProbeEvent::Span(first), ProbeEvent::Span(second)) = (&events[0], &events[1]) else {
        panic!("expected two spans, got {events:?}");
    };
    assert!(first.duration_micros < second.duration_micros);
}

#[test]
fn shutdown_clears_instruments() {
    let (probe, _) = probe(FakeVm::with_classes(&[COUNTER]));
    probe.execute(add(vec![LiveInstrument::breakpoint("bp-1", LiveSourceLocation::new(COUNTER, 21))]));
    probe.shutdown();
    assert!(probe.service().instruments().is_empty());
    assert!(!probe.is_instrument_enabled("bp-1"));
}

#[test]
fn oversized_method_drops_only_its_instruments() {
    let (probe, sink) = probe(FakeVm::with_classes(&[BIG]));
    probe.execute(add(vec![LiveInstrument::breakpoint("good", LiveSourceLocation::new(BIG, 4))]));
    assert!(probe.transform_class("com/example/Big", &big_class()).is_some());

    probe.execute(add(vec![LiveInstrument::breakpoint("bad", LiveSourceLocation::new(BIG, 100))]));
    let bytes = probe.transform_class("com/example/Big", &big_class()).expect("class still rewritten");
    ClassFile::parse(&bytes).expect("rewritten class parses");

    assert!(probe.is_instrument_enabled("good"));
    assert!(!probe.is_instrument_enabled("bad"));
    let removed: Vec<_> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ProbeEvent::InstrumentRemoved(removed) => Some(removed),
            _ => None,
        })
        .collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].instrument.id, "bad");
    assert_eq!(removed[0].outcome, RemovalOutcome::Errored);
    assert!(removed[0].cause.as_deref().unwrap_or_default().contains("failed to inject"));
}

#[test]
fn finished_meter_starts_over_when_added_again() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    let limited = || meter("my-meter", MeterType::Count, MetricValueType::Number, "1").with_hit_limit(2);
    probe.execute(add(vec![limited()]));

    let heap = MemHeap::new();
    let mut scratch = HitScratch::new();
    hit_meter(&probe, &heap, &mut scratch, "my-meter");
    hit_meter(&probe, &heap, &mut scratch, "my-meter");
    assert_eq!(meter_values(&sink.take()), vec![1.0, 2.0]);
    assert!(!probe.is_instrument_enabled("my-meter"));
    assert!(probe.meters().is_empty());

    probe.execute(add(vec![limited()]));
    hit_meter(&probe, &heap, &mut scratch, "my-meter");
    assert_eq!(meter_values(&sink.take()), vec![1.0]);
}

#[test]
fn nested_hit_decision_discards_its_capture() {
    let (probe, sink) = probe(FakeVm::with_classes(&[COUNTER]));
    probe.execute(add(vec![LiveInstrument::breakpoint("bp-1", LiveSourceLocation::new(COUNTER, 21))]));
    let mut heap = MemHeap::new();
    let stale = heap.int(1);
    let fresh = heap.int(2);
    let cell = ScratchCell::new();

    cell.with(|scratch| scratch.put("bp-1", Scope::LocalVariable, "value", "int", Some(stale)));
    // a hook running while another hook holds the scratch
    cell.with(|_| assert!(cell.decide("bp-1", |scratch| probe.is_hit(scratch, &heap, "bp-1")).is_none()));

    cell.with(|scratch| scratch.put("bp-1", Scope::LocalVariable, "result", "int", Some(fresh)));
    assert_eq!(cell.decide("bp-1", |scratch| probe.is_hit(scratch, &heap, "bp-1")), Some(true));
    cell.with(|scratch| probe.put_breakpoint(scratch, &heap, "bp-1", COUNTER, 21, String::new, Vec::new));

    let events = sink.events();
    let Some(ProbeEvent::BreakpointHit(hit)) = events.iter().find(|e| e.name() == "BREAKPOINT_HIT") else {
        panic!("expected a hit, got {events:?}");
    };
    assert_eq!(hit.variables.len(), 1);
    assert_eq!(hit.variables[0].value["result"], 2);
}
