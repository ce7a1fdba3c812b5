mod support;

use jvmti_probe::context::{ContextMap, Scope};
use jvmti_probe::error::{LiveInstrumentErrorType, ProbeError};
use jvmti_probe::event::{EventSink, ProbeEvent, RecordingSink};
use jvmti_probe::instrument::model::{HitThrottle, ThrottleStep};
use jvmti_probe::instrument::{
    InstrumentState, LiveInstrument, LiveInstrumentService, LiveSourceLocation, RemovalOutcome, Throttle,
};
use std::sync::Arc;
use support::{FakeVm, MemHeap, COUNTER};

fn service(vm: FakeVm) -> (LiveInstrumentService<FakeVm>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let events: Arc<dyn EventSink> = sink.clone();
    (LiveInstrumentService::new(vm, events), sink)
}

fn breakpoint(id: &str, line: i32) -> LiveInstrument {
    LiveInstrument::breakpoint(id, LiveSourceLocation::new(COUNTER, line))
}

fn removals(sink: &RecordingSink) -> Vec<(String, RemovalOutcome)> {
    sink.events()
        .into_iter()
        .filter_map(|event| match event {
            ProbeEvent::InstrumentRemoved(removed) => Some((removed.instrument.id, removed.outcome)),
            _ => None,
        })
        .collect()
}

#[test]
fn pending_until_class_loads() {
    let (service, sink) = service(FakeVm::default());
    service.apply_instrument(breakpoint("bp-1", 21)).unwrap();

    let active = service.get("bp-1").expect("registered");
    assert_eq!(active.state(), InstrumentState::Pending);
    assert!(!active.is_live());
    assert!(service.is_instrument_enabled("bp-1"));
    assert!(service.has_instruments_for(COUNTER));
    assert_eq!(service.instruments_for_class(COUNTER).len(), 1);
    assert_eq!(service.retry_pending(), 0);
    assert!(service.instrumentation().retransforms().is_empty());

    service.instrumentation().load(COUNTER);
    assert_eq!(service.retry_pending(), 1);
    assert_eq!(active.state(), InstrumentState::Live);
    assert!(active.is_live());
    assert_eq!(service.instrumentation().retransforms(), vec![vec![COUNTER.to_string()]]);
    assert_eq!(sink.count("INSTRUMENT_APPLIED"), 1);

    // nothing left to retry
    assert_eq!(service.retry_pending(), 0);
}

#[test]
fn apply_immediately_requires_loaded_class() {
    let (service, sink) = service(FakeVm::default());
    let err = service.apply_instrument(breakpoint("bp-1", 21).with_apply_immediately()).unwrap_err();
    assert_eq!(err.instrument_error_type(), Some(LiveInstrumentErrorType::ClassNotFound));
    assert!(err.to_string().contains("CLASS_NOT_FOUND"));
    assert!(service.get("bp-1").is_none());
    assert!(sink.events().is_empty());
}

#[test]
fn applies_to_outer_and_nested_classes() {
    let vm = FakeVm::with_classes(&["com.example.Counter$Step", COUNTER, "com.example.CounterTest"]);
    let (service, _) = service(vm);
    service.apply_instrument(breakpoint("bp-1", 21)).unwrap();
    assert_eq!(
        service.instrumentation().retransforms(),
        vec![vec![COUNTER.to_string(), "com.example.Counter$Step".to_string()]]
    );
    assert_eq!(service.instruments_for_class("com.example.Counter$Step").len(), 1);
    assert!(service.instruments_for_class("com.example.CounterTest").is_empty());
}

#[test]
fn duplicate_id_keeps_the_first() {
    let (service, _) = service(FakeVm::with_classes(&[COUNTER]));
    service.apply_instrument(breakpoint("bp-1", 21)).unwrap();
    let second = service.apply_instrument(breakpoint("bp-1", 30)).unwrap();
    assert_eq!(second.line(), Some(21));
    assert_eq!(service.instruments().len(), 1);
    assert_eq!(service.instrumentation().retransforms().len(), 1);
}

#[test]
fn bad_condition_is_rejected() {
    let (service, _) = service(FakeVm::with_classes(&[COUNTER]));
    let err = service.apply_instrument(breakpoint("bp-1", 21).with_condition("count >")).unwrap_err();
    assert_eq!(err.instrument_error_type(), Some(LiveInstrumentErrorType::ConditionalFailed));
    assert!(service.get("bp-1").is_none());

    // blank conditions are ignored
    service.apply_instrument(breakpoint("bp-2", 21).with_condition("   ")).unwrap();
    assert!(service.get("bp-2").unwrap().condition.is_none());
}

#[test]
fn remove_by_id_and_location() {
    let (service, sink) = service(FakeVm::with_classes(&[COUNTER]));
    service.apply_instrument(breakpoint("bp-1", 21)).unwrap();
    service.apply_instrument(breakpoint("bp-2", 21)).unwrap();
    service.apply_instrument(breakpoint("bp-3", 30)).unwrap();
    service
        .apply_instrument(LiveInstrument::breakpoint("bp-4", LiveSourceLocation::new("com.example.Counter$Step", 21)))
        .unwrap();
    let applied = service.instrumentation().retransforms().len();

    let removed = service.remove_instrument(COUNTER, None, Some("bp-3"));
    assert_eq!(removed.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["bp-3"]);
    assert_eq!(service.instrumentation().retransforms().len(), applied + 1);

    let removed = service.remove_instrument(COUNTER, Some(21), None);
    let mut ids: Vec<_> = removed.iter().map(|i| i.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["bp-1", "bp-2", "bp-4"]);
    // one retransform for the live class; the nested class never loaded
    assert_eq!(service.instrumentation().retransforms().len(), applied + 2);
    assert!(service.instruments().is_empty());

    assert!(service.remove_instrument(COUNTER, None, Some("bp-1")).is_empty());
    assert!(removals(&sink).iter().all(|(_, outcome)| *outcome == RemovalOutcome::Removed));
    assert_eq!(removals(&sink).len(), 4);
}

#[test]
fn expired_instruments_are_swept() {
    let (service, sink) = service(FakeVm::with_classes(&[COUNTER]));
    service.apply_instrument(breakpoint("bp-1", 21).with_expires_at(1_000)).unwrap();
    service.apply_instrument(breakpoint("bp-2", 21)).unwrap();

    assert_eq!(service.sweep_expired_at(999), 0);
    assert_eq!(service.sweep_expired_at(1_000), 1);
    assert!(service.get("bp-1").is_none());
    assert!(service.get("bp-2").is_some());
    assert_eq!(removals(&sink), vec![("bp-1".to_string(), RemovalOutcome::Expired)]);
}

#[test]
fn failed_retransform_removes_instrument() {
    let vm = FakeVm::with_classes(&[COUNTER]);
    vm.fail_retransform(true);
    let (service, sink) = service(vm);

    service.apply_instrument(breakpoint("bp-1", 21)).unwrap();
    assert!(service.get("bp-1").is_none());
    assert_eq!(removals(&sink), vec![("bp-1".to_string(), RemovalOutcome::Errored)]);
    // the attempt and the restore
    assert_eq!(service.instrumentation().retransforms().len(), 2);

    let err = service.apply_instrument(breakpoint("bp-2", 21).with_apply_immediately()).unwrap_err();
    assert!(matches!(err, ProbeError::Retransform { .. }));
}

#[test]
fn transform_failure_evicts_class_instruments() {
    let (service, sink) = service(FakeVm::default());
    service.apply_instrument(breakpoint("bp-1", 21)).unwrap();
    service
        .apply_instrument(LiveInstrument::breakpoint("other", LiveSourceLocation::new("com.example.Other", 3)))
        .unwrap();

    service.transform_failed(COUNTER, "method too large");
    assert!(service.get("bp-1").is_none());
    assert!(service.get("other").is_some());
    let events = sink.events();
    let ProbeEvent::InstrumentRemoved(removed) = &events[0] else {
        panic!("expected a removal, got {events:?}");
    };
    assert_eq!(removed.outcome, RemovalOutcome::Errored);
    assert!(removed.cause.as_deref().unwrap().contains("method too large"));
}

#[test]
fn hit_limit_withdraws_instrument() {
    let (service, sink) = service(FakeVm::with_classes(&[COUNTER]));
    service
        .apply_instrument(breakpoint("bp-1", 21).with_hit_limit(2).with_throttle(HitThrottle::NONE))
        .unwrap();
    let heap = MemHeap::new();
    let context = ContextMap::new();

    let first = service.is_hit_at("bp-1", &context, &heap, 0).expect("first hit");
    assert_eq!(first.hit_count(), 1);
    assert!(service.is_hit_at("bp-1", &context, &heap, 1).is_some());
    assert!(service.is_hit_at("bp-1", &context, &heap, 2).is_none());
    assert!(first.is_removal());
    assert_eq!(removals(&sink), vec![("bp-1".to_string(), RemovalOutcome::Removed)]);
    // applied, then restored
    assert_eq!(service.instrumentation().retransforms().len(), 2);
}

#[test]
fn default_throttle_allows_one_hit_a_second() {
    let (service, _) = service(FakeVm::with_classes(&[COUNTER]));
    service.apply_instrument(breakpoint("bp-1", 21).with_hit_limit(-1)).unwrap();
    let heap = MemHeap::new();
    let context = ContextMap::new();

    assert!(service.is_hit_at("bp-1", &context, &heap, 10_000).is_some());
    assert!(service.is_hit_at("bp-1", &context, &heap, 10_500).is_none());
    assert!(service.is_hit_at("bp-1", &context, &heap, 11_001).is_some());

    let active = service.get("bp-1").unwrap();
    assert_eq!(active.hit_count(), 2);
    let throttle = active.throttle().expect("throttled");
    assert_eq!((throttle.total_passed(), throttle.total_limited()), (2, 1));
}

#[test]
fn conditions_gate_hits() {
    let (service, sink) = service(FakeVm::with_classes(&[COUNTER]));
    let instrument = breakpoint("bp-1", 21).with_hit_limit(-1).with_throttle(HitThrottle::NONE);
    service.apply_instrument(instrument.with_condition("count > 3 && name.startsWith('job')")).unwrap();

    let mut heap = MemHeap::new();
    let mut context = ContextMap::new();
    let name = heap.string("job-7");
    context.put(Scope::LocalVariable, "name", "java.lang.String", Some(name));
    let low = heap.int(2);
    context.put(Scope::LocalVariable, "count", "int", Some(low));
    assert!(service.is_hit_at("bp-1", &context, &heap, 0).is_none());
    assert_eq!(service.get("bp-1").unwrap().hit_count(), 0);

    let high = heap.int(5);
    context.put(Scope::LocalVariable, "count", "int", Some(high));
    assert!(service.is_hit_at("bp-1", &context, &heap, 0).is_some());

    // a condition that cannot be evaluated removes the instrument
    let text = heap.string("five");
    context.put(Scope::LocalVariable, "count", "java.lang.String", Some(text));
    assert!(service.is_hit_at("bp-1", &context, &heap, 0).is_none());
    assert!(service.get("bp-1").is_none());
    assert_eq!(removals(&sink), vec![("bp-1".to_string(), RemovalOutcome::Errored)]);
}

#[test]
fn throttle_windows() {
    assert!(Throttle::new(HitThrottle::NONE).is_none());

    let throttle = Throttle::new(HitThrottle { limit: 2, step: ThrottleStep::Second }).unwrap();
    assert!(!throttle.is_rate_limited_at(0));
    assert!(!throttle.is_rate_limited_at(10));
    assert!(throttle.is_rate_limited_at(20));
    assert!(throttle.is_rate_limited_at(1_000));
    // more than a step since the window opened
    assert!(!throttle.is_rate_limited_at(1_001));
    assert!(!throttle.is_rate_limited_at(1_002));
    assert!(throttle.is_rate_limited_at(1_003));
    assert_eq!((throttle.total_passed(), throttle.total_limited()), (4, 3));

    let minute = Throttle::new(HitThrottle { limit: 1, step: ThrottleStep::Minute }).unwrap();
    assert!(!minute.is_rate_limited_at(0));
    assert!(minute.is_rate_limited_at(59_000));
    assert!(!minute.is_rate_limited_at(60_001));
}

#[test]
fn defaults_by_kind() {
    let bp = breakpoint("bp", 1);
    assert_eq!(bp.hit_limit(), 1);
    assert_eq!(bp.throttle(), HitThrottle::ONCE_A_SECOND);

    let span = LiveInstrument::span("s", "com.example.Counter.twice(int)", "op");
    assert_eq!(span.hit_limit(), -1);
    assert_eq!(span.throttle(), HitThrottle::NONE);
    assert_eq!(span.target_class(), COUNTER);

    let location = LiveSourceLocation::new(COUNTER, 3);
    assert!(location.matches_class("com.example.Counter$1"));
    assert!(!location.matches_class("com.example.CounterTest"));
    assert_eq!(location.to_string(), "com.example.Counter:3");
}

#[test]
fn removed_while_applying_is_stripped_again() {
    let (service, sink) = service(FakeVm::with_classes(&[COUNTER]));
    let service = Arc::new(service);
    let during = Arc::downgrade(&service);
    service.instrumentation().during_next_retransform(move || {
        if let Some(service) = during.upgrade() {
            assert_eq!(service.injection_failed(&["bp-1".to_string()], "code too large"), 1);
        }
    });

    let err = service.apply_instrument(breakpoint("bp-1", 21).with_apply_immediately()).unwrap_err();
    assert!(matches!(err, ProbeError::Retransform { .. }));
    assert!(service.get("bp-1").is_none());
    assert_eq!(removals(&sink), vec![("bp-1".to_string(), RemovalOutcome::Errored)]);
    // the rewrite that raced the removal is undone
    assert_eq!(service.instrumentation().retransforms(), vec![vec![COUNTER.to_string()], vec![COUNTER.to_string()]]);
}
