use criterion::{criterion_group, criterion_main, Criterion};
use jvmti_probe::classfile::ClassFile;
use jvmti_probe::instrument::model::{MeterType, MetricValue, MetricValueType};
use jvmti_probe::instrument::{ActiveLiveInstrument, LiveInstrument, LiveSourceLocation};
use jvmti_probe::transform::LiveTransformer;
use std::sync::Arc;

#[path = "../tests/support/mod.rs"]
mod support;

use support::{counter_class, COUNTER};

fn build_min_class() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xCAFEBABE_u32.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&52_u16.to_be_bytes());

    // constant pool count = 5
    bytes.extend_from_slice(&5_u16.to_be_bytes());

    // 1: Utf8 "Test"
    bytes.push(1);
    bytes.extend_from_slice(&4_u16.to_be_bytes());
    bytes.extend_from_slice(b"Test");

    // 2: Utf8 "java/lang/Object"
    bytes.push(1);
    bytes.extend_from_slice(&16_u16.to_be_bytes());
    bytes.extend_from_slice(b"java/lang/Object");

    // 3: Class #1
    bytes.push(7);
    bytes.extend_from_slice(&1_u16.to_be_bytes());

    // 4: Class #2
    bytes.push(7);
    bytes.extend_from_slice(&2_u16.to_be_bytes());

    // access_flags, this_class, super_class
    bytes.extend_from_slice(&0x0021_u16.to_be_bytes());
    bytes.extend_from_slice(&3_u16.to_be_bytes());
    bytes.extend_from_slice(&4_u16.to_be_bytes());

    // interfaces, fields, methods, attributes
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());

    bytes
}

fn bench_classfile_parse(c: &mut Criterion) {
    let bytes = build_min_class();
    c.bench_function("classfile_parse_min", |b| {
        b.iter(|| {
            let _ = ClassFile::parse(&bytes).unwrap();
        })
    });

    let counter = counter_class(52);
    c.bench_function("classfile_round_trip_counter", |b| {
        b.iter(|| ClassFile::parse(&counter).unwrap().to_bytes().unwrap())
    });
}

fn bench_transform(c: &mut Criterion) {
    let bytes = counter_class(52);
    let instruments: Vec<Arc<ActiveLiveInstrument>> = [
        LiveInstrument::breakpoint("bp-1", LiveSourceLocation::new(COUNTER, 21)),
        LiveInstrument::log("log-1", LiveSourceLocation::new(COUNTER, 11), "added {}", &["amount"]),
        LiveInstrument::meter(
            "meter-1",
            LiveSourceLocation::new(COUNTER, 32),
            MeterType::Count,
            MetricValue { value_type: MetricValueType::Number, value: "1".into() },
        ),
        LiveInstrument::span("span-1", "com.example.Counter.abs(int)", "abs"),
    ]
    .into_iter()
    .enumerate()
    .map(|(seq, instrument)| Arc::new(ActiveLiveInstrument::new(instrument, seq as u64).unwrap()))
    .collect();

    let transformer = LiveTransformer::default();
    c.bench_function("transform_counter_four_instruments", |b| {
        b.iter(|| transformer.transform(&bytes, &instruments).unwrap().unwrap())
    });
}

criterion_group!(benches, bench_classfile_parse, bench_transform);
criterion_main!(benches);
